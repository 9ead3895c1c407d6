//! Decoder-only transformer built from the operator library.

pub mod block;
pub mod config;
pub mod pipeline;

pub use block::{BlockWeights, DecoderBlock};
pub use config::ModelConfig;
pub use pipeline::{DecodeState, FinishReason, Generation, ModelPipeline};
