//! Token sampling and incremental detokenization for the decode loop.

pub mod sampler;
mod stream;

pub use sampler::{SamplerBuffers, SamplingConfig, argmax, sample};
pub use stream::StreamDecoder;
