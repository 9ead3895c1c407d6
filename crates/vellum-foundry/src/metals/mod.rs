//! Operator library.
//!
//! Each operator owns its output slots and declares its inputs as slots that
//! the decoder block rebinds onto upstream outputs. Shape parameters are baked
//! into the generated source as scalar constants; the sequence position
//! arrives through a uniform.

use crate::{
    FoundryError, slot::{ScalarValue, SlotGraph, SlotId}
};

pub mod attention_score;
pub mod elementwise_mul;
pub mod embedding;
pub mod matmul;
pub mod rmsnorm;
pub mod rope;
pub mod silu;
pub mod softmax;
pub mod value_sum;

pub use attention_score::AttentionScore;
pub use elementwise_mul::ElementwiseMul;
pub use embedding::Embedding;
pub use matmul::MatMul;
pub use rmsnorm::RmsNorm;
pub use rope::Rope;
pub use silu::Silu;
pub use softmax::Softmax;
pub use value_sum::ValueSum;

/// Value written in place of attention scores past the current sequence length.
pub const MASKED_SCORE: f32 = -1e9;

pub(crate) fn to_u32(what: &str, value: usize) -> Result<u32, FoundryError> {
    u32::try_from(value).map_err(|_| FoundryError::InvalidOperation(format!("{what} = {value} does not fit a 32-bit index")))
}

/// Baked-in `uint` shape constant.
pub(crate) fn shape_constant(slots: &mut SlotGraph, prefix: &str, name: &str, value: usize) -> Result<SlotId, FoundryError> {
    let v = to_u32(name, value)?;
    Ok(slots.scalar(format!("{prefix}.{name}"), ScalarValue::U32(v)))
}

/// Number of valid cache rows at `position`.
pub(crate) fn seq_len(position: usize, capacity: usize) -> usize {
    (position + 1).min(capacity)
}
