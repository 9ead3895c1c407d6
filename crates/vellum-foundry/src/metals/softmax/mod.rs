//! Row-wise softmax over the valid prefix of each head's score row.
//!
//! Exponent arguments are clamped to `[-80, 80]`. A row whose sum does not
//! exceed `eps` produces all-zero weights; entries past the sequence length
//! are zeroed.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::{seq_len, shape_constant}, slot::{ScalarValue, SlotGraph, SlotId}, types::ThreadgroupSize
};

pub const SOFTMAX_EPS: f32 = 1e-20;
const EXP_CLAMP: f32 = 80.0;

pub struct Softmax {
    /// `[heads, capacity]` scores.
    pub scores: SlotId,
    /// `[heads, capacity]` weights.
    pub weights: SlotId,
    pub position: SlotId,
    consts: [SlotId; 3],
    heads: usize,
    capacity: usize,
}

impl Softmax {
    pub fn new(slots: &mut SlotGraph, prefix: &str, position: SlotId, heads: usize, capacity: usize) -> Result<KernelOperator<Self>, FoundryError> {
        if capacity == 0 {
            return Err(FoundryError::InvalidOperation(format!("{prefix}: capacity must be positive")));
        }
        Ok(KernelOperator::new(Self {
            scores: slots.storage::<f32>(format!("{prefix}.scores"), heads * capacity)?,
            weights: slots.storage::<f32>(format!("{prefix}.weights"), heads * capacity)?,
            position,
            consts: [
                shape_constant(slots, prefix, "heads", heads)?,
                shape_constant(slots, prefix, "capacity", capacity)?,
                slots.scalar(format!("{prefix}.eps"), ScalarValue::F32(SOFTMAX_EPS)),
            ],
            heads,
            capacity,
        }))
    }
}

impl Kernel for Softmax {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("softmax", "h{}_c{}", self.heads, self.capacity)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("scores", self.scores),
            Binding::new("weights", self.weights),
            Binding::new("position", self.position),
            Binding::new("heads", self.consts[0]),
            Binding::new("capacity", self.consts[1]),
            Binding::new("eps", self.consts[2]),
        ]
    }

    fn body(&self) -> String {
        r#"uint head = gid.x;
if (head >= heads) return;
uint seq_len = min(position + 1u, capacity);
uint row = head * capacity;
float row_max = -INFINITY;
for (uint i = 0; i < seq_len; ++i) {
    row_max = max(row_max, scores[row + i]);
}
float sum = 0.0f;
for (uint i = 0; i < seq_len; ++i) {
    float e = exp(clamp(scores[row + i] - row_max, -80.0f, 80.0f));
    weights[row + i] = e;
    sum += e;
}
for (uint i = 0; i < capacity; ++i) {
    weights[row + i] = (i < seq_len && sum > eps) ? weights[row + i] / sum : 0.0f;
}"#
        .to_string()
    }

    fn host(&self) -> HostKernel {
        let (heads, capacity) = (self.heads, self.capacity);
        HostKernel::new(move |inv, gid| {
            let head = gid[0] as usize;
            if head >= heads {
                return;
            }
            let len = seq_len(inv.load_u32(2, 0) as usize, capacity);
            let row = head * capacity;
            let row_max = (0..len).map(|i| inv.load_f32(0, row + i)).fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for i in 0..len {
                let e = (inv.load_f32(0, row + i) - row_max).clamp(-EXP_CLAMP, EXP_CLAMP).exp();
                inv.store_f32(1, row + i, e);
                sum += e;
            }
            for i in 0..capacity {
                let w = if i < len && sum > SOFTMAX_EPS { inv.load_f32(1, row + i) / sum } else { 0.0 };
                inv.store_f32(1, row + i, w);
            }
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d1(1)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.heads, 1, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
