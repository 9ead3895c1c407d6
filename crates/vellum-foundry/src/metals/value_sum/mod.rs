//! Attention-weighted sum over the value cache: `out[q, d] = sum_pos w[q, pos] * V[pos, kv(q), d]`.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::{attention_score::AttentionShape, seq_len, shape_constant}, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct ValueSum {
    /// `[q_heads, capacity]` attention weights.
    pub weights: SlotId,
    /// `[capacity, kv_heads, head_dim]`.
    pub values: SlotId,
    /// `[q_heads, head_dim]`.
    pub output: SlotId,
    pub position: SlotId,
    consts: [SlotId; 4],
    shape: AttentionShape,
}

impl ValueSum {
    pub fn new(slots: &mut SlotGraph, prefix: &str, values: SlotId, position: SlotId, shape: AttentionShape) -> Result<KernelOperator<Self>, FoundryError> {
        shape.validate(prefix)?;
        if slots.count(values)? != shape.cache_len() {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(values).to_string(),
                expected: vec![shape.capacity, shape.kv_heads, shape.head_dim],
                actual: vec![slots.count(values)?],
            });
        }
        Ok(KernelOperator::new(Self {
            weights: slots.storage::<f32>(format!("{prefix}.weights"), shape.q_heads * shape.capacity)?,
            values,
            output: slots.storage::<f32>(format!("{prefix}.out"), shape.q_heads * shape.head_dim)?,
            position,
            consts: [
                shape_constant(slots, prefix, "q_heads", shape.q_heads)?,
                shape_constant(slots, prefix, "kv_heads", shape.kv_heads)?,
                shape_constant(slots, prefix, "head_dim", shape.head_dim)?,
                shape_constant(slots, prefix, "capacity", shape.capacity)?,
            ],
            shape,
        }))
    }
}

impl Kernel for ValueSum {
    fn key(&self) -> KernelCacheKey {
        let s = self.shape;
        kernel_cache_key!("value_sum", "q{}_kv{}_d{}_c{}", s.q_heads, s.kv_heads, s.head_dim, s.capacity)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("weights", self.weights),
            Binding::new("values", self.values),
            Binding::new("out", self.output),
            Binding::new("position", self.position),
            Binding::new("q_heads", self.consts[0]),
            Binding::new("kv_heads", self.consts[1]),
            Binding::new("head_dim", self.consts[2]),
            Binding::new("capacity", self.consts[3]),
        ]
    }

    fn body(&self) -> String {
        r#"uint d = gid.x;
uint head = gid.y;
if (d >= head_dim || head >= q_heads) return;
uint seq_len = min(position + 1u, capacity);
uint kv = head / (q_heads / kv_heads);
float acc = 0.0f;
for (uint pos = 0; pos < seq_len; ++pos) {
    acc += weights[head * capacity + pos] * values[(pos * kv_heads + kv) * head_dim + d];
}
out[head * head_dim + d] = acc;"#
            .to_string()
    }

    fn host(&self) -> HostKernel {
        let shape = self.shape;
        HostKernel::new(move |inv, gid| {
            let (d, head) = (gid[0] as usize, gid[1] as usize);
            if d >= shape.head_dim || head >= shape.q_heads {
                return;
            }
            let len = seq_len(inv.load_u32(3, 0) as usize, shape.capacity);
            let kv = shape.kv_head(head);
            let hd = shape.head_dim;
            let acc: f32 = (0..len)
                .map(|pos| inv.load_f32(0, head * shape.capacity + pos) * inv.load_f32(1, (pos * shape.kv_heads + kv) * hd + d))
                .sum();
            inv.store_f32(2, head * hd + d, acc);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d2(1, 1)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.shape.head_dim, self.shape.q_heads, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
