//! Scaled dot-product scores of every query head against the key cache.
//!
//! `score[q * capacity + pos] = scale * dot(Q[q], K[pos, kv(q)])` with
//! `kv(q) = q / (q_heads / kv_heads)`. Positions at or past the current
//! sequence length get [`MASKED_SCORE`](super::MASKED_SCORE).

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::{MASKED_SCORE, seq_len, shape_constant}, slot::{ScalarValue, SlotGraph, SlotId}, types::ThreadgroupSize
};

/// Head layout shared by the attention operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttentionShape {
    pub q_heads: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
    pub capacity: usize,
}

impl AttentionShape {
    pub fn validate(&self, what: &str) -> Result<(), FoundryError> {
        if self.kv_heads == 0 || self.q_heads % self.kv_heads != 0 {
            return Err(FoundryError::InvalidOperation(format!(
                "{what}: {} query heads cannot be grouped over {} kv heads",
                self.q_heads, self.kv_heads
            )));
        }
        if self.capacity == 0 || self.head_dim == 0 {
            return Err(FoundryError::InvalidOperation(format!("{what}: empty attention shape {self:?}")));
        }
        Ok(())
    }

    /// KV head serving query head `q`.
    pub fn kv_head(&self, q: usize) -> usize {
        q / (self.q_heads / self.kv_heads)
    }

    pub fn cache_len(&self) -> usize {
        self.capacity * self.kv_heads * self.head_dim
    }
}

pub struct AttentionScore {
    /// `[q_heads, head_dim]`.
    pub query: SlotId,
    /// `[capacity, kv_heads, head_dim]`.
    pub keys: SlotId,
    /// `[q_heads, capacity]`.
    pub scores: SlotId,
    pub position: SlotId,
    consts: [SlotId; 5],
    shape: AttentionShape,
    scale: f32,
}

impl AttentionScore {
    pub fn new(slots: &mut SlotGraph, prefix: &str, keys: SlotId, position: SlotId, shape: AttentionShape) -> Result<KernelOperator<Self>, FoundryError> {
        shape.validate(prefix)?;
        if slots.count(keys)? != shape.cache_len() {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(keys).to_string(),
                expected: vec![shape.capacity, shape.kv_heads, shape.head_dim],
                actual: vec![slots.count(keys)?],
            });
        }
        let scale = 1.0 / (shape.head_dim as f32).sqrt();
        Ok(KernelOperator::new(Self {
            query: slots.storage::<f32>(format!("{prefix}.query"), shape.q_heads * shape.head_dim)?,
            keys,
            scores: slots.storage::<f32>(format!("{prefix}.scores"), shape.q_heads * shape.capacity)?,
            position,
            consts: [
                shape_constant(slots, prefix, "q_heads", shape.q_heads)?,
                shape_constant(slots, prefix, "kv_heads", shape.kv_heads)?,
                shape_constant(slots, prefix, "head_dim", shape.head_dim)?,
                shape_constant(slots, prefix, "capacity", shape.capacity)?,
                slots.scalar(format!("{prefix}.scale"), ScalarValue::F32(scale)),
            ],
            shape,
            scale,
        }))
    }
}

impl Kernel for AttentionScore {
    fn key(&self) -> KernelCacheKey {
        let s = self.shape;
        kernel_cache_key!("attention_score", "q{}_kv{}_d{}_c{}", s.q_heads, s.kv_heads, s.head_dim, s.capacity)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("query", self.query),
            Binding::new("keys", self.keys),
            Binding::new("scores", self.scores),
            Binding::new("position", self.position),
            Binding::new("q_heads", self.consts[0]),
            Binding::new("kv_heads", self.consts[1]),
            Binding::new("head_dim", self.consts[2]),
            Binding::new("capacity", self.consts[3]),
            Binding::new("scale", self.consts[4]),
        ]
    }

    fn body(&self) -> String {
        format!(
            r#"uint pos = gid.x;
uint head = gid.y;
if (pos >= capacity || head >= q_heads) return;
uint seq_len = min(position + 1u, capacity);
uint idx = head * capacity + pos;
if (pos >= seq_len) {{
    scores[idx] = {masked:?}f;
    return;
}}
uint kv = head / (q_heads / kv_heads);
float acc = 0.0f;
for (uint d = 0; d < head_dim; ++d) {{
    acc += query[head * head_dim + d] * keys[(pos * kv_heads + kv) * head_dim + d];
}}
scores[idx] = acc * scale;"#,
            masked = MASKED_SCORE
        )
    }

    fn host(&self) -> HostKernel {
        let shape = self.shape;
        let scale = self.scale;
        HostKernel::new(move |inv, gid| {
            let (pos, head) = (gid[0] as usize, gid[1] as usize);
            if pos >= shape.capacity || head >= shape.q_heads {
                return;
            }
            let len = seq_len(inv.load_u32(3, 0) as usize, shape.capacity);
            let idx = head * shape.capacity + pos;
            if pos >= len {
                inv.store_f32(2, idx, MASKED_SCORE);
                return;
            }
            let kv = shape.kv_head(head);
            let hd = shape.head_dim;
            let acc: f32 = (0..hd)
                .map(|d| inv.load_f32(0, head * hd + d) * inv.load_f32(1, (pos * shape.kv_heads + kv) * hd + d))
                .sum();
            inv.store_f32(2, idx, acc * scale);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d2(1, 1)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.shape.capacity, self.shape.q_heads, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
