//! Rotary position embedding over adjacent pairs.
//!
//! Pair `(2i, 2i+1)` of every head is rotated by `theta = freq[i] * position`.
//! Pairs at or beyond the rotary width pass through. In cache mode the input is
//! a `[capacity, heads, head_dim]` cache; only row `position mod capacity` is
//! rotated and earlier rows are copied unchanged.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::{seq_len, shape_constant}, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

/// Per-pair inverse frequencies: `freq[i] = base^(-i / pairs)`.
pub fn inverse_frequencies(rope_dims: usize, base: f32) -> Vec<f32> {
    let pairs = (rope_dims / 2).max(1);
    (0..rope_dims / 2)
        .map(|i| 1.0 / base.powf(i as f32 / pairs as f32))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RopeShape {
    pub heads: usize,
    pub head_dim: usize,
    /// Rotated dimensions per head; `<= head_dim`.
    pub rope_dims: usize,
    /// Cache rows, or `None` for a single activation row.
    pub capacity: Option<usize>,
}

pub struct Rope {
    pub input: SlotId,
    /// `[rope_dims / 2]` frequencies.
    pub freqs: SlotId,
    pub output: SlotId,
    pub position: SlotId,
    consts: [SlotId; 5],
    shape: RopeShape,
    current: usize,
}

impl Rope {
    /// `input` of `None` allocates a fresh input slot; `Some(slot)` rotates that
    /// slot in place.
    pub fn new(
        slots: &mut SlotGraph,
        prefix: &str,
        in_place: Option<SlotId>,
        freqs: SlotId,
        position: SlotId,
        shape: RopeShape,
    ) -> Result<KernelOperator<Self>, FoundryError> {
        let RopeShape {
            heads,
            head_dim,
            rope_dims,
            capacity,
        } = shape;
        if head_dim % 2 != 0 || rope_dims % 2 != 0 || rope_dims > head_dim {
            return Err(FoundryError::InvalidOperation(format!(
                "{prefix}: rotary dims {rope_dims} must be even and fit head_dim {head_dim}"
            )));
        }
        if slots.count(freqs)? < rope_dims / 2 {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(freqs).to_string(),
                expected: vec![rope_dims / 2],
                actual: vec![slots.count(freqs)?],
            });
        }
        let rows = capacity.unwrap_or(1);
        let len = rows * heads * head_dim;
        let (input, output) = match in_place {
            Some(slot) => (slot, slot),
            None => (
                slots.storage::<f32>(format!("{prefix}.in"), len)?,
                slots.storage::<f32>(format!("{prefix}.out"), len)?,
            ),
        };
        if slots.count(input)? < len {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(input).to_string(),
                expected: vec![rows, heads, head_dim],
                actual: vec![slots.count(input)?],
            });
        }
        Ok(KernelOperator::new(Self {
            input,
            freqs,
            output,
            position,
            consts: [
                shape_constant(slots, prefix, "rows", rows)?,
                shape_constant(slots, prefix, "heads", heads)?,
                shape_constant(slots, prefix, "head_dim", head_dim)?,
                shape_constant(slots, prefix, "rope_pairs", rope_dims / 2)?,
                shape_constant(slots, prefix, "cache_mode", usize::from(capacity.is_some()))?,
            ],
            shape,
            current: 0,
        }))
    }

    /// Position used to size the next dispatch; must match the position uniform.
    pub fn set_position(&mut self, position: usize) {
        self.current = position;
    }
}

impl Kernel for Rope {
    fn key(&self) -> KernelCacheKey {
        let mode = self.shape.capacity.map_or_else(|| "row".to_string(), |c| format!("cache{c}"));
        kernel_cache_key!("rope", "h{}_d{}_r{}_{}", self.shape.heads, self.shape.head_dim, self.shape.rope_dims, mode)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("input", self.input),
            Binding::new("freqs", self.freqs),
            Binding::new("out", self.output),
            Binding::new("position", self.position),
            Binding::new("rows", self.consts[0]),
            Binding::new("heads", self.consts[1]),
            Binding::new("head_dim", self.consts[2]),
            Binding::new("rope_pairs", self.consts[3]),
            Binding::new("cache_mode", self.consts[4]),
        ]
    }

    fn body(&self) -> String {
        r#"uint row = gid.x;
uint head = gid.y;
uint pair = gid.z;
if (row >= rows || head >= heads || pair >= head_dim / 2u) return;
uint active_row = cache_mode != 0u ? position % rows : row;
if (row > active_row) return;
uint base = (row * heads + head) * head_dim + 2u * pair;
float a = input[base];
float b = input[base + 1u];
if (row < active_row || pair >= rope_pairs) {
    out[base] = a;
    out[base + 1u] = b;
    return;
}
float theta = freqs[pair] * float(position);
float c = cos(theta);
float s = sin(theta);
out[base] = c * a - s * b;
out[base + 1u] = s * a + c * b;"#
            .to_string()
    }

    fn host(&self) -> HostKernel {
        let RopeShape {
            heads,
            head_dim,
            rope_dims,
            capacity,
        } = self.shape;
        let rows = capacity.unwrap_or(1);
        HostKernel::new(move |inv, gid| {
            let (row, head, pair) = (gid[0] as usize, gid[1] as usize, gid[2] as usize);
            if row >= rows || head >= heads || pair >= head_dim / 2 {
                return;
            }
            let position = inv.load_u32(3, 0);
            let active_row = if capacity.is_some() { position as usize % rows } else { row };
            if row > active_row {
                return;
            }
            let base = (row * heads + head) * head_dim + 2 * pair;
            let a = inv.load_f32(0, base);
            let b = inv.load_f32(0, base + 1);
            if row < active_row || pair >= rope_dims / 2 {
                inv.store_f32(2, base, a);
                inv.store_f32(2, base + 1, b);
                return;
            }
            let theta = inv.load_f32(1, pair) * position as f32;
            let (s, c) = theta.sin_cos();
            inv.store_f32(2, base, c * a - s * b);
            inv.store_f32(2, base + 1, s * a + c * b);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::new(8, 4, 32)
    }

    fn extent(&self) -> (usize, usize, usize) {
        let rows = self.shape.capacity.map_or(1, |c| seq_len(self.current, c));
        (rows, self.shape.heads, self.shape.head_dim / 2)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
