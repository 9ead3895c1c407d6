//! Matrix multiply against a `[out, in]` weight: `out[i, j] = sum_k in[i, k] * W[j, k]`.
//!
//! With a cache capacity the result is written into row `position mod capacity`
//! of a `[capacity, out]` buffer instead, which is how projections feed the
//! rotating key/value caches.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::shape_constant, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct MatMul {
    /// `[rows, in]` activations.
    pub input: SlotId,
    pub weight: SlotId,
    /// `[rows, out]`, or `[capacity, out]` in cache mode.
    pub output: SlotId,
    /// Position uniform; only bound in cache mode.
    pub position: Option<SlotId>,
    consts: [SlotId; 4],
    rows: usize,
    in_features: usize,
    out_features: usize,
    capacity: usize,
}

impl MatMul {
    pub fn new(slots: &mut SlotGraph, prefix: &str, weight: SlotId, in_features: usize, out_features: usize) -> Result<KernelOperator<Self>, FoundryError> {
        Self::build(slots, prefix, weight, in_features, out_features, None)
    }

    /// Projection writing into a rotating `[capacity, out]` cache.
    pub fn cached(
        slots: &mut SlotGraph,
        prefix: &str,
        weight: SlotId,
        in_features: usize,
        out_features: usize,
        capacity: usize,
        position: SlotId,
    ) -> Result<KernelOperator<Self>, FoundryError> {
        if capacity == 0 {
            return Err(FoundryError::InvalidOperation(format!("{prefix}: cache capacity must be positive")));
        }
        Self::build(slots, prefix, weight, in_features, out_features, Some((capacity, position)))
    }

    fn build(
        slots: &mut SlotGraph,
        prefix: &str,
        weight: SlotId,
        in_features: usize,
        out_features: usize,
        cache: Option<(usize, SlotId)>,
    ) -> Result<KernelOperator<Self>, FoundryError> {
        let weight_len = slots.count(weight)?;
        if weight_len != in_features * out_features {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(weight).to_string(),
                expected: vec![out_features, in_features],
                actual: vec![weight_len],
            });
        }
        let rows = 1;
        let capacity = cache.map_or(0, |(c, _)| c);
        let output_rows = if capacity > 0 { capacity } else { rows };
        Ok(KernelOperator::new(Self {
            input: slots.storage::<f32>(format!("{prefix}.in"), rows * in_features)?,
            weight,
            output: slots.storage::<f32>(format!("{prefix}.out"), output_rows * out_features)?,
            position: cache.map(|(_, p)| p),
            consts: [
                shape_constant(slots, prefix, "rows", rows)?,
                shape_constant(slots, prefix, "in_features", in_features)?,
                shape_constant(slots, prefix, "out_features", out_features)?,
                shape_constant(slots, prefix, "capacity", capacity)?,
            ],
            rows,
            in_features,
            out_features,
            capacity,
        }))
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Kernel for MatMul {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("matmul", "r{}_i{}_o{}_c{}", self.rows, self.in_features, self.out_features, self.capacity)
    }

    fn bindings(&self) -> Bindings {
        let mut bindings: Bindings = smallvec![
            Binding::new("input", self.input),
            Binding::new("weight", self.weight),
            Binding::new("out", self.output),
        ];
        if let Some(position) = self.position {
            bindings.push(Binding::new("position", position));
        }
        bindings.extend([
            Binding::new("rows", self.consts[0]),
            Binding::new("in_features", self.consts[1]),
            Binding::new("out_features", self.consts[2]),
            Binding::new("capacity", self.consts[3]),
        ]);
        bindings
    }

    fn body(&self) -> String {
        let dst_row = if self.position.is_some() {
            "(position + row) % capacity"
        } else {
            "row"
        };
        format!(
            r#"uint row = gid.x;
uint col = gid.y;
if (row >= rows || col >= out_features) return;
float acc = 0.0f;
for (uint k = 0; k < in_features; ++k) {{
    acc += input[row * in_features + k] * weight[col * in_features + k];
}}
uint dst_row = {dst_row};
out[dst_row * out_features + col] = acc;"#
        )
    }

    fn host(&self) -> HostKernel {
        let (rows, in_f, out_f, capacity) = (self.rows, self.in_features, self.out_features, self.capacity);
        let cached = self.position.is_some();
        HostKernel::new(move |inv, gid| {
            let (row, col) = (gid[0] as usize, gid[1] as usize);
            if row >= rows || col >= out_f {
                return;
            }
            let mut acc = 0.0f32;
            for k in 0..in_f {
                acc += inv.load_f32(0, row * in_f + k) * inv.load_f32(1, col * in_f + k);
            }
            let dst_row = if cached { (inv.load_u32(3, 0) as usize + row) % capacity } else { row };
            inv.store_f32(2, dst_row * out_f + col, acc);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d2(4, 64)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.rows, self.out_features, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
