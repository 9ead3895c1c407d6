//! Element-wise product of two vectors.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::shape_constant, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct ElementwiseMul {
    pub lhs: SlotId,
    pub rhs: SlotId,
    pub output: SlotId,
    len_const: SlotId,
    len: usize,
}

impl ElementwiseMul {
    pub fn new(slots: &mut SlotGraph, prefix: &str, len: usize) -> Result<KernelOperator<Self>, FoundryError> {
        Ok(KernelOperator::new(Self {
            lhs: slots.storage::<f32>(format!("{prefix}.lhs"), len)?,
            rhs: slots.storage::<f32>(format!("{prefix}.rhs"), len)?,
            output: slots.storage::<f32>(format!("{prefix}.out"), len)?,
            len_const: shape_constant(slots, prefix, "len", len)?,
            len,
        }))
    }
}

impl Kernel for ElementwiseMul {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("elementwise_mul", "n{}", self.len)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("lhs", self.lhs),
            Binding::new("rhs", self.rhs),
            Binding::new("out", self.output),
            Binding::new("len", self.len_const),
        ]
    }

    fn body(&self) -> String {
        "uint i = gid.x;\nif (i >= len) return;\nout[i] = lhs[i] * rhs[i];".to_string()
    }

    fn host(&self) -> HostKernel {
        let len = self.len;
        HostKernel::new(move |inv, gid| {
            let i = gid[0] as usize;
            if i < len {
                let v = inv.load_f32(0, i) * inv.load_f32(1, i);
                inv.store_f32(2, i, v);
            }
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d1(32)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.len, 1, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
