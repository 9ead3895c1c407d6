//! SiLU activation: `out[i] = x / (1 + exp(-x))`.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::shape_constant, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct Silu {
    pub input: SlotId,
    pub output: SlotId,
    len_const: SlotId,
    len: usize,
}

impl Silu {
    pub fn new(slots: &mut SlotGraph, prefix: &str, len: usize) -> Result<KernelOperator<Self>, FoundryError> {
        Ok(KernelOperator::new(Self {
            input: slots.storage::<f32>(format!("{prefix}.in"), len)?,
            output: slots.storage::<f32>(format!("{prefix}.out"), len)?,
            len_const: shape_constant(slots, prefix, "len", len)?,
            len,
        }))
    }
}

pub(crate) fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

impl Kernel for Silu {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("silu", "n{}", self.len)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("input", self.input),
            Binding::new("out", self.output),
            Binding::new("len", self.len_const),
        ]
    }

    fn body(&self) -> String {
        "uint i = gid.x;\nif (i >= len) return;\nfloat x = input[i];\nout[i] = x / (1.0f + exp(-x));".to_string()
    }

    fn host(&self) -> HostKernel {
        let len = self.len;
        HostKernel::new(move |inv, gid| {
            let i = gid[0] as usize;
            if i < len {
                let v = silu(inv.load_f32(0, i));
                inv.store_f32(1, i, v);
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
