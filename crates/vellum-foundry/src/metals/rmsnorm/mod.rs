//! RMS normalization: `out[i] = in[i] / sqrt(mean(in^2) + eps) * gain[i]`.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::shape_constant, slot::{ScalarValue, SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct RmsNorm {
    pub input: SlotId,
    pub gain: SlotId,
    pub output: SlotId,
    len_const: SlotId,
    eps_const: SlotId,
    len: usize,
    eps: f32,
}

impl RmsNorm {
    pub fn new(slots: &mut SlotGraph, prefix: &str, gain: SlotId, len: usize, eps: f32) -> Result<KernelOperator<Self>, FoundryError> {
        let gain_len = slots.count(gain)?;
        if gain_len != len {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(gain).to_string(),
                expected: vec![len],
                actual: vec![gain_len],
            });
        }
        Ok(KernelOperator::new(Self {
            input: slots.storage::<f32>(format!("{prefix}.in"), len)?,
            gain,
            output: slots.storage::<f32>(format!("{prefix}.out"), len)?,
            len_const: shape_constant(slots, prefix, "len", len)?,
            eps_const: slots.scalar(format!("{prefix}.eps"), ScalarValue::F32(eps)),
            len,
            eps,
        }))
    }
}

impl Kernel for RmsNorm {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("rmsnorm", "n{}", self.len)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("input", self.input),
            Binding::new("gain", self.gain),
            Binding::new("out", self.output),
            Binding::new("len", self.len_const),
            Binding::new("eps", self.eps_const),
        ]
    }

    fn body(&self) -> String {
        r#"uint i = gid.x;
if (i >= len) return;
float sum_sq = 0.0f;
for (uint k = 0; k < len; ++k) {
    sum_sq += input[k] * input[k];
}
float inv_rms = rsqrt(sum_sq / float(len) + eps);
out[i] = input[i] * inv_rms * gain[i];"#
            .to_string()
    }

    fn host(&self) -> HostKernel {
        let (len, eps) = (self.len, self.eps);
        HostKernel::new(move |inv, gid| {
            let i = gid[0] as usize;
            if i >= len {
                return;
            }
            let sum_sq: f32 = (0..len).map(|k| inv.load_f32(0, k).powi(2)).sum();
            let inv_rms = 1.0 / (sum_sq / len as f32 + eps).sqrt();
            let v = inv.load_f32(0, i) * inv_rms * inv.load_f32(1, i);
            inv.store_f32(2, i, v);
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
