//! Token embedding lookup: copies row `token` of the table into the output.
//!
//! Ids are range-checked by the caller; the kernel writes zeros for an id past
//! the table instead of reading out of bounds.

use smallvec::smallvec;

use crate::{
    FoundryError, backend::HostKernel, kernel::{Binding, Bindings, Kernel, KernelOperator}, kernel_cache_key, kernel_registry::KernelCacheKey, metals::shape_constant, slot::{SlotGraph, SlotId}, types::ThreadgroupSize
};

pub struct Embedding {
    /// Uniform holding the token id.
    pub token: SlotId,
    /// `[vocab, width]` table.
    pub table: SlotId,
    /// `[width]` output.
    pub output: SlotId,
    width_const: SlotId,
    vocab_const: SlotId,
    width: usize,
    vocab: usize,
}

impl Embedding {
    pub fn new(slots: &mut SlotGraph, prefix: &str, table: SlotId, vocab: usize, width: usize) -> Result<KernelOperator<Self>, FoundryError> {
        let table_len = slots.count(table)?;
        if table_len < vocab * width {
            return Err(FoundryError::ShapeMismatch {
                name: slots.name(table).to_string(),
                expected: vec![vocab, width],
                actual: vec![table_len],
            });
        }
        Ok(KernelOperator::new(Self {
            token: slots.uniform::<u32>(format!("{prefix}.token"), 1)?,
            table,
            output: slots.storage::<f32>(format!("{prefix}.out"), width)?,
            width_const: shape_constant(slots, prefix, "width", width)?,
            vocab_const: shape_constant(slots, prefix, "vocab", vocab)?,
            width,
            vocab,
        }))
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }
}

impl Kernel for Embedding {
    fn key(&self) -> KernelCacheKey {
        kernel_cache_key!("embedding", "v{}_w{}", self.vocab, self.width)
    }

    fn bindings(&self) -> Bindings {
        smallvec![
            Binding::new("token", self.token),
            Binding::new("table", self.table),
            Binding::new("out", self.output),
            Binding::new("width", self.width_const),
            Binding::new("vocab", self.vocab_const),
        ]
    }

    fn body(&self) -> String {
        r#"uint d = gid.x;
if (d >= width) return;
out[d] = token < vocab ? table[token * width + d] : 0.0f;"#
            .to_string()
    }

    fn host(&self) -> HostKernel {
        let (width, vocab) = (self.width, self.vocab);
        HostKernel::new(move |inv, gid| {
            let d = gid[0] as usize;
            if d >= width {
                return;
            }
            let token = inv.load_u32(0, 0) as usize;
            let v = if token < vocab { inv.load_f32(1, token * width + d) } else { 0.0 };
            inv.store_f32(2, d, v);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d1(256)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.width, 1, 1)
    }
}

#[cfg(test)]
#[path = "mod.test.rs"]
mod tests;
