//! Kernel operators.
//!
//! A [`Kernel`] describes one compute kernel: its ordered slot bindings, the
//! body of the generated source, a host rendition of the same body and its
//! dispatch geometry. [`KernelOperator`] wraps a kernel with the lazy
//! compile-once lifecycle.

use std::{fmt::Write as _, time::Instant};

use smallvec::SmallVec;
use vellum_instrumentation::{MetricEvent, record_metric};

use crate::{
    Foundry, FoundryError, backend::{BufferHandle, HostKernel, KernelSource, PipelineHandle}, kernel_registry::{KernelCacheKey, get_or_compile}, slot::{SlotClass, SlotGraph, SlotId}, types::{DispatchConfig, ThreadgroupSize}
};

/// A named slot in a kernel's parameter list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub name: &'static str,
    pub slot: SlotId,
}

impl Binding {
    pub const fn new(name: &'static str, slot: SlotId) -> Self {
        Self { name, slot }
    }
}

pub type Bindings = SmallVec<[Binding; 8]>;

pub trait Kernel {
    /// Family and shape variant; the variant also names the entry point.
    fn key(&self) -> KernelCacheKey;

    /// Slots in declaration order. Buffer-backed slots are numbered
    /// `[[buffer(i)]]` in the order they appear; scalar slots become constants.
    fn bindings(&self) -> Bindings;

    /// Statements of the kernel body. `gid` is the `uint3` thread position.
    fn body(&self) -> String;

    /// Host rendition of [`Kernel::body`]; reads bindings by buffer index.
    fn host(&self) -> HostKernel;

    fn threadgroup(&self) -> ThreadgroupSize;

    /// Threads needed along each axis for the current call.
    fn extent(&self) -> (usize, usize, usize);
}

/// Emit the full source for `kernel` against the current slot graph.
pub fn generate_source<K: Kernel + ?Sized>(kernel: &K, slots: &SlotGraph) -> Result<KernelSource, FoundryError> {
    let entry = kernel.key().entry_name();
    let mut constants = String::new();
    let mut params: Vec<String> = Vec::new();

    for binding in kernel.bindings() {
        let dtype = slots.dtype(binding.slot)?;
        match slots.class(binding.slot)? {
            SlotClass::Scalar => {
                let value = slots
                    .scalar_value(binding.slot)?
                    .ok_or_else(|| FoundryError::UnboundSlot(slots.name(binding.slot).to_string()))?;
                let _ = writeln!(constants, "constant {} {} = {};", dtype.msl_type(), binding.name, value.literal());
            }
            SlotClass::Uniform if slots.declared_count(binding.slot)? <= 1 => {
                params.push(format!("constant {}& {} [[buffer({})]]", dtype.msl_type(), binding.name, params.len()));
            }
            SlotClass::Uniform => {
                params.push(format!("constant {}* {} [[buffer({})]]", dtype.msl_type(), binding.name, params.len()));
            }
            SlotClass::Storage => {
                params.push(format!("device {}* {} [[buffer({})]]", dtype.msl_type(), binding.name, params.len()));
            }
        }
    }
    params.push("uint3 gid [[thread_position_in_grid]]".to_string());

    let mut text = String::from("#include <metal_stdlib>\nusing namespace metal;\n\n");
    if !constants.is_empty() {
        text.push_str(&constants);
        text.push('\n');
    }
    let _ = writeln!(text, "kernel void {entry}(");
    text.push_str(
        &params
            .iter()
            .map(|p| format!("    {p}"))
            .collect::<Vec<_>>()
            .join(",\n"),
    );
    text.push_str(") {\n");
    for line in kernel.body().lines() {
        if line.trim().is_empty() {
            text.push('\n');
        } else {
            let _ = writeln!(text, "    {}", line.trim_end());
        }
    }
    text.push_str("}\n");

    Ok(KernelSource { entry, text })
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum OperatorState {
    Unbuilt,
    Compiled { pipeline: PipelineHandle },
}

/// A kernel bound to fixed slots, compiled on its first [`compute`](Self::compute).
pub struct KernelOperator<K> {
    kernel: K,
    state: OperatorState,
}

impl<K: Kernel> KernelOperator<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            state: OperatorState::Unbuilt,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, OperatorState::Compiled { .. })
    }

    pub fn source(&self, foundry: &Foundry) -> Result<KernelSource, FoundryError> {
        generate_source(&self.kernel, foundry.slots())
    }

    fn pipeline(&mut self, foundry: &Foundry) -> Result<PipelineHandle, FoundryError> {
        if let OperatorState::Compiled { pipeline } = self.state {
            return Ok(pipeline);
        }
        let key = self.kernel.key();
        let source = self.source(foundry)?;
        let artifact = get_or_compile(
            foundry.kernel_cache(),
            foundry.backend().as_ref(),
            &key.family,
            &source,
            foundry.config().dump_kernel_source_dir.as_deref(),
        )?;
        let pipeline = foundry.backend().build_pipeline(artifact, &source.entry, &self.kernel.host())?;
        self.state = OperatorState::Compiled { pipeline };
        Ok(pipeline)
    }

    /// Compile if needed, then dispatch with a grid derived from the current extent.
    pub fn compute(&mut self, foundry: &Foundry) -> Result<(), FoundryError> {
        let pipeline = self.pipeline(foundry)?;
        let slots = foundry.slots();
        let buffers = self
            .kernel
            .bindings()
            .iter()
            .filter(|b| !matches!(slots.class(b.slot), Ok(SlotClass::Scalar)))
            .map(|b| slots.resolve(b.slot))
            .collect::<Result<SmallVec<[BufferHandle; 8]>, _>>()?;

        let config = DispatchConfig::covering(self.kernel.extent(), self.kernel.threadgroup());
        if config.grid.is_empty() {
            return Ok(());
        }
        if foundry.debug_kernel_bindings_enabled() {
            self.log_bindings(slots, &buffers, config);
        }

        let started = Instant::now();
        foundry.backend().dispatch(pipeline, &buffers, config)?;
        record_metric!(MetricEvent::KernelDispatched {
            kernel: self.kernel.key().to_string(),
            backend: foundry.backend().name().to_string(),
            grid: config.grid_tuple(),
            threadgroup: config.group_tuple(),
            duration_us: started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64,
        });
        Ok(())
    }

    fn log_bindings(&self, slots: &SlotGraph, buffers: &[BufferHandle], config: DispatchConfig) {
        let key = self.kernel.key();
        tracing::debug!(
            kernel = %key,
            grid_x = config.grid.width,
            grid_y = config.grid.height,
            grid_z = config.grid.depth,
            group_x = config.group.width,
            group_y = config.group.height,
            group_z = config.group.depth,
            "kernel binding debug begin"
        );
        let mut index = 0;
        for binding in self.kernel.bindings() {
            match slots.scalar_value(binding.slot) {
                Ok(Some(value)) => {
                    tracing::debug!(kernel = %key, arg = binding.name, value = ?value, "kernel binding (constant)");
                }
                _ => {
                    tracing::debug!(
                        kernel = %key,
                        buffer = index,
                        arg = binding.name,
                        slot = slots.name(binding.slot),
                        handle = %buffers.get(index).map_or_else(|| "?".to_string(), ToString::to_string),
                        count = slots.count(binding.slot).unwrap_or(0),
                        "kernel binding"
                    );
                    index += 1;
                }
            }
        }
        tracing::debug!(kernel = %key, "kernel binding debug end");
    }
}

#[cfg(test)]
#[path = "kernel.test.rs"]
mod tests;
