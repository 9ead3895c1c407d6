//! Reference executor that runs kernels on the calling thread.
//!
//! "Compilation" only checks that the generated source declares the entry
//! point; execution uses the operator's [`HostKernel`]. Buffers are plain byte
//! vectors, and both residencies behave the same except that device-local
//! buffers refuse host mapping, so staging paths are exercised exactly as on a GPU.

use std::sync::{
    Mutex, MutexGuard, PoisonError, atomic::{AtomicU64, Ordering}
};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{ArtifactHandle, Backend, BufferHandle, HostKernel, KernelSource, PipelineHandle, Residency, check_range};
use crate::{FoundryError, types::DispatchConfig};

struct HostBuffer {
    residency: Residency,
    data: Vec<u8>,
}

#[derive(Default)]
struct HostState {
    buffers: FxHashMap<u64, HostBuffer>,
    artifacts: FxHashMap<u64, String>,
    pipelines: FxHashMap<u64, HostKernel>,
}

#[derive(Default)]
pub struct HostBackend {
    state: Mutex<HostState>,
    next_id: AtomicU64,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of live buffers; used to check that rebinding frees storage.
    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn live_artifacts(&self) -> usize {
        self.lock().artifacts.len()
    }
}

impl Backend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn allocate(&self, bytes: usize, residency: Residency) -> Result<BufferHandle, FoundryError> {
        let id = self.next();
        self.lock().buffers.insert(
            id,
            HostBuffer {
                residency,
                data: vec![0u8; bytes],
            },
        );
        Ok(BufferHandle(id))
    }

    fn release(&self, buffer: BufferHandle) {
        self.lock().buffers.remove(&buffer.0);
    }

    fn residency(&self, buffer: BufferHandle) -> Result<Residency, FoundryError> {
        self.lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.residency)
            .ok_or(FoundryError::UnknownBuffer(buffer.0))
    }

    fn buffer_len(&self, buffer: BufferHandle) -> Result<usize, FoundryError> {
        self.lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.len())
            .ok_or(FoundryError::UnknownBuffer(buffer.0))
    }

    fn write(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<(), FoundryError> {
        let mut state = self.lock();
        let target = state.buffers.get_mut(&buffer.0).ok_or(FoundryError::UnknownBuffer(buffer.0))?;
        if target.residency != Residency::HostVisible {
            return Err(FoundryError::NotHostVisible(buffer.0));
        }
        check_range(offset, data.len(), target.data.len())?;
        target.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, buffer: BufferHandle, offset: usize, out: &mut [u8]) -> Result<(), FoundryError> {
        let state = self.lock();
        let source = state.buffers.get(&buffer.0).ok_or(FoundryError::UnknownBuffer(buffer.0))?;
        if source.residency != Residency::HostVisible {
            return Err(FoundryError::NotHostVisible(buffer.0));
        }
        check_range(offset, out.len(), source.data.len())?;
        out.copy_from_slice(&source.data[offset..offset + out.len()]);
        Ok(())
    }

    fn copy(&self, src: BufferHandle, src_offset: usize, dst: BufferHandle, dst_offset: usize, bytes: usize) -> Result<(), FoundryError> {
        let mut state = self.lock();
        let source = state.buffers.get(&src.0).ok_or(FoundryError::UnknownBuffer(src.0))?;
        check_range(src_offset, bytes, source.data.len())?;
        let chunk = source.data[src_offset..src_offset + bytes].to_vec();
        let target = state.buffers.get_mut(&dst.0).ok_or(FoundryError::UnknownBuffer(dst.0))?;
        check_range(dst_offset, bytes, target.data.len())?;
        target.data[dst_offset..dst_offset + bytes].copy_from_slice(&chunk);
        Ok(())
    }

    fn compile(&self, source: &KernelSource) -> Result<ArtifactHandle, FoundryError> {
        let signature = format!("kernel void {}(", source.entry);
        if !source.text.contains(&signature) {
            return Err(FoundryError::LibraryCompilationFailed(format!(
                "entry point '{}' is not declared in the generated source",
                source.entry
            )));
        }
        let opens = source.text.matches('{').count();
        let closes = source.text.matches('}').count();
        if opens != closes {
            return Err(FoundryError::LibraryCompilationFailed(format!(
                "unbalanced braces in '{}' ({opens} open, {closes} close)",
                source.entry
            )));
        }
        let id = self.next();
        self.lock().artifacts.insert(id, source.entry.clone());
        Ok(ArtifactHandle(id))
    }

    fn release_artifact(&self, artifact: ArtifactHandle) {
        self.lock().artifacts.remove(&artifact.0);
    }

    fn build_pipeline(&self, artifact: ArtifactHandle, entry: &str, host: &HostKernel) -> Result<PipelineHandle, FoundryError> {
        let mut state = self.lock();
        match state.artifacts.get(&artifact.0) {
            Some(compiled) if compiled == entry => {}
            Some(compiled) => {
                return Err(FoundryError::PipelineCreationFailed(format!(
                    "artifact defines '{compiled}', not '{entry}'"
                )));
            }
            None => return Err(FoundryError::PipelineCreationFailed(format!("unknown artifact for '{entry}'"))),
        }
        let id = self.next();
        state.pipelines.insert(id, host.clone());
        Ok(PipelineHandle(id))
    }

    fn dispatch(&self, pipeline: PipelineHandle, bindings: &[BufferHandle], config: DispatchConfig) -> Result<(), FoundryError> {
        let mut state = self.lock();
        let kernel = state
            .pipelines
            .get(&pipeline.0)
            .cloned()
            .ok_or_else(|| FoundryError::InvalidOperation(format!("unknown pipeline {}", pipeline.0)))?;

        // Several bindings may alias one buffer (in-place kernels); check each out once.
        let mut unique: SmallVec<[u64; 8]> = SmallVec::new();
        let mut slots: SmallVec<[usize; 8]> = SmallVec::with_capacity(bindings.len());
        for handle in bindings {
            let index = match unique.iter().position(|&id| id == handle.0) {
                Some(index) => index,
                None => {
                    if !state.buffers.contains_key(&handle.0) {
                        return Err(FoundryError::UnknownBuffer(handle.0));
                    }
                    unique.push(handle.0);
                    unique.len() - 1
                }
            };
            slots.push(index);
        }

        let mut taken: Vec<HostBuffer> = Vec::with_capacity(unique.len());
        for id in &unique {
            if let Some(buffer) = state.buffers.remove(id) {
                taken.push(buffer);
            }
        }
        let mut data: Vec<Vec<u8>> = taken.iter_mut().map(|b| std::mem::take(&mut b.data)).collect();

        let (tx, ty, tz) = config.threads();
        {
            let mut invocation = HostInvocation {
                buffers: &mut data,
                slots: &slots,
            };
            for z in 0..tz {
                for y in 0..ty {
                    for x in 0..tx {
                        kernel.run(&mut invocation, [x as u32, y as u32, z as u32]);
                    }
                }
            }
        }

        for ((id, mut buffer), bytes) in unique.iter().zip(taken).zip(data) {
            buffer.data = bytes;
            state.buffers.insert(*id, buffer);
        }
        Ok(())
    }
}

/// Buffer access for one host kernel invocation, addressed by binding index.
///
/// Accesses outside a buffer read as zero and writes are dropped, matching
/// robust buffer access on a device.
pub struct HostInvocation<'a> {
    buffers: &'a mut [Vec<u8>],
    slots: &'a [usize],
}

impl HostInvocation<'_> {
    fn lane(&self, binding: usize, index: usize) -> Option<[u8; 4]> {
        let buffer = self.buffers.get(*self.slots.get(binding)?)?;
        let start = index.checked_mul(4)?;
        let bytes = buffer.get(start..start + 4)?;
        let mut lane = [0u8; 4];
        lane.copy_from_slice(bytes);
        Some(lane)
    }

    fn store_lane(&mut self, binding: usize, index: usize, lane: [u8; 4]) {
        let Some(&slot) = self.slots.get(binding) else {
            return;
        };
        let Some(start) = index.checked_mul(4) else {
            return;
        };
        if let Some(bytes) = self.buffers.get_mut(slot).and_then(|b| b.get_mut(start..start + 4)) {
            bytes.copy_from_slice(&lane);
        }
    }

    pub fn load_f32(&self, binding: usize, index: usize) -> f32 {
        self.lane(binding, index).map_or(0.0, f32::from_le_bytes)
    }

    pub fn load_u32(&self, binding: usize, index: usize) -> u32 {
        self.lane(binding, index).map_or(0, u32::from_le_bytes)
    }

    pub fn store_f32(&mut self, binding: usize, index: usize, value: f32) {
        self.store_lane(binding, index, value.to_le_bytes());
    }

    pub fn store_u32(&mut self, binding: usize, index: usize, value: u32) {
        self.store_lane(binding, index, value.to_le_bytes());
    }

    /// Number of 32-bit lanes in the buffer at `binding`.
    pub fn lanes(&self, binding: usize) -> usize {
        self.slots
            .get(binding)
            .and_then(|&slot| self.buffers.get(slot))
            .map_or(0, |b| b.len() / 4)
    }
}

#[cfg(test)]
#[path = "host.test.rs"]
mod tests;
