//! Metal device backend.
//!
//! Device-local buffers use `StorageModePrivate`, host-visible ones
//! `StorageModeShared`. Every copy and dispatch gets its own command buffer
//! which is committed and waited on before returning.

use std::sync::{
    Mutex, MutexGuard, PoisonError, atomic::{AtomicU64, Ordering}
};

use objc2::{rc::Retained, runtime::ProtocolObject};
use objc2_foundation::NSString;
use objc2_metal::{
    MTLBlitCommandEncoder, MTLBuffer, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue, MTLComputeCommandEncoder, MTLComputePipelineState, MTLDevice, MTLLibrary, MTLResourceOptions
};
use rustc_hash::FxHashMap;

use super::{ArtifactHandle, Backend, BufferHandle, HostKernel, KernelSource, PipelineHandle, Residency, check_range};
use crate::{FoundryError, types::DispatchConfig};

#[derive(Clone, Debug)]
struct MetalDevice(Retained<ProtocolObject<dyn MTLDevice>>);

#[derive(Clone, Debug)]
struct MetalQueue(Retained<ProtocolObject<dyn MTLCommandQueue>>);

#[derive(Clone, Debug)]
struct MetalBuffer {
    raw: Retained<ProtocolObject<dyn MTLBuffer>>,
    residency: Residency,
}

#[derive(Clone, Debug)]
struct MetalLibrary(Retained<ProtocolObject<dyn MTLLibrary>>);

#[derive(Clone, Debug)]
struct MetalPipeline(Retained<ProtocolObject<dyn MTLComputePipelineState>>);

unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}
unsafe impl Send for MetalQueue {}
unsafe impl Sync for MetalQueue {}
unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}
unsafe impl Send for MetalLibrary {}
unsafe impl Sync for MetalLibrary {}
unsafe impl Send for MetalPipeline {}
unsafe impl Sync for MetalPipeline {}

#[derive(Default)]
struct MetalState {
    buffers: FxHashMap<u64, MetalBuffer>,
    libraries: FxHashMap<u64, MetalLibrary>,
    pipelines: FxHashMap<u64, MetalPipeline>,
}

pub struct MetalBackend {
    device: MetalDevice,
    queue: MetalQueue,
    state: Mutex<MetalState>,
    next_id: AtomicU64,
}

impl MetalBackend {
    pub fn system_default() -> Result<Self, FoundryError> {
        let device = objc2_metal::MTLCreateSystemDefaultDevice()
            .map(MetalDevice)
            .ok_or(FoundryError::DeviceNotFound("metal"))?;
        let queue = device
            .0
            .newCommandQueue()
            .map(MetalQueue)
            .ok_or_else(|| FoundryError::SubmissionFailed("command queue creation failed".to_string()))?;
        tracing::info!(device = %device.0.name(), "metal backend ready");
        Ok(Self {
            device,
            queue,
            state: Mutex::new(MetalState::default()),
            next_id: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MetalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn buffer(&self, handle: BufferHandle) -> Result<MetalBuffer, FoundryError> {
        self.lock().buffers.get(&handle.0).cloned().ok_or(FoundryError::UnknownBuffer(handle.0))
    }

    fn host_buffer(&self, handle: BufferHandle) -> Result<MetalBuffer, FoundryError> {
        let buffer = self.buffer(handle)?;
        if buffer.residency != Residency::HostVisible {
            return Err(FoundryError::NotHostVisible(handle.0));
        }
        Ok(buffer)
    }

    fn command_buffer(&self) -> Result<Retained<ProtocolObject<dyn MTLCommandBuffer>>, FoundryError> {
        self.queue
            .0
            .commandBuffer()
            .ok_or_else(|| FoundryError::SubmissionFailed("command buffer creation failed".to_string()))
    }
}

impl Backend for MetalBackend {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn allocate(&self, bytes: usize, residency: Residency) -> Result<BufferHandle, FoundryError> {
        let options = match residency {
            Residency::DeviceLocal => MTLResourceOptions::StorageModePrivate,
            Residency::HostVisible => MTLResourceOptions::StorageModeShared,
        };
        // Zero-length buffers are not allowed by Metal.
        let raw = self
            .device
            .0
            .newBufferWithLength_options(bytes.max(4), options)
            .ok_or(FoundryError::BufferCreationFailed(bytes))?;
        let id = self.next();
        self.lock().buffers.insert(id, MetalBuffer { raw, residency });
        Ok(BufferHandle(id))
    }

    fn release(&self, buffer: BufferHandle) {
        self.lock().buffers.remove(&buffer.0);
    }

    fn residency(&self, buffer: BufferHandle) -> Result<Residency, FoundryError> {
        self.buffer(buffer).map(|b| b.residency)
    }

    fn buffer_len(&self, buffer: BufferHandle) -> Result<usize, FoundryError> {
        self.buffer(buffer).map(|b| b.raw.length())
    }

    fn write(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<(), FoundryError> {
        let target = self.host_buffer(buffer)?;
        check_range(offset, data.len(), target.raw.length())?;
        unsafe {
            let ptr = target.raw.contents().as_ptr() as *mut u8;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len());
        }
        Ok(())
    }

    fn read(&self, buffer: BufferHandle, offset: usize, out: &mut [u8]) -> Result<(), FoundryError> {
        let source = self.host_buffer(buffer)?;
        check_range(offset, out.len(), source.raw.length())?;
        unsafe {
            let ptr = source.raw.contents().as_ptr() as *const u8;
            std::ptr::copy_nonoverlapping(ptr.add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn copy(&self, src: BufferHandle, src_offset: usize, dst: BufferHandle, dst_offset: usize, bytes: usize) -> Result<(), FoundryError> {
        let source = self.buffer(src)?;
        let target = self.buffer(dst)?;
        check_range(src_offset, bytes, source.raw.length())?;
        check_range(dst_offset, bytes, target.raw.length())?;
        if bytes == 0 {
            return Ok(());
        }

        let cmd = self.command_buffer()?;
        let blit = cmd
            .blitCommandEncoder()
            .ok_or_else(|| FoundryError::SubmissionFailed("blit encoder creation failed".to_string()))?;
        unsafe {
            blit.copyFromBuffer_sourceOffset_toBuffer_destinationOffset_size(&source.raw, src_offset, &target.raw, dst_offset, bytes);
        }
        blit.endEncoding();
        cmd.commit();
        cmd.waitUntilCompleted();
        Ok(())
    }

    fn compile(&self, source: &KernelSource) -> Result<ArtifactHandle, FoundryError> {
        let ns_source = NSString::from_str(&source.text);
        let library = self
            .device
            .0
            .newLibraryWithSource_options_error(&ns_source, None)
            .map(MetalLibrary)
            .map_err(|e| FoundryError::LibraryCompilationFailed(format!("{}: {}", source.entry, e.localizedDescription())))?;
        let id = self.next();
        self.lock().libraries.insert(id, library);
        Ok(ArtifactHandle(id))
    }

    fn release_artifact(&self, artifact: ArtifactHandle) {
        self.lock().libraries.remove(&artifact.0);
    }

    fn build_pipeline(&self, artifact: ArtifactHandle, entry: &str, _host: &HostKernel) -> Result<PipelineHandle, FoundryError> {
        let library = self
            .lock()
            .libraries
            .get(&artifact.0)
            .cloned()
            .ok_or_else(|| FoundryError::PipelineCreationFailed(format!("unknown library for '{entry}'")))?;
        let function = library
            .0
            .newFunctionWithName(&NSString::from_str(entry))
            .ok_or_else(|| FoundryError::PipelineCreationFailed(format!("function '{entry}' not found")))?;
        let pipeline = self
            .device
            .0
            .newComputePipelineStateWithFunction_error(&function)
            .map(MetalPipeline)
            .map_err(|e| FoundryError::PipelineCreationFailed(format!("{entry}: {}", e.localizedDescription())))?;
        let id = self.next();
        self.lock().pipelines.insert(id, pipeline);
        Ok(PipelineHandle(id))
    }

    fn dispatch(&self, pipeline: PipelineHandle, bindings: &[BufferHandle], config: DispatchConfig) -> Result<(), FoundryError> {
        let pso = self
            .lock()
            .pipelines
            .get(&pipeline.0)
            .cloned()
            .ok_or_else(|| FoundryError::InvalidOperation(format!("unknown pipeline {}", pipeline.0)))?;
        let buffers = bindings.iter().map(|&h| self.buffer(h)).collect::<Result<Vec<_>, _>>()?;
        if config.grid.is_empty() {
            return Ok(());
        }

        let cmd = self.command_buffer()?;
        let encoder = cmd
            .computeCommandEncoder()
            .ok_or_else(|| FoundryError::SubmissionFailed("compute encoder creation failed".to_string()))?;
        encoder.setComputePipelineState(&pso.0);
        for (index, buffer) in buffers.iter().enumerate() {
            unsafe {
                encoder.setBuffer_offset_atIndex(Some(&buffer.raw), 0, index);
            }
        }
        encoder.dispatchThreadgroups_threadsPerThreadgroup(config.grid.into(), config.group.into());
        encoder.endEncoding();
        cmd.commit();
        cmd.waitUntilCompleted();
        Ok(())
    }
}
