//! Device buffer manager.
//!
//! A [`Backend`] owns buffers, compiled libraries and pipelines and hands out
//! opaque handles for them. Every submission blocks until the device has
//! finished, so callers never observe in-flight work.

use std::{fmt, sync::Arc};

pub use crate::config::BackendChoice;
use crate::{FoundryError, types::DispatchConfig};

mod host;
#[cfg(target_os = "macos")]
mod metal;

pub use host::{HostBackend, HostInvocation};
#[cfg(target_os = "macos")]
pub use metal::MetalBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Where a buffer lives. Only host-visible buffers can be mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    DeviceLocal,
    HostVisible,
}

/// Compiled library handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Generated kernel source and the entry point it defines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSource {
    pub entry: String,
    pub text: String,
}

type HostKernelFn = dyn Fn(&mut HostInvocation<'_>, [u32; 3]) + Send + Sync;

/// Per-thread body executed by [`HostBackend`] in place of the compiled source.
///
/// Receives the global thread position, mirroring `thread_position_in_grid`.
#[derive(Clone)]
pub struct HostKernel(Arc<HostKernelFn>);

impl HostKernel {
    pub fn new(body: impl Fn(&mut HostInvocation<'_>, [u32; 3]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(body))
    }

    pub(crate) fn run(&self, invocation: &mut HostInvocation<'_>, gid: [u32; 3]) {
        (self.0)(invocation, gid)
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostKernel")
    }
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn allocate(&self, bytes: usize, residency: Residency) -> Result<BufferHandle, FoundryError>;

    /// Destroy a buffer. Unknown handles are ignored.
    fn release(&self, buffer: BufferHandle);

    fn residency(&self, buffer: BufferHandle) -> Result<Residency, FoundryError>;

    fn buffer_len(&self, buffer: BufferHandle) -> Result<usize, FoundryError>;

    /// Write through the host mapping. Fails for device-local buffers.
    fn write(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<(), FoundryError>;

    /// Read through the host mapping. Fails for device-local buffers.
    fn read(&self, buffer: BufferHandle, offset: usize, out: &mut [u8]) -> Result<(), FoundryError>;

    /// Device-side copy, submitted and awaited.
    fn copy(&self, src: BufferHandle, src_offset: usize, dst: BufferHandle, dst_offset: usize, bytes: usize) -> Result<(), FoundryError>;

    fn compile(&self, source: &KernelSource) -> Result<ArtifactHandle, FoundryError>;

    /// Drop a compiled artifact. Pipelines already built from it stay valid;
    /// unknown handles are ignored.
    fn release_artifact(&self, artifact: ArtifactHandle);

    /// Build a pipeline for `entry` in `artifact`. `host` is the CPU rendition of the
    /// same kernel; device backends ignore it.
    fn build_pipeline(&self, artifact: ArtifactHandle, entry: &str, host: &HostKernel) -> Result<PipelineHandle, FoundryError>;

    /// Bind `bindings[i]` to `[[buffer(i)]]`, dispatch and wait for completion.
    fn dispatch(&self, pipeline: PipelineHandle, bindings: &[BufferHandle], config: DispatchConfig) -> Result<(), FoundryError>;
}

pub(crate) fn check_range(offset: usize, len: usize, capacity: usize) -> Result<(), FoundryError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FoundryError::OutOfRange { offset, len, capacity }),
    }
}

/// Instantiate the backend selected by `choice`.
///
/// `Auto` picks Metal where it is available and falls back to the host executor.
pub fn create_backend(choice: BackendChoice) -> Result<Arc<dyn Backend>, FoundryError> {
    match choice {
        BackendChoice::Host => Ok(Arc::new(HostBackend::new())),
        #[cfg(target_os = "macos")]
        BackendChoice::Metal => Ok(Arc::new(MetalBackend::system_default()?)),
        #[cfg(not(target_os = "macos"))]
        BackendChoice::Metal => Err(FoundryError::BackendUnavailable("metal".to_string())),
        BackendChoice::Auto => {
            #[cfg(target_os = "macos")]
            {
                match MetalBackend::system_default() {
                    Ok(backend) => return Ok(Arc::new(backend)),
                    Err(err) => tracing::warn!(%err, "metal device unavailable, using host backend"),
                }
            }
            Ok(Arc::new(HostBackend::new()))
        }
    }
}
