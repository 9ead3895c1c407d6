//! Slot-graph execution engine for decoder-only transformer inference.

use std::sync::Arc;

pub use backend::{Backend, BackendChoice};
pub use config::FoundryConfig;
pub use error::FoundryError;
pub use kernel::{Binding, Kernel, KernelOperator};
pub use kernel_registry::{KernelCache, MemoryKernelCache, RegistryConfig};
pub use generation::SamplingConfig;
pub use model::{ModelConfig, ModelPipeline};
pub use slot::{ScalarValue, SlotClass, SlotGraph, SlotId};
pub use tokenizer::{BpeTokenizer, Tokenizer, TokenizerError};
pub use types::*;

pub mod backend;
pub mod config;
mod error;
pub mod generation;
pub mod kernel;
pub mod kernel_registry;
pub mod metals;
pub mod model;
pub mod slot;
pub mod tokenizer;
pub mod types;

/// Execution hub: the backend, the slot graph living on it and the kernel cache.
pub struct Foundry {
    backend: Arc<dyn Backend>,
    slots: SlotGraph,
    kernel_cache: Arc<dyn KernelCache>,
    config: FoundryConfig,
    /// Cached once at startup to avoid per-dispatch environment reads.
    debug_kernel_bindings_enabled: bool,
}

impl Foundry {
    /// Create a Foundry configured from the process environment.
    pub fn new() -> Result<Self, FoundryError> {
        Self::new_with_config(FoundryConfig::from_env()?)
    }

    pub fn new_with_config(config: FoundryConfig) -> Result<Self, FoundryError> {
        let backend = backend::create_backend(config.backend)?;
        let cache = Arc::new(MemoryKernelCache::new(RegistryConfig {
            max_artifacts: config.kernel_cache_capacity,
            ..RegistryConfig::default()
        }));
        Ok(Self::with_parts(backend, cache, config))
    }

    /// Create a Foundry over an existing backend and kernel cache.
    pub fn with_parts(backend: Arc<dyn Backend>, kernel_cache: Arc<dyn KernelCache>, config: FoundryConfig) -> Self {
        tracing::info!(backend = backend.name(), context_len = config.max_context_len, "foundry ready");
        Self {
            slots: SlotGraph::new(backend.clone()),
            backend,
            kernel_cache,
            debug_kernel_bindings_enabled: config.debug_kernel_bindings,
            config,
        }
    }

    /// Host-backed Foundry with default configuration.
    pub fn host() -> Self {
        Self::host_with_config(FoundryConfig::default().with_backend(BackendChoice::Host))
    }

    pub fn host_with_config(config: FoundryConfig) -> Self {
        Self::with_parts(Arc::new(backend::HostBackend::new()), Arc::new(MemoryKernelCache::default()), config)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn slots(&self) -> &SlotGraph {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotGraph {
        &mut self.slots
    }

    pub fn kernel_cache(&self) -> &dyn KernelCache {
        self.kernel_cache.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &FoundryConfig {
        &self.config
    }

    pub fn debug_kernel_bindings_enabled(&self) -> bool {
        self.debug_kernel_bindings_enabled
    }
}
