//! Content-addressed cache of compiled kernel artifacts.
//!
//! Generated source embeds every shape constant, so two operators with the
//! same source share one artifact. The cache is a trait object injected into
//! the [`Foundry`](crate::Foundry); [`MemoryKernelCache`] is the default and
//! keeps artifacts in a bounded `moka` cache.
//!
//! Evicted artifacts are queued by the cache and released to the backend at
//! the start of the next [`get_or_compile`], once the artifact returned by the
//! previous lookup has been turned into a pipeline.

use std::{
    fmt, hash::{Hash, Hasher}, mem, path::Path, sync::{
        Arc, Mutex, PoisonError, atomic::{AtomicU64, Ordering}
    }, time::{Duration, Instant}
};

use moka::sync::Cache;
use vellum_instrumentation::{MetricEvent, record_metric};

use crate::{
    FoundryError, backend::{ArtifactHandle, Backend, KernelSource}
};

/// Kernel family plus a variant string describing its specialization.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelCacheKey {
    /// Kernel family (e.g. "matmul", "rope")
    pub family: String,
    /// Shape and mode suffix
    pub variant: String,
}

impl KernelCacheKey {
    pub fn new(family: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            variant: variant.into(),
        }
    }

    /// Identifier usable as a kernel entry point.
    pub fn entry_name(&self) -> String {
        let raw = if self.variant.is_empty() {
            self.family.clone()
        } else {
            format!("{}_{}", self.family, self.variant)
        };
        sanitize(&raw)
    }
}

impl fmt::Display for KernelCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.variant)
    }
}

/// Shorthand constructor for kernel cache keys.
///
/// Usage:
/// - `kernel_cache_key!("silu", "n4096")`
/// - `kernel_cache_key!("matmul", "o{}_i{}", out, inp)`
#[macro_export]
macro_rules! kernel_cache_key {
    ($family:expr, $variant:expr) => {
        $crate::kernel_registry::KernelCacheKey::new($family, $variant)
    };
    ($family:expr, $fmt:literal, $($arg:tt)*) => {
        $crate::kernel_registry::KernelCacheKey::new($family, format!($fmt, $($arg)*))
    };
}

/// Key of one compiled artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub backend: &'static str,
    pub entry: String,
    pub source_hash: u64,
}

impl ArtifactKey {
    pub fn new(backend: &'static str, source: &KernelSource) -> Self {
        let mut hasher = rustc_hash::FxHasher::default();
        source.text.hash(&mut hasher);
        Self {
            backend,
            entry: source.entry.clone(),
            source_hash: hasher.finish(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:016x}", self.backend, self.entry, self.source_hash)
    }
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Max artifacts to keep (default: 256).
    pub max_artifacts: u64,
    /// Time-to-idle for artifacts not accessed (default: 30 min).
    pub artifact_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_artifacts: 256,
            artifact_ttl: Duration::from_secs(1800),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub artifact_count: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Storage for compiled artifacts keyed by source content.
pub trait KernelCache: Send + Sync {
    fn get(&self, key: &ArtifactKey) -> Option<ArtifactHandle>;

    fn insert(&self, key: ArtifactKey, artifact: ArtifactHandle);

    fn stats(&self) -> CacheStats;

    fn clear(&self);

    /// Artifacts dropped from the cache since the last call, for the caller to
    /// release on its backend.
    fn take_evicted(&self) -> Vec<ArtifactHandle> {
        Vec::new()
    }
}

pub struct MemoryKernelCache {
    artifacts: Cache<ArtifactKey, ArtifactHandle>,
    evicted: Arc<Mutex<Vec<ArtifactHandle>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryKernelCache {
    pub fn new(config: RegistryConfig) -> Self {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&evicted);
        Self {
            artifacts: Cache::builder()
                .max_capacity(config.max_artifacts)
                .time_to_idle(config.artifact_ttl)
                .eviction_listener(move |key, artifact, cause| {
                    tracing::trace!(key = %key, ?cause, "kernel artifact evicted");
                    queue.lock().unwrap_or_else(PoisonError::into_inner).push(artifact);
                })
                .build(),
            evicted,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryKernelCache {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl KernelCache for MemoryKernelCache {
    fn get(&self, key: &ArtifactKey) -> Option<ArtifactHandle> {
        let found = self.artifacts.get(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn insert(&self, key: ArtifactKey, artifact: ArtifactHandle) {
        self.artifacts.insert(key, artifact);
    }

    fn stats(&self) -> CacheStats {
        self.artifacts.run_pending_tasks();
        CacheStats {
            artifact_count: self.artifacts.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        for (key, _) in self.artifacts.iter() {
            self.artifacts.invalidate(&*key);
        }
    }

    fn take_evicted(&self) -> Vec<ArtifactHandle> {
        self.artifacts.run_pending_tasks();
        mem::take(&mut *self.evicted.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Look `source` up in `cache`, compiling and inserting it on a miss.
///
/// Failed compilations are never inserted.
pub fn get_or_compile(
    cache: &dyn KernelCache,
    backend: &dyn Backend,
    family: &str,
    source: &KernelSource,
    dump_dir: Option<&Path>,
) -> Result<ArtifactHandle, FoundryError> {
    for artifact in cache.take_evicted() {
        backend.release_artifact(artifact);
    }

    let key = ArtifactKey::new(backend.name(), source);
    let started = Instant::now();
    if let Some(artifact) = cache.get(&key) {
        record_metric!(MetricEvent::KernelCompiled {
            family: family.to_string(),
            artifact_key: key.to_string(),
            cache_hit: true,
            source_bytes: source.text.len() as u64,
            duration_us: 0,
        });
        return Ok(artifact);
    }

    if let Some(dir) = dump_dir {
        dump_source(dir, source)?;
    }

    let artifact = backend.compile(source)?;
    let duration_us = started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
    tracing::debug!(entry = %source.entry, key = %key, duration_us, "compiled kernel");
    record_metric!(MetricEvent::KernelCompiled {
        family: family.to_string(),
        artifact_key: key.to_string(),
        cache_hit: false,
        source_bytes: source.text.len() as u64,
        duration_us,
    });
    cache.insert(key, artifact);
    Ok(artifact)
}

fn sanitize(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() { "kernel".to_string() } else { safe }
}

fn dump_source(dir: &Path, source: &KernelSource) -> Result<(), FoundryError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        FoundryError::LibraryCompilationFailed(format!("failed to create kernel dump dir {}: {e}", dir.display()))
    })?;
    let path = dir.join(format!("{}.metal", sanitize(&source.entry)));
    std::fs::write(&path, &source.text)
        .map_err(|e| FoundryError::LibraryCompilationFailed(format!("failed to write kernel source dump {}: {e}", path.display())))
}

#[cfg(test)]
#[path = "kernel_registry.test.rs"]
mod tests;
