#![cfg(test)]

use super::*;
use crate::{
    backend::{HostBackend, HostKernel, Residency}, types::DispatchConfig
};

fn source(entry: &str, body: &str) -> KernelSource {
    KernelSource {
        entry: entry.to_string(),
        text: format!("kernel void {entry}(device float* x [[buffer(0)]]) {{ {body} }}"),
    }
}

#[test]
fn test_kernel_cache_key_equality() {
    let key1 = kernel_cache_key!("matmul", "o4_i8");
    let key2 = kernel_cache_key!("matmul", "o{}_i{}", 4, 8);
    let key3 = KernelCacheKey::new("matmul", "o8_i8");

    assert_eq!(key1, key2);
    assert_ne!(key1, key3);
}

#[test]
fn entry_names_are_identifiers() {
    assert_eq!(KernelCacheKey::new("rope", "h2-d8.cache").entry_name(), "rope_h2_d8_cache");
    assert_eq!(KernelCacheKey::new("silu", "").entry_name(), "silu");
}

#[test]
fn test_registry_config_default() {
    let config = RegistryConfig::default();
    assert_eq!(config.max_artifacts, 256);
    assert_eq!(config.artifact_ttl, Duration::from_secs(1800));
}

#[test]
fn artifact_keys_follow_source_content() {
    let a = ArtifactKey::new("host", &source("k", "x[0] = 1.0f;"));
    let b = ArtifactKey::new("host", &source("k", "x[0] = 1.0f;"));
    let c = ArtifactKey::new("host", &source("k", "x[0] = 2.0f;"));
    assert_eq!(a, b);
    assert_ne!(a.source_hash, c.source_hash);
    assert_ne!(a, ArtifactKey::new("metal", &source("k", "x[0] = 1.0f;")));
}

#[test]
fn second_lookup_hits_the_cache() {
    let cache = MemoryKernelCache::default();
    let backend = HostBackend::new();
    let src = source("fill", "x[0] = 0.0f;");

    let first = get_or_compile(&cache, &backend, "fill", &src, None).unwrap();
    let second = get_or_compile(&cache, &backend, "fill", &src, None).unwrap();
    assert_eq!(first, second);

    let stats = cache.stats();
    assert_eq!(stats.artifact_count, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn failed_compiles_are_not_cached() {
    let cache = MemoryKernelCache::default();
    let backend = HostBackend::new();
    let broken = KernelSource {
        entry: "broken".to_string(),
        text: "kernel void other() {}".to_string(),
    };

    assert!(get_or_compile(&cache, &backend, "broken", &broken, None).is_err());
    assert!(get_or_compile(&cache, &backend, "broken", &broken, None).is_err());
    assert_eq!(cache.stats().artifact_count, 0);
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn sources_are_dumped_when_requested() {
    let dir = std::env::temp_dir().join(format!("vellum-dump-{}", std::process::id()));
    let cache = MemoryKernelCache::default();
    let backend = HostBackend::new();
    let src = source("dumped_kernel", "");

    get_or_compile(&cache, &backend, "dumped", &src, Some(&dir)).unwrap();
    let written = std::fs::read_to_string(dir.join("dumped_kernel.metal")).unwrap();
    assert_eq!(written, src.text);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn evicted_artifacts_are_released_on_next_lookup() {
    let cache = MemoryKernelCache::new(RegistryConfig {
        max_artifacts: 1,
        ..RegistryConfig::default()
    });
    let backend = HostBackend::new();
    let compiled = 8;
    for i in 0..compiled {
        let entry = format!("fill{i}");
        get_or_compile(&cache, &backend, "fill", &source(&entry, "x[0] = 0.0f;"), None).unwrap();
    }
    let resident = cache.stats().artifact_count;
    assert!(resident <= 1);

    get_or_compile(&cache, &backend, "fill", &source("fill0", "x[0] = 0.0f;"), None).unwrap();
    let live = backend.live_artifacts();
    assert!(live <= 2, "{live} of {} compiled artifacts still alive", compiled + 1);
}

#[test]
fn cleared_artifacts_are_released_but_pipelines_survive() {
    let cache = MemoryKernelCache::default();
    let backend = HostBackend::new();
    let host = HostKernel::new(|_, _| {});

    let artifact = get_or_compile(&cache, &backend, "fill", &source("fill_a", "x[0] = 0.0f;"), None).unwrap();
    let pipeline = backend.build_pipeline(artifact, "fill_a", &host).unwrap();
    cache.clear();
    assert_eq!(backend.live_artifacts(), 1);

    get_or_compile(&cache, &backend, "fill", &source("fill_b", "x[0] = 1.0f;"), None).unwrap();
    assert_eq!(backend.live_artifacts(), 1);
    assert!(backend.build_pipeline(artifact, "fill_a", &host).is_err());

    let buffer = backend.allocate(4, Residency::HostVisible).unwrap();
    backend.dispatch(pipeline, &[buffer], DispatchConfig::default()).unwrap();
}
