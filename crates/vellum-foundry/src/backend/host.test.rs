#![cfg(test)]

use super::*;
use crate::types::ThreadgroupSize;

fn source(entry: &str) -> KernelSource {
    KernelSource {
        entry: entry.to_string(),
        text: format!("kernel void {entry}(device float* x [[buffer(0)]]) {{ }}"),
    }
}

#[test]
fn device_local_buffers_refuse_host_access() {
    let backend = HostBackend::new();
    let buf = backend.allocate(16, Residency::DeviceLocal).unwrap();
    let err = backend.write(buf, 0, &[0u8; 4]).unwrap_err();
    assert!(matches!(err, FoundryError::NotHostVisible(id) if id == buf.id()));
    let mut out = [0u8; 4];
    assert!(backend.read(buf, 0, &mut out).is_err());
}

#[test]
fn copy_moves_bytes_between_residencies() {
    let backend = HostBackend::new();
    let staging = backend.allocate(8, Residency::HostVisible).unwrap();
    let device = backend.allocate(8, Residency::DeviceLocal).unwrap();
    let readback = backend.allocate(8, Residency::HostVisible).unwrap();

    backend.write(staging, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    backend.copy(staging, 0, device, 0, 8).unwrap();
    backend.copy(device, 4, readback, 0, 4).unwrap();

    let mut out = [0u8; 4];
    backend.read(readback, 0, &mut out).unwrap();
    assert_eq!(out, [5, 6, 7, 8]);
}

#[test]
fn out_of_range_access_is_rejected() {
    let backend = HostBackend::new();
    let buf = backend.allocate(8, Residency::HostVisible).unwrap();
    let err = backend.write(buf, 6, &[0u8; 4]).unwrap_err();
    assert!(matches!(err, FoundryError::OutOfRange { offset: 6, len: 4, capacity: 8 }));
}

#[test]
fn release_forgets_the_buffer() {
    let backend = HostBackend::new();
    let buf = backend.allocate(4, Residency::HostVisible).unwrap();
    assert_eq!(backend.live_buffers(), 1);
    backend.release(buf);
    assert_eq!(backend.live_buffers(), 0);
    assert!(matches!(backend.buffer_len(buf), Err(FoundryError::UnknownBuffer(_))));
}

#[test]
fn compile_requires_the_entry_point() {
    let backend = HostBackend::new();
    let mut bad = source("scale");
    bad.entry = "missing".to_string();
    assert!(matches!(backend.compile(&bad), Err(FoundryError::LibraryCompilationFailed(_))));
}

#[test]
fn dispatch_runs_every_thread_once() {
    let backend = HostBackend::new();
    let buf = backend.allocate(4 * 10, Residency::HostVisible).unwrap();
    let artifact = backend.compile(&source("count")).unwrap();
    let kernel = HostKernel::new(|inv, gid| {
        let i = gid[0] as usize;
        let v = inv.load_f32(0, i);
        inv.store_f32(0, i, v + 1.0);
    });
    let pipeline = backend.build_pipeline(artifact, "count", &kernel).unwrap();

    // 3 groups of 4 threads: two threads fall outside the buffer and must be dropped.
    let config = DispatchConfig::covering((10, 1, 1), ThreadgroupSize::d1(4));
    backend.dispatch(pipeline, &[buf], config).unwrap();

    let mut out = [0u8; 40];
    backend.read(buf, 0, &mut out).unwrap();
    let values: Vec<f32> = out.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
    assert_eq!(values, vec![1.0; 10]);
}

#[test]
fn aliased_bindings_share_one_buffer() {
    let backend = HostBackend::new();
    let buf = backend.allocate(4, Residency::HostVisible).unwrap();
    backend.write(buf, 0, &3.0f32.to_le_bytes()).unwrap();
    let artifact = backend.compile(&source("double")).unwrap();
    let kernel = HostKernel::new(|inv, _| {
        let v = inv.load_f32(0, 0);
        inv.store_f32(1, 0, v * 2.0);
    });
    let pipeline = backend.build_pipeline(artifact, "double", &kernel).unwrap();
    backend.dispatch(pipeline, &[buf, buf], DispatchConfig::covering((1, 1, 1), ThreadgroupSize::d1(1))).unwrap();

    let mut out = [0u8; 4];
    backend.read(buf, 0, &mut out).unwrap();
    assert_eq!(f32::from_le_bytes(out), 6.0);
    assert_eq!(backend.live_buffers(), 1);
}
