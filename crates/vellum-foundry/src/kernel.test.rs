#![cfg(test)]

use super::*;
use crate::slot::ScalarValue;

/// Multiplies the first `active` elements of `x` by a baked-in factor.
struct ScaleKernel {
    x: SlotId,
    active_len: SlotId,
    factor: SlotId,
    factor_value: f32,
    active: usize,
    body: &'static str,
}

impl Kernel for ScaleKernel {
    fn key(&self) -> KernelCacheKey {
        crate::kernel_cache_key!("scale", "f{}", self.factor_value)
    }

    fn bindings(&self) -> Bindings {
        SmallVec::from_slice(&[
            Binding::new("x", self.x),
            Binding::new("active", self.active_len),
            Binding::new("factor", self.factor),
        ])
    }

    fn body(&self) -> String {
        self.body.to_string()
    }

    fn host(&self) -> HostKernel {
        let factor = self.factor_value;
        HostKernel::new(move |inv, gid| {
            let i = gid[0] as usize;
            if i >= inv.load_u32(1, 0) as usize {
                return;
            }
            let v = inv.load_f32(0, i);
            inv.store_f32(0, i, v * factor);
        })
    }

    fn threadgroup(&self) -> ThreadgroupSize {
        ThreadgroupSize::d1(4)
    }

    fn extent(&self) -> (usize, usize, usize) {
        (self.active, 1, 1)
    }
}

const SCALE_BODY: &str = "if (gid.x >= active) return;\nx[gid.x] *= factor;";

fn scale_operator(foundry: &mut Foundry, body: &'static str) -> KernelOperator<ScaleKernel> {
    let slots = foundry.slots_mut();
    let x = slots.storage::<f32>("x", 6).unwrap();
    let active_len = slots.uniform::<u32>("active", 1).unwrap();
    let factor = slots.scalar("factor", ScalarValue::F32(2.0));
    KernelOperator::new(ScaleKernel {
        x,
        active_len,
        factor,
        factor_value: 2.0,
        active: 6,
        body,
    })
}

#[test]
fn generated_source_declares_bindings_in_order() {
    let mut foundry = Foundry::host();
    let op = scale_operator(&mut foundry, SCALE_BODY);
    let source = op.source(&foundry).unwrap();

    assert_eq!(source.entry, "scale_f2");
    assert!(source.text.starts_with("#include <metal_stdlib>\nusing namespace metal;\n"));
    assert!(source.text.contains("constant float factor = 2.0f;"));
    assert!(source.text.contains("kernel void scale_f2("));
    assert!(source.text.contains("device float* x [[buffer(0)]]"));
    assert!(source.text.contains("constant uint& active [[buffer(1)]]"));
    assert!(source.text.contains("uint3 gid [[thread_position_in_grid]]"));
    assert!(source.text.contains("    x[gid.x] *= factor;"));
}

#[test]
fn first_compute_compiles_and_later_calls_reuse_the_pipeline() {
    let mut foundry = Foundry::host();
    let mut op = scale_operator(&mut foundry, SCALE_BODY);
    let x = op.kernel().x;
    let active = op.kernel().active_len;
    foundry.slots_mut().set_value(x, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    foundry.slots_mut().set_value(active, &[6u32]).unwrap();

    assert!(!op.is_compiled());
    op.compute(&foundry).unwrap();
    assert!(op.is_compiled());
    op.compute(&foundry).unwrap();

    let stats = foundry.kernel_cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
    assert_eq!(foundry.slots().get_value::<f32>(x).unwrap(), vec![4.0, 8.0, 12.0, 16.0, 20.0, 24.0]);
}

#[test]
fn identical_sources_share_one_artifact() {
    let mut foundry = Foundry::host();
    let mut a = scale_operator(&mut foundry, SCALE_BODY);
    let mut b = scale_operator(&mut foundry, SCALE_BODY);
    a.compute(&foundry).unwrap();
    b.compute(&foundry).unwrap();
    let stats = foundry.kernel_cache().stats();
    assert_eq!(stats.artifact_count, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn extent_is_recomputed_on_every_call() {
    let mut foundry = Foundry::host();
    let mut op = scale_operator(&mut foundry, SCALE_BODY);
    let x = op.kernel().x;
    let active = op.kernel().active_len;
    foundry.slots_mut().set_value(x, &[1.0f32; 6]).unwrap();
    foundry.slots_mut().set_value(active, &[2u32]).unwrap();

    op.kernel_mut().active = 2;
    op.compute(&foundry).unwrap();
    assert_eq!(foundry.slots().get_value::<f32>(x).unwrap(), vec![2.0, 2.0, 1.0, 1.0, 1.0, 1.0]);

    op.kernel_mut().active = 0;
    op.compute(&foundry).unwrap();
    assert_eq!(foundry.slots().get_value::<f32>(x).unwrap(), vec![2.0, 2.0, 1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn compile_errors_are_reported_every_time_and_never_cached() {
    let mut foundry = Foundry::host();
    let mut op = scale_operator(&mut foundry, "if (gid.x >= active) {");

    for _ in 0..2 {
        let err = op.compute(&foundry).unwrap_err();
        assert!(matches!(err, FoundryError::LibraryCompilationFailed(_)));
        assert!(!op.is_compiled());
    }
    let stats = foundry.kernel_cache().stats();
    assert_eq!(stats.artifact_count, 0);
    assert_eq!(stats.misses, 2);
}
