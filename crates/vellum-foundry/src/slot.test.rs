#![cfg(test)]

use super::*;
use crate::backend::HostBackend;

fn graph() -> (Arc<HostBackend>, SlotGraph) {
    let backend = Arc::new(HostBackend::new());
    let graph = SlotGraph::new(backend.clone());
    (backend, graph)
}

#[test]
fn device_local_values_round_trip_through_staging() {
    let (backend, mut graph) = graph();
    let x = graph.storage::<f32>("x", 4).unwrap();
    graph.set_value(x, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(graph.get_value::<f32>(x).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    // Staging buffers are freed after each transfer.
    assert_eq!(backend.live_buffers(), 1);
}

#[test]
fn new_slots_start_zeroed() {
    let (_backend, mut graph) = graph();
    let x = graph.storage::<u32>("x", 3).unwrap();
    assert_eq!(graph.get_value::<u32>(x).unwrap(), vec![0, 0, 0]);
}

#[test]
fn wide_host_values_are_narrowed() {
    let (_backend, mut graph) = graph();
    let x = graph.storage::<f32>("x", 2).unwrap();
    graph.set_value(x, &[0.5f64, -1.25]).unwrap();
    assert_eq!(graph.get_value::<f32>(x).unwrap(), vec![0.5, -1.25]);
}

#[test]
fn dtype_mismatch_is_rejected() {
    let (_backend, mut graph) = graph();
    let x = graph.storage::<f32>("x", 2).unwrap();
    let err = graph.set_value(x, &[1u32, 2]).unwrap_err();
    assert!(matches!(
        err,
        FoundryError::DtypeMismatch {
            expected: Dtype::F32,
            actual: Dtype::U32
        }
    ));
}

#[test]
fn bound_slot_observes_target_writes_and_adopts_its_count() {
    let (backend, mut graph) = graph();
    let a = graph.storage::<f32>("a", 2).unwrap();
    let b = graph.storage::<f32>("b", 5).unwrap();
    graph.bind_to(a, b).unwrap();

    graph.set_value(b, &[9.0f32, 8.0, 7.0, 6.0, 5.0]).unwrap();
    assert_eq!(graph.get_value::<f32>(a).unwrap(), vec![9.0, 8.0, 7.0, 6.0, 5.0]);
    assert_eq!(graph.count(a).unwrap(), 5);
    assert_eq!(graph.declared_count(a).unwrap(), 2);

    // a's own buffer was destroyed.
    assert_eq!(backend.live_buffers(), 1);
    assert!(graph.is_owner(b));
    assert!(!graph.is_owner(a));
    assert_eq!(graph.viewers(b), vec![a]);
}

#[test]
fn writes_through_the_viewer_reach_the_owner() {
    let (_backend, mut graph) = graph();
    let a = graph.storage::<f32>("a", 3).unwrap();
    let b = graph.storage::<f32>("b", 3).unwrap();
    graph.bind_to(a, b).unwrap();
    graph.set_value(a, &[1.0f32, 2.0, 3.0]).unwrap();
    assert_eq!(graph.get_value::<f32>(b).unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(graph.resolve(a).unwrap(), graph.resolve(b).unwrap());
}

#[test]
fn rebinding_an_owner_carries_its_viewers() {
    let (backend, mut graph) = graph();
    let a = graph.storage::<f32>("a", 2).unwrap();
    let b = graph.storage::<f32>("b", 2).unwrap();
    let c = graph.storage::<f32>("c", 4).unwrap();
    graph.bind_to(a, b).unwrap();
    graph.bind_to(b, c).unwrap();

    assert_eq!(graph.resolve(a).unwrap(), graph.resolve(c).unwrap());
    assert_eq!(graph.count(a).unwrap(), 4);
    let mut viewers = graph.viewers(c);
    viewers.sort();
    assert_eq!(viewers, vec![a, b]);
    assert_eq!(backend.live_buffers(), 1);
}

#[test]
fn binding_requires_matching_dtypes() {
    let (_backend, mut graph) = graph();
    let a = graph.storage::<f32>("a", 2).unwrap();
    let b = graph.storage::<u32>("b", 2).unwrap();
    assert!(matches!(graph.bind_to(a, b), Err(FoundryError::DtypeMismatch { .. })));
}

#[test]
fn transfer_truncates_to_the_destination() {
    let (_backend, mut graph) = graph();
    let big = graph.storage::<f32>("big", 4).unwrap();
    let small = graph.storage::<f32>("small", 2).unwrap();
    graph.set_value(big, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    graph.transfer(big, small).unwrap();
    assert_eq!(graph.get_value::<f32>(small).unwrap(), vec![1.0, 2.0]);
}

#[test]
fn transfer_from_a_shorter_source_leaves_the_tail() {
    let (_backend, mut graph) = graph();
    let short = graph.storage::<f32>("short", 2).unwrap();
    let long = graph.storage::<f32>("long", 4).unwrap();
    graph.set_value(long, &[9.0f32; 4]).unwrap();
    graph.set_value(short, &[1.0f32, 2.0]).unwrap();
    graph.transfer(short, long).unwrap();
    assert_eq!(graph.get_value::<f32>(long).unwrap(), vec![1.0, 2.0, 9.0, 9.0]);
}

#[test]
fn scalar_slots_cannot_be_resolved() {
    let (_backend, mut graph) = graph();
    let eps = graph.scalar("eps", ScalarValue::F32(1e-5));
    assert!(matches!(graph.resolve(eps), Err(FoundryError::UnboundSlot(name)) if name == "eps"));
    assert_eq!(graph.get_value::<f32>(eps).unwrap(), vec![1e-5]);
    assert!(graph.set_value(eps, &[2.0f32]).is_err());
}

#[test]
fn uniform_slots_are_host_visible() {
    let (_backend, mut graph) = graph();
    let pos = graph.uniform::<u32>("pos", 1).unwrap();
    assert_eq!(graph.residency(pos).unwrap(), Residency::HostVisible);
    graph.set_value(pos, &[17u32]).unwrap();
    assert_eq!(graph.get_value::<u32>(pos).unwrap(), vec![17]);
}

#[test]
fn scalar_literals_keep_a_decimal_point() {
    assert_eq!(ScalarValue::F32(1.0).literal(), "1.0f");
    assert_eq!(ScalarValue::U32(4).literal(), "4u");
    assert_eq!(ScalarValue::F32(f32::NEG_INFINITY).literal(), "-INFINITY");
}

#[test]
fn dropping_the_graph_releases_storage() {
    let (backend, mut graph) = graph();
    graph.storage::<f32>("a", 4).unwrap();
    graph.storage::<f32>("b", 4).unwrap();
    assert_eq!(backend.live_buffers(), 2);
    drop(graph);
    assert_eq!(backend.live_buffers(), 0);
}
