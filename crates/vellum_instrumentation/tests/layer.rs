use std::sync::mpsc;
use std::time::Duration;

use vellum_instrumentation::prelude::*;

fn channel_subscriber() -> (impl tracing::Subscriber + Send + Sync, mpsc::Receiver<EnrichedMetricEvent>) {
    let (sender, receiver) = mpsc::channel();
    let exporters: Vec<Box<dyn MetricExporter>> = vec![Box::new(ChannelExporter::new(sender))];
    (tracing_subscriber::registry().with(MetricsLayer::new(exporters)), receiver)
}

#[test]
fn metrics_layer_enriches_span_context() {
    let (subscriber, receiver) = channel_subscriber();

    let metric = MetricEvent::KernelDispatched {
        kernel: "rmsnorm".to_string(),
        backend: "host".to_string(),
        grid: (1, 1, 1),
        threadgroup: (32, 1, 1),
        duration_us: 12,
    };

    let (parent_id, child_id) = subscriber::with_default(subscriber, || {
        let parent = info_span!("decode_step");
        let parent_id = parent.id().map(|id| id.into_u64());
        let _parent = parent.enter();

        let child = info_span!("block");
        let child_id = child.id().map(|id| id.into_u64());
        let _child = child.enter();

        record_metric!(metric.clone());
        (parent_id, child_id)
    });

    let enriched = receiver.recv_timeout(Duration::from_secs(1)).expect("metric should be dispatched");
    assert_eq!(enriched.span_id, child_id);
    assert_eq!(enriched.parent_span_id, parent_id);
    assert_eq!(enriched.span_name.as_deref(), Some("block"));

    match enriched.event {
        MetricEvent::KernelDispatched { kernel, grid, threadgroup, .. } => {
            assert_eq!(kernel, "rmsnorm");
            assert_eq!(grid, (1, 1, 1));
            assert_eq!(threadgroup, (32, 1, 1));
        }
        other => panic!("expected dispatch metric, got {other:?}"),
    }
}

#[test]
fn metrics_layer_ignores_non_metric_events() {
    let (subscriber, receiver) = channel_subscriber();

    subscriber::with_default(subscriber, || {
        let span = info_span!("quiet");
        let _guard = span.enter();
        info!("plain log line");
    });

    assert!(receiver.try_recv().is_err(), "channel should remain empty");
}

#[test]
fn enriched_event_serialises_with_type_tag() {
    let (subscriber, receiver) = channel_subscriber();
    subscriber::with_default(subscriber, || {
        record_metric!(MetricEvent::SlotTransfer {
            slot: "embedding.out".to_string(),
            direction: TransferDirection::Download,
            bytes: 16,
            staged: true,
        });
    });

    let enriched = receiver.recv_timeout(Duration::from_secs(1)).expect("metric should be dispatched");
    assert!(enriched.span_id.is_none());
    let json: serde_json::Value = serde_json::to_value(&enriched).expect("serialise");
    assert_eq!(json["event"]["type"], "SlotTransfer");
    assert_eq!(json["event"]["data"]["direction"], "download");
}
