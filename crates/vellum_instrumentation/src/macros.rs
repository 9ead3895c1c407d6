//! Metric emission macros.

/// Serialise a [`MetricEvent`](crate::MetricEvent) and emit it on the `metrics` target.
///
/// Nothing is recorded when no subscriber is interested in the target.
#[macro_export]
macro_rules! record_metric {
    ($event:expr) => {{
        if tracing::enabled!(target: "metrics", tracing::Level::INFO) {
            if let Ok(__metric_json) = $crate::prelude::serde_json::to_string(&$event) {
                tracing::event!(target: "metrics", tracing::Level::INFO, metric = %__metric_json);
            }
        }
    }};
}
