//! Logging bootstrap and metric events for vellum.
//!
//! Metrics travel through `tracing` on the `metrics` target (see [`record_metric!`])
//! and are picked up by [`recorder::MetricsLayer`], which fans them out to the
//! configured exporters.

pub mod config;
pub mod event;
pub mod exporters;
pub mod logging;
pub mod macros;
pub mod prelude;
pub mod recorder;

pub use event::{MetricEvent, TransferDirection};
