//! Metric sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use crate::recorder::{EnrichedMetricEvent, MetricExporter};

/// Appends one JSON object per event to a file.
pub struct JsonlExporter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlExporter {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl MetricExporter for JsonlExporter {
    fn export(&self, event: &EnrichedMetricEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock()
            && let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush())
        {
            tracing::error!(target: "instrument", ?error, "failed to write metric to jsonl");
        }
    }
}

/// Prints events to stdout.
#[derive(Default)]
pub struct ConsoleExporter;

impl MetricExporter for ConsoleExporter {
    fn export(&self, event: &EnrichedMetricEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("METRIC: {line}");
        }
    }
}

/// Forwards events over an in-process channel; used by tests and embedders.
pub struct ChannelExporter {
    sender: Sender<EnrichedMetricEvent>,
}

impl ChannelExporter {
    pub fn new(sender: Sender<EnrichedMetricEvent>) -> Self {
        Self { sender }
    }
}

impl MetricExporter for ChannelExporter {
    fn export(&self, event: &EnrichedMetricEvent) {
        let _ = self.sender.send(event.clone());
    }
}
