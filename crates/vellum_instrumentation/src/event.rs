//! Metric event definitions.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Which way bytes moved between host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
    DeviceCopy,
}

/// Structured events emitted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MetricEvent {
    /// A kernel artifact was requested; `cache_hit` is false when it had to be compiled.
    KernelCompiled {
        family: String,
        artifact_key: String,
        cache_hit: bool,
        source_bytes: u64,
        duration_us: u64,
    },
    /// A kernel was dispatched and has completed.
    KernelDispatched {
        kernel: String,
        backend: String,
        grid: (u32, u32, u32),
        threadgroup: (u32, u32, u32),
        duration_us: u64,
    },
    /// Host/device transfer through a slot.
    SlotTransfer {
        slot: String,
        direction: TransferDirection,
        bytes: u64,
        /// True when a transient host-visible buffer was used.
        staged: bool,
    },
    GgufFileMmap { size_bytes: u64 },
    ModelLoaded {
        name: String,
        block_count: u32,
        embedding_width: u32,
        /// Weight bytes per tensor group (`attn`, `ffn`, `embedding`, ...).
        weight_bytes: FxHashMap<String, u64>,
        duration_ms: u64,
    },
    TokenGenerated {
        position: u64,
        token_id: u32,
        latency_us: u64,
    },
}
