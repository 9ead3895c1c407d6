//! Process environment helpers shared by the vellum runtime crates.

pub mod environment;

pub use environment::{
    EnvVar, Environment, foundry::{
        BACKEND, DEBUG_KERNEL_BINDINGS, DISABLE_CHAT_TEMPLATE, DUMP_KERNEL_SOURCE_DIR, FoundryEnvVar, KERNEL_CACHE_CAPACITY, MAX_CONTEXT_LEN, SAMPLE_SEED, SYSTEM_PROMPT, is_set
    }, guard::EnvVarGuard, instrument::{InstrumentEnvVar, LOG_LEVEL, METRICS_CONSOLE, METRICS_JSONL_PATH}, value::{EnvVarError, EnvVarFormatError, EnvVarParseError, TypedEnvVar, TypedEnvVarGuard}
};
