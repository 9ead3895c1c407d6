//! Runtime environment variables: backend choice, kernel debugging, generation defaults.

use super::{
    EnvVar, Environment, parse::{
        format_bool, format_string, format_u64, format_usize, parse_backend, parse_string, parse_truthy_flag, parse_u64, parse_usize
    }, value::TypedEnvVar
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FoundryEnvVar {
    Backend,
    MaxContextLen,
    DumpKernelSourceDir,
    DebugKernelBindings,
    KernelCacheCapacity,
    SystemPrompt,
    DisableChatTemplate,
    SampleSeed,
}

impl FoundryEnvVar {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            FoundryEnvVar::Backend => "VELLUM_BACKEND",
            FoundryEnvVar::MaxContextLen => "VELLUM_MAX_CONTEXT_LEN",
            FoundryEnvVar::DumpKernelSourceDir => "VELLUM_DUMP_KERNEL_SOURCE_DIR",
            FoundryEnvVar::DebugKernelBindings => "VELLUM_DEBUG_KERNEL_BINDINGS",
            FoundryEnvVar::KernelCacheCapacity => "VELLUM_KERNEL_CACHE_CAPACITY",
            FoundryEnvVar::SystemPrompt => "VELLUM_SYSTEM_PROMPT",
            FoundryEnvVar::DisableChatTemplate => "VELLUM_DISABLE_CHAT_TEMPLATE",
            FoundryEnvVar::SampleSeed => "VELLUM_SAMPLE_SEED",
        }
    }

    #[must_use]
    pub const fn into_env(self) -> EnvVar {
        EnvVar::Foundry(self)
    }
}

/// True if the variable exists at all, regardless of its value.
#[must_use]
pub fn is_set(var: FoundryEnvVar) -> bool {
    Environment::get(var).is_some()
}

/// `host`, `metal` or `auto`.
pub const BACKEND: TypedEnvVar<String> = TypedEnvVar::new(FoundryEnvVar::Backend.into_env(), parse_backend, format_string);
/// Rotating KV cache capacity in positions.
pub const MAX_CONTEXT_LEN: TypedEnvVar<usize> = TypedEnvVar::new(FoundryEnvVar::MaxContextLen.into_env(), parse_usize, format_usize);
/// Directory receiving every generated kernel source on compile.
pub const DUMP_KERNEL_SOURCE_DIR: TypedEnvVar<String> =
    TypedEnvVar::new(FoundryEnvVar::DumpKernelSourceDir.into_env(), parse_string, format_string);
pub const DEBUG_KERNEL_BINDINGS: TypedEnvVar<bool> =
    TypedEnvVar::new(FoundryEnvVar::DebugKernelBindings.into_env(), parse_truthy_flag, format_bool);
pub const KERNEL_CACHE_CAPACITY: TypedEnvVar<usize> =
    TypedEnvVar::new(FoundryEnvVar::KernelCacheCapacity.into_env(), parse_usize, format_usize);
pub const SYSTEM_PROMPT: TypedEnvVar<String> = TypedEnvVar::new(FoundryEnvVar::SystemPrompt.into_env(), parse_string, format_string);
pub const DISABLE_CHAT_TEMPLATE: TypedEnvVar<bool> =
    TypedEnvVar::new(FoundryEnvVar::DisableChatTemplate.into_env(), parse_truthy_flag, format_bool);
pub const SAMPLE_SEED: TypedEnvVar<u64> = TypedEnvVar::new(FoundryEnvVar::SampleSeed.into_env(), parse_u64, format_u64);
