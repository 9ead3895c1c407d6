use std::path::PathBuf;

use vellum_env::{
    BACKEND, DEBUG_KERNEL_BINDINGS, DISABLE_CHAT_TEMPLATE, DUMP_KERNEL_SOURCE_DIR, KERNEL_CACHE_CAPACITY, MAX_CONTEXT_LEN, SAMPLE_SEED, SYSTEM_PROMPT
};

use crate::FoundryError;

pub const DEFAULT_MAX_CONTEXT_LEN: usize = 1024;
pub const DEFAULT_KERNEL_CACHE_CAPACITY: u64 = 256;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendChoice {
    Host,
    Metal,
    #[default]
    Auto,
}

impl BackendChoice {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Some(Self::Host),
            "metal" => Some(Self::Metal),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Runtime configuration for a [`Foundry`](crate::Foundry).
///
/// [`FoundryConfig::from_env`] reads the `VELLUM_*` variables; the `with_*`
/// builders override individual fields afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoundryConfig {
    pub backend: BackendChoice,
    /// Rotating KV cache capacity in positions.
    pub max_context_len: usize,
    pub dump_kernel_source_dir: Option<PathBuf>,
    pub debug_kernel_bindings: bool,
    pub kernel_cache_capacity: u64,
    pub system_prompt: String,
    pub disable_chat_template: bool,
    pub sample_seed: Option<u64>,
}

impl Default for FoundryConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            max_context_len: DEFAULT_MAX_CONTEXT_LEN,
            dump_kernel_source_dir: None,
            debug_kernel_bindings: false,
            kernel_cache_capacity: DEFAULT_KERNEL_CACHE_CAPACITY,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            disable_chat_template: false,
            sample_seed: None,
        }
    }
}

impl FoundryConfig {
    pub fn from_env() -> Result<Self, FoundryError> {
        let defaults = Self::default();
        let backend = match BACKEND.get()? {
            Some(name) => BackendChoice::from_name(&name)
                .ok_or_else(|| FoundryError::InvalidOperation(format!("unknown backend '{name}'")))?,
            None => defaults.backend,
        };
        let max_context_len = MAX_CONTEXT_LEN.get_or(defaults.max_context_len)?;
        if max_context_len == 0 {
            return Err(FoundryError::InvalidOperation(format!("{} must be positive", MAX_CONTEXT_LEN.key())));
        }

        Ok(Self {
            backend,
            max_context_len,
            dump_kernel_source_dir: DUMP_KERNEL_SOURCE_DIR.get()?.filter(|d| !d.trim().is_empty()).map(PathBuf::from),
            debug_kernel_bindings: DEBUG_KERNEL_BINDINGS.get_or(false)?,
            kernel_cache_capacity: KERNEL_CACHE_CAPACITY
                .get()?
                .map_or(defaults.kernel_cache_capacity, |c| c as u64),
            system_prompt: SYSTEM_PROMPT.get_or(defaults.system_prompt)?,
            disable_chat_template: DISABLE_CHAT_TEMPLATE.get_or(false)?,
            sample_seed: SAMPLE_SEED.get()?,
        })
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendChoice) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_max_context_len(mut self, len: usize) -> Self {
        self.max_context_len = len.max(1);
        self
    }

    #[must_use]
    pub fn with_dump_kernel_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_kernel_source_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_debug_kernel_bindings(mut self, enabled: bool) -> Self {
        self.debug_kernel_bindings = enabled;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_chat_template(mut self, enabled: bool) -> Self {
        self.disable_chat_template = !enabled;
        self
    }

    #[must_use]
    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!(BackendChoice::from_name("Metal"), Some(BackendChoice::Metal));
        assert_eq!(BackendChoice::from_name(" host "), Some(BackendChoice::Host));
        assert_eq!(BackendChoice::from_name("vulkan"), None);
    }

    #[test]
    #[serial]
    fn env_values_are_picked_up() {
        let _backend = BACKEND.set_guard("host".to_string()).unwrap();
        let _ctx = MAX_CONTEXT_LEN.set_guard(64).unwrap();
        let _seed = SAMPLE_SEED.set_guard(7).unwrap();
        let _prompt = SYSTEM_PROMPT.unset_guard();

        let config = FoundryConfig::from_env().unwrap();
        assert_eq!(config.backend, BackendChoice::Host);
        assert_eq!(config.max_context_len, 64);
        assert_eq!(config.sample_seed, Some(7));
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    #[serial]
    fn builder_overrides_environment() {
        let _ctx = MAX_CONTEXT_LEN.set_guard(64).unwrap();
        let config = FoundryConfig::from_env().unwrap().with_max_context_len(8).with_chat_template(false);
        assert_eq!(config.max_context_len, 8);
        assert!(config.disable_chat_template);
    }

    #[test]
    #[serial]
    fn zero_context_length_is_rejected() {
        let _ctx = MAX_CONTEXT_LEN.set_guard(0).unwrap();
        assert!(FoundryConfig::from_env().is_err());
    }
}
