use std::path::Path;

use clap::Parser;
use vellum_foundry::{BackendChoice, FoundryConfig, SamplingConfig};

use super::CliError;

pub const DEFAULT_PROMPT: &str = "Hello World";

/// Command-line interface configuration for the vellum CLI application
#[derive(Debug, Parser)]
#[command(name = "vellum")]
#[command(about = "Run a decoder-only GGUF model on the vellum slot-graph runtime", long_about = None)]
pub struct CliConfig {
    /// Path to the GGUF model file
    #[arg(value_name = "GGUF_PATH")]
    pub gguf_path: String,

    /// Prompt to answer (default: Hello World)
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    #[command(flatten)]
    pub generation: GenerationConfig,

    /// Backend override (defaults to VELLUM_BACKEND, then auto selection)
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub backend: Option<BackendArg>,

    /// KV cache capacity in positions (defaults to VELLUM_MAX_CONTEXT_LEN)
    #[arg(long, value_name = "N")]
    pub context_len: Option<usize>,

    /// Keep reading prompts from stdin, continuing the same session
    #[arg(short, long)]
    pub interactive: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Generation configuration options
#[derive(Debug, Parser)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate per prompt
    #[arg(long, default_value_t = 512)]
    pub max_tokens: usize,

    /// Sampling temperature; 0 selects greedy decoding
    #[arg(long, default_value_t = 0.6)]
    pub temperature: f32,

    /// Top-p sampling parameter (0.0-1.0)
    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    /// Top-k sampling parameter
    #[arg(long, default_value_t = 40)]
    pub top_k: usize,

    /// Random seed for sampling (defaults to VELLUM_SAMPLE_SEED)
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let sampling = SamplingConfig::default();
        Self {
            max_tokens: 512,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            top_k: sampling.top_k,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq, Eq)]
pub enum BackendArg {
    /// Metal when available, host otherwise.
    Auto,
    /// Reference CPU backend.
    Host,
    /// Apple Metal (macOS only).
    Metal,
}

impl From<BackendArg> for BackendChoice {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendChoice::Auto,
            BackendArg::Host => BackendChoice::Host,
            BackendArg::Metal => BackendChoice::Metal,
        }
    }
}

impl CliConfig {
    /// Get the prompt text, using default if not provided
    pub fn get_prompt(&self) -> String {
        self.prompt.clone().unwrap_or_else(|| DEFAULT_PROMPT.to_string())
    }

    /// Reject argument combinations that cannot produce a run.
    pub fn validate(&self) -> Result<(), CliError> {
        if !Path::new(&self.gguf_path).is_file() {
            return Err(CliError::file_path_error(format!("{} is not a readable file", self.gguf_path)));
        }
        let generation = &self.generation;
        if generation.max_tokens == 0 {
            return Err(CliError::config_error("--max-tokens must be at least 1"));
        }
        if !generation.temperature.is_finite() || generation.temperature < 0.0 {
            return Err(CliError::config_error(format!(
                "--temperature must be a non-negative number, got {}",
                generation.temperature
            )));
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            return Err(CliError::config_error(format!("--top-p must be within 0..=1, got {}", generation.top_p)));
        }
        if self.context_len == Some(0) {
            return Err(CliError::config_error("--context-len must be at least 1"));
        }
        Ok(())
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            top_k: self.generation.top_k,
        }
    }

    /// Apply command-line overrides on top of an environment-derived config.
    pub fn foundry_config(&self, mut config: FoundryConfig) -> FoundryConfig {
        if let Some(backend) = self.backend {
            config = config.with_backend(backend.into());
        }
        if let Some(len) = self.context_len {
            config = config.with_max_context_len(len);
        }
        if let Some(seed) = self.generation.seed {
            config = config.with_sample_seed(seed);
        }
        config
    }
}

#[cfg(test)]
#[path = "config.test.rs"]
mod tests;
