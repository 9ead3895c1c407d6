#![cfg(test)]

use super::*;

const EXISTING_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");

fn config_for(path: &str) -> CliConfig {
    CliConfig {
        gguf_path: path.to_string(),
        prompt: None,
        generation: GenerationConfig::default(),
        backend: None,
        context_len: None,
        interactive: false,
        verbose: 0,
    }
}

#[test]
fn test_cli_config_default_prompt() {
    assert_eq!(config_for("test.gguf").get_prompt(), DEFAULT_PROMPT);
}

#[test]
fn test_cli_config_custom_prompt() {
    let mut config = config_for("test.gguf");
    config.prompt = Some("Hello, world!".to_string());
    assert_eq!(config.get_prompt(), "Hello, world!");
}

#[test]
fn parses_full_command_line() {
    let config = CliConfig::try_parse_from([
        "vellum",
        "model.gguf",
        "Why is the sky blue?",
        "--max-tokens",
        "32",
        "--temperature",
        "0",
        "--top-p",
        "0.5",
        "--top-k",
        "8",
        "--seed",
        "42",
        "--backend",
        "host",
        "--context-len",
        "128",
        "--interactive",
        "-vv",
    ])
    .unwrap();

    assert_eq!(config.gguf_path, "model.gguf");
    assert_eq!(config.prompt.as_deref(), Some("Why is the sky blue?"));
    assert_eq!(config.generation.max_tokens, 32);
    assert_eq!(config.generation.seed, Some(42));
    assert_eq!(config.backend, Some(BackendArg::Host));
    assert_eq!(config.context_len, Some(128));
    assert!(config.interactive);
    assert_eq!(config.verbose, 2);
    assert!(config.sampling().is_greedy());
    assert_eq!(config.sampling().top_k, 8);
}

#[test]
fn defaults_match_sampling_defaults() {
    let config = CliConfig::try_parse_from(["vellum", "model.gguf"]).unwrap();
    assert_eq!(config.sampling(), SamplingConfig::default());
    assert!(config.backend.is_none());
    assert!(!config.interactive);
}

#[test]
fn unknown_backend_is_rejected_by_parser() {
    assert!(CliConfig::try_parse_from(["vellum", "model.gguf", "--backend", "vulkan"]).is_err());
}

#[test]
fn validate_accepts_existing_file() {
    config_for(EXISTING_FILE).validate().unwrap();
}

#[test]
fn validate_rejects_missing_file() {
    let err = config_for("definitely/not/here.gguf").validate().unwrap_err();
    assert!(matches!(err, CliError::FilePathError(_)));
}

#[test]
fn validate_rejects_out_of_range_generation() {
    let mut config = config_for(EXISTING_FILE);
    config.generation.top_p = 1.5;
    assert!(matches!(config.validate(), Err(CliError::ConfigError(_))));

    let mut config = config_for(EXISTING_FILE);
    config.generation.temperature = -0.1;
    assert!(matches!(config.validate(), Err(CliError::ConfigError(_))));

    let mut config = config_for(EXISTING_FILE);
    config.generation.max_tokens = 0;
    assert!(matches!(config.validate(), Err(CliError::ConfigError(_))));

    let mut config = config_for(EXISTING_FILE);
    config.context_len = Some(0);
    assert!(matches!(config.validate(), Err(CliError::ConfigError(_))));
}

#[test]
fn overrides_apply_on_top_of_base_config() {
    let mut config = config_for("model.gguf");
    config.backend = Some(BackendArg::Host);
    config.context_len = Some(64);
    config.generation.seed = Some(9);

    let base = FoundryConfig::default();
    let merged = config.foundry_config(base.clone());
    assert_eq!(merged.backend, BackendChoice::Host);
    assert_eq!(merged.max_context_len, 64);
    assert_eq!(merged.sample_seed, Some(9));
    assert_eq!(merged.system_prompt, base.system_prompt);
}

#[test]
fn absent_overrides_keep_base_config() {
    let base = FoundryConfig::default().with_sample_seed(3);
    assert_eq!(config_for("model.gguf").foundry_config(base.clone()), base);
}
