use serial_test::serial;
use vellum_instrumentation::prelude::*;

#[test]
#[serial]
fn app_config_parses_and_rejects() {
    let _level = LOG_LEVEL.set_guard(Level::DEBUG).expect("log level should set");
    let _path = METRICS_JSONL_PATH.set_guard("/tmp/vellum-metrics.jsonl".into()).expect("path should set");
    let _console = METRICS_CONSOLE.set_guard(true).expect("console flag should set");

    let config = AppConfig::from_env().expect("configuration should parse");
    assert_eq!(config.log_level, Level::DEBUG);
    assert_eq!(config.metrics_jsonl_path.as_deref(), Some(std::path::Path::new("/tmp/vellum-metrics.jsonl")));
    assert!(config.enable_console_metrics);

    let initialised = AppConfig::initialise(config.clone()).expect("initialise should succeed once");
    assert_eq!(initialised, &config);
    match AppConfig::initialise(config) {
        Err(AppConfigError::AlreadyInitialised) => {}
        other => panic!("expected already initialised error, got {other:?}"),
    }

    let _level = EnvVarGuard::set(InstrumentEnvVar::LogLevel, "verbose");
    match AppConfig::from_env() {
        Err(AppConfigError::InvalidLogLevel { value }) => assert_eq!(value, "verbose"),
        other => panic!("expected invalid log level error, got {other:?}"),
    }

    let _level = LOG_LEVEL.unset_guard();
    let _console = EnvVarGuard::set(InstrumentEnvVar::MetricsConsole, "maybe");
    match AppConfig::from_env() {
        Err(AppConfigError::InvalidBoolean { name, value }) => {
            assert_eq!(name, InstrumentEnvVar::MetricsConsole.key());
            assert_eq!(value, "maybe");
        }
        other => panic!("expected invalid boolean error, got {other:?}"),
    }
}

#[test]
#[serial]
fn defaults_apply_when_unset() {
    let _level = LOG_LEVEL.unset_guard();
    let _path = METRICS_JSONL_PATH.unset_guard();
    let _console = METRICS_CONSOLE.unset_guard();

    assert_eq!(AppConfig::from_env().expect("defaults"), AppConfig::default());
}
