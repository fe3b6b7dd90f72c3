// Configuration loading tests: YAML files, environment overrides, validation
use flexguard::config::{Settings, MAX_TIMEOUT_SECS};
use flexguard::error::{exit_codes, ConfigError, FlexError};
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;

const ENV_KEYS: [&str; 5] = [
    "FLEX_CLI_PATH",
    "FLEX_TEMP_DIR",
    "FLEX_EXAMPLES_DIR",
    "FLEX_FILE_EXTENSIONS",
    "EXECUTION_TIMEOUT",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("flexguard.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
#[serial]
fn test_load_without_file_uses_defaults() {
    clear_env();
    let settings = Settings::load(None).unwrap();
    assert_eq!(settings.interpreter.path, "flex");
    assert_eq!(settings.execution.default_timeout_secs, 30);
    assert_eq!(settings.limits.max_memory_mb, 512);
    assert_eq!(settings.limits.max_cpu_percent, Some(50.0));
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
interpreter:
  path: /opt/flex/bin/flex
execution:
  default_timeout_secs: 60
  file_extensions: [".flex"]
limits:
  max_memory_mb: 256
  max_cpu_percent: null
analysis:
  long_line_threshold: 100
"#,
    );

    let settings = Settings::load(Some(&path)).unwrap();
    assert_eq!(settings.interpreter.path, "/opt/flex/bin/flex");
    assert_eq!(settings.execution.default_timeout_secs, 60);
    assert_eq!(settings.execution.file_extensions, vec![".flex".to_string()]);
    assert_eq!(settings.limits.max_memory_mb, 256);
    assert_eq!(settings.limits.max_cpu_percent, None);
    assert_eq!(settings.analysis.long_line_threshold, 100);
    // Untouched keys keep their defaults.
    assert_eq!(settings.analysis.lookahead_window, 10);
    assert_eq!(settings.execution.grace_period_ms, 2000);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "interpreter:\n  path: from-file\n");

    std::env::set_var("FLEX_CLI_PATH", "from-env");
    std::env::set_var("EXECUTION_TIMEOUT", "45");
    std::env::set_var("FLEX_FILE_EXTENSIONS", ".flex, .fx");
    std::env::set_var("FLEX_TEMP_DIR", dir.path().join("scratch"));
    let result = Settings::load(Some(&path));
    clear_env();

    let settings = result.unwrap();
    assert_eq!(settings.interpreter.path, "from-env");
    assert_eq!(settings.execution.default_timeout_secs, 45);
    assert_eq!(
        settings.execution.file_extensions,
        vec![".flex".to_string(), ".fx".to_string()]
    );
    assert_eq!(settings.execution.temp_dir, dir.path().join("scratch"));
}

#[test]
#[serial]
fn test_out_of_range_env_timeout_is_rejected() {
    clear_env();
    std::env::set_var("EXECUTION_TIMEOUT", (MAX_TIMEOUT_SECS + 1).to_string());
    let result = Settings::load(None);
    clear_env();

    let error = result.unwrap_err();
    assert_eq!(error.exit_code(), exit_codes::CONFIG_ERROR);
    assert!(error.to_string().contains("default_timeout_secs"));
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.yaml");

    match Settings::load(Some(&missing)) {
        Err(FlexError::Config(boxed)) => {
            assert!(matches!(*boxed, ConfigError::NotFound { .. }));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_invalid_yaml_reports_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "limits: [unclosed\n");

    match Settings::from_file(&path) {
        Err(FlexError::Config(boxed)) => match *boxed {
            ConfigError::InvalidYaml { file_path, .. } => {
                assert_eq!(file_path, Some(path));
            }
            other => panic!("expected InvalidYaml, got {other:?}"),
        },
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_semantic_validation() {
    let cases = [
        "limits:\n  max_memory_mb: 0\n",
        "limits:\n  poll_interval_ms: 0\n",
        "limits:\n  max_cpu_percent: -5\n",
        "execution:\n  file_extensions: []\n",
        "execution:\n  file_extensions: [\"flex\"]\n",
        "interpreter:\n  path: \"\"\n",
    ];
    for yaml in cases {
        assert!(Settings::from_yaml(yaml).is_err(), "accepted: {yaml}");
    }
}
