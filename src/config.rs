// Configuration handling for flexguard
//
// Settings are layered: built-in defaults, then an optional YAML file, then
// environment variables.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, FlexError, Result};
use crate::logging::utils::config_loading_span;

/// Default configuration file looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "flexguard.yaml";

/// Bounds applied to every per-request timeout.
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;

pub fn clamp_timeout(seconds: u64) -> u64 {
    seconds.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub interpreter: InterpreterSettings,
    pub execution: ExecutionSettings,
    pub limits: LimitSettings,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InterpreterSettings {
    /// Interpreter binary, resolved through PATH when not absolute
    pub path: String,
    pub probe_timeout_secs: u64,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            path: "flex".to_string(),
            probe_timeout_secs: 5,
        }
    }
}

impl InterpreterSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub default_timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL when a run times out
    pub grace_period_ms: u64,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub file_extensions: Vec<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            grace_period_ms: 2000,
            temp_dir: PathBuf::from("./temp"),
            output_dir: PathBuf::from("./flex_examples"),
            file_extensions: vec![".flex".to_string(), ".flx".to_string()],
        }
    }
}

impl ExecutionSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Whether `path` carries one of the recognized Flex extensions.
    pub fn has_flex_extension(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.file_extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_memory_mb: u64,
    /// `None` disables the CPU-usage ceiling
    pub max_cpu_percent: Option<f32>,
    pub poll_interval_ms: u64,
    /// Largest file the interpreter may write
    pub max_file_size_mb: u64,
    /// Apply OS-level ceilings before exec where the platform supports it
    pub enforce_rlimits: bool,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_cpu_percent: Some(50.0),
            poll_interval_ms: 500,
            max_file_size_mb: 10,
            enforce_rlimits: true,
        }
    }
}

impl LimitSettings {
    /// Never zero, even for settings that skipped `validate()`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub long_line_threshold: usize,
    pub lookahead_window: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            long_line_threshold: 120,
            lookahead_window: 10,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let span = config_loading_span(path);
        let _guard = span.enter();

        if !path.exists() {
            return Err(FlexError::Config(Box::new(ConfigError::NotFound {
                path: path.to_path_buf(),
                suggestion: Some(format!(
                    "Create a {DEFAULT_CONFIG_FILE} file or omit --config to use defaults"
                )),
            })));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_with_context(&content, Some(path))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_context(yaml, None)
    }

    fn from_yaml_with_context(yaml: &str, source: Option<&Path>) -> Result<Self> {
        // An empty file is a valid, all-defaults configuration.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings = serde_yaml::from_str(yaml).map_err(|e| {
            let mut config_error = *Box::<ConfigError>::from(e);
            if let ConfigError::InvalidYaml {
                ref mut file_path, ..
            } = config_error
            {
                *file_path = source.map(Path::to_path_buf);
            }
            FlexError::Config(Box::new(config_error))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Full load used by the CLI: file (when present), environment, validation.
    ///
    /// A missing file at the default location is not an error; a missing
    /// file the user named explicitly is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                    Self::default()
                }
            }
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Recognized variables: `FLEX_CLI_PATH`, `FLEX_TEMP_DIR`,
    /// `FLEX_EXAMPLES_DIR`, `FLEX_FILE_EXTENSIONS` (comma separated) and
    /// `EXECUTION_TIMEOUT` (seconds).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FLEX_CLI_PATH") {
            self.interpreter.path = path;
        }
        if let Some(dir) = lookup("FLEX_TEMP_DIR") {
            self.execution.temp_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("FLEX_EXAMPLES_DIR") {
            self.execution.output_dir = PathBuf::from(dir);
        }
        if let Some(extensions) = lookup("FLEX_FILE_EXTENSIONS") {
            self.execution.file_extensions = extensions
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(timeout) = lookup("EXECUTION_TIMEOUT") {
            self.execution.default_timeout_secs = timeout.trim().parse().map_err(|_| {
                FlexError::Config(Box::new(ConfigError::InvalidValue {
                    message: "must be a whole number of seconds".to_string(),
                    field: "EXECUTION_TIMEOUT".to_string(),
                    value: timeout.clone(),
                    expected: format!("integer in {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}"),
                }))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.path.trim().is_empty() {
            return Err(invalid(
                "interpreter.path",
                "",
                "cannot be empty",
                "interpreter name or path",
            ));
        }
        if self.interpreter.probe_timeout_secs == 0 {
            return Err(invalid(
                "interpreter.probe_timeout_secs",
                "0",
                "must be positive",
                "seconds > 0",
            ));
        }

        let timeout = self.execution.default_timeout_secs;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(invalid(
                "execution.default_timeout_secs",
                &timeout.to_string(),
                &format!("must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}"),
                &format!("{MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}"),
            ));
        }
        if self.execution.file_extensions.is_empty() {
            return Err(invalid(
                "execution.file_extensions",
                "[]",
                "at least one extension is required",
                "e.g. [\".flex\", \".flx\"]",
            ));
        }
        if let Some(bad) = self
            .execution
            .file_extensions
            .iter()
            .find(|e| !e.starts_with('.') || e.len() < 2)
        {
            return Err(invalid(
                "execution.file_extensions",
                bad,
                "extensions must start with '.'",
                "e.g. \".flex\"",
            ));
        }

        if self.limits.max_memory_mb == 0 {
            return Err(invalid(
                "limits.max_memory_mb",
                "0",
                "must be positive",
                "megabytes > 0",
            ));
        }
        if let Some(cpu) = self.limits.max_cpu_percent {
            if !(cpu.is_finite() && cpu > 0.0) {
                return Err(invalid(
                    "limits.max_cpu_percent",
                    &cpu.to_string(),
                    "must be a positive percentage",
                    "percent > 0, or null to disable",
                ));
            }
        }
        if self.limits.poll_interval_ms == 0 {
            return Err(invalid(
                "limits.poll_interval_ms",
                "0",
                "must be positive",
                "milliseconds > 0",
            ));
        }

        if self.analysis.long_line_threshold == 0 {
            return Err(invalid(
                "analysis.long_line_threshold",
                "0",
                "must be positive",
                "characters > 0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, message: &str, expected: &str) -> FlexError {
    FlexError::Config(Box::new(ConfigError::InvalidValue {
        message: message.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.interpreter.path, "flex");
        assert_eq!(settings.execution.default_timeout_secs, 30);
        assert_eq!(settings.execution.grace_period(), Duration::from_secs(2));
        assert_eq!(settings.limits.max_memory_mb, 512);
        assert_eq!(settings.limits.max_cpu_percent, Some(50.0));
        assert_eq!(settings.limits.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.analysis.long_line_threshold, 120);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
interpreter:
  path: /opt/flex/bin/flex
limits:
  max_memory_mb: 256
  max_cpu_percent: null
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.interpreter.path, "/opt/flex/bin/flex");
        assert_eq!(settings.interpreter.probe_timeout_secs, 5);
        assert_eq!(settings.limits.max_memory_mb, 256);
        assert_eq!(settings.limits.max_cpu_percent, None);
        assert_eq!(settings.execution.default_timeout_secs, 30);
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        assert_eq!(Settings::from_yaml("  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = Settings::from_yaml("limits: [unclosed");
        match result {
            Err(FlexError::Config(e)) => {
                assert!(matches!(*e, ConfigError::InvalidYaml { .. }))
            }
            other => panic!("expected InvalidYaml, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_timeout_rejected() {
        let result = Settings::from_yaml("execution:\n  default_timeout_secs: 301\n");
        let error = result.unwrap_err();
        assert!(error
            .to_string()
            .contains("execution.default_timeout_secs"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLEX_CLI_PATH", "/usr/local/bin/flex"),
            ("FLEX_TEMP_DIR", "/tmp/flex"),
            ("FLEX_FILE_EXTENSIONS", ".flex, .fx"),
            ("EXECUTION_TIMEOUT", "45"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.interpreter.path, "/usr/local/bin/flex");
        assert_eq!(settings.execution.temp_dir, PathBuf::from("/tmp/flex"));
        assert_eq!(settings.execution.file_extensions, vec![".flex", ".fx"]);
        assert_eq!(settings.execution.default_timeout_secs, 45);
        assert_eq!(settings.execution.output_dir, PathBuf::from("./flex_examples"));
    }

    #[test]
    fn test_env_timeout_must_be_numeric() {
        let mut settings = Settings::default();
        let result = settings.apply_env(|key| (key == "EXECUTION_TIMEOUT").then(|| "soon".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_clamp_timeout() {
        assert_eq!(clamp_timeout(0), 1);
        assert_eq!(clamp_timeout(30), 30);
        assert_eq!(clamp_timeout(10_000), 300);
    }

    #[test]
    fn test_poll_interval_is_never_zero() {
        let limits = LimitSettings {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(limits.poll_interval(), Duration::from_millis(1));
        assert_eq!(
            LimitSettings::default().poll_interval(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_flex_extension_check() {
        let settings = ExecutionSettings::default();
        assert!(settings.has_flex_extension(Path::new("demo.flex")));
        assert!(settings.has_flex_extension(Path::new("demo.FLX")));
        assert!(!settings.has_flex_extension(Path::new("demo.py")));
        assert!(!settings.has_flex_extension(Path::new("demo")));
    }
}
