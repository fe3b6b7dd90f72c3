// Error handling framework for flexguard
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::monitor::LimitBreach;

pub type Result<T> = std::result::Result<T, FlexError>;

/// Main error type for flexguard.
///
/// Analysis defects and ordinary execution failures are reported as data
/// (`Finding`, `ExecutionResult`); this type only covers failures the caller
/// cannot reasonably continue from.
#[derive(Debug, Error)]
pub enum FlexError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<ConfigError>),

    #[error("Execution failed: {0}")]
    Execution(#[from] Box<ExecutionError>),

    #[error("Process registry failure: {0}")]
    Registry(#[from] Box<RegistryError>),

    #[error("CLI argument error: {0}")]
    Cli(#[from] Box<CliError>),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound {
        path: PathBuf,
        suggestion: Option<String>,
    },

    #[error("Invalid YAML syntax: {message}")]
    InvalidYaml {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        file_path: Option<PathBuf>,
    },

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        message: String,
        field: String,
        value: String,
        expected: String,
    },
}

/// Kind tag of an execution failure, carried by `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    InterpreterUnavailable,
    MaterializationFailed,
    ResourceLimitExceeded,
    Timeout,
    NonZeroExit,
    SpawnFailed,
    Cancelled,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::InterpreterUnavailable => "interpreter_unavailable",
            ExecutionErrorKind::MaterializationFailed => "materialization_failed",
            ExecutionErrorKind::ResourceLimitExceeded => "resource_limit_exceeded",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::NonZeroExit => "non_zero_exit",
            ExecutionErrorKind::SpawnFailed => "spawn_failed",
            ExecutionErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution errors with detailed context
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Flex interpreter not found or not accessible: {interpreter} ({reason})")]
    InterpreterUnavailable { interpreter: String, reason: String },

    #[error("Failed to save code: {error}")]
    MaterializationFailed {
        path: Option<PathBuf>,
        error: String,
    },

    #[error("Process killed: {breach}")]
    ResourceLimitExceeded { breach: LimitBreach },

    #[error("Execution timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Process exited with code {exit_code}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Process spawn failed: {command}: {error}")]
    SpawnFailed { command: String, error: String },

    #[error("Execution cancelled: {reason}")]
    Cancelled { reason: String },
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::InterpreterUnavailable { .. } => {
                ExecutionErrorKind::InterpreterUnavailable
            }
            ExecutionError::MaterializationFailed { .. } => {
                ExecutionErrorKind::MaterializationFailed
            }
            ExecutionError::ResourceLimitExceeded { .. } => {
                ExecutionErrorKind::ResourceLimitExceeded
            }
            ExecutionError::Timeout { .. } => ExecutionErrorKind::Timeout,
            ExecutionError::NonZeroExit { .. } => ExecutionErrorKind::NonZeroExit,
            ExecutionError::SpawnFailed { .. } => ExecutionErrorKind::SpawnFailed,
            ExecutionError::Cancelled { .. } => ExecutionErrorKind::Cancelled,
        }
    }

    /// Concrete fix to show next to the message, when one exists.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            ExecutionError::InterpreterUnavailable { .. } => Some(
                "Install the Flex interpreter or point FLEX_CLI_PATH (interpreter.path) at it"
                    .to_string(),
            ),
            ExecutionError::MaterializationFailed { path, .. } => Some(match path {
                Some(path) => format!("Check that {} is writable", path.display()),
                None => "Check that the temp and output directories are writable".to_string(),
            }),
            ExecutionError::ResourceLimitExceeded { breach } => Some(match breach {
                LimitBreach::Memory { .. } => {
                    "Reduce the script's memory use or raise limits.max_memory_mb".to_string()
                }
                LimitBreach::Cpu { .. } => {
                    "Reduce the script's CPU use or raise limits.max_cpu_percent".to_string()
                }
            }),
            ExecutionError::Timeout { .. } => Some(
                "Look for loops that never terminate, or raise the timeout (max 300 seconds)"
                    .to_string(),
            ),
            ExecutionError::NonZeroExit { .. } => {
                Some("Run `flexguard check` on the script to look for defects".to_string())
            }
            ExecutionError::SpawnFailed { .. } => {
                Some("Verify that the interpreter path points to an executable".to_string())
            }
            ExecutionError::Cancelled { .. } => None,
        }
    }

    /// Text reported as `ExecutionResult::error_text`.
    pub fn report_text(&self) -> String {
        match self {
            ExecutionError::NonZeroExit { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Process registry invariant violations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Execution identity already registered: {id}")]
    DuplicateIdentity { id: String },
}

/// CLI argument and command-line interface errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid argument: {argument}")]
    InvalidArgument {
        argument: String,
        message: String,
        suggestion: Option<String>,
    },

    #[error("Conflicting arguments: {first} and {second}")]
    ConflictingArguments {
        first: String,
        second: String,
        suggestion: String,
    },
}

/// Format errors with colors and context
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Format an error with context and colors
    pub fn format_error(&self, error: &FlexError) -> String {
        use tracing::error;

        let error_type = match error {
            FlexError::Config(_) => "config",
            FlexError::Execution(_) => "execution",
            FlexError::Registry(_) => "registry",
            FlexError::Cli(_) => "cli",
            FlexError::Io(_) => "io",
            FlexError::Json(_) => "json",
        };
        error!(error_type = error_type, error = %error, "Operation failed");

        let mut output = String::new();

        if self.use_colors {
            output.push_str("\x1b[31m");
        }
        output.push_str("Error: ");
        if self.use_colors {
            output.push_str("\x1b[0m");
        }

        output.push_str(&error.to_string());

        match error {
            FlexError::Config(config_err) => self.add_config_context(&mut output, config_err),
            FlexError::Execution(exec_err) => {
                if let Some(suggestion) = exec_err.suggestion() {
                    output.push_str(&format!("\n  Help: {suggestion}"));
                }
            }
            FlexError::Cli(cli_err) => self.add_cli_context(&mut output, cli_err),
            _ => {}
        }

        output
    }

    fn add_config_context(&self, output: &mut String, error: &ConfigError) {
        match error {
            ConfigError::InvalidYaml {
                file_path: Some(path),
                line: Some(line),
                ..
            } => {
                output.push_str(&format!("\n  --> {}:{}", path.display(), line));
            }
            ConfigError::NotFound {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            ConfigError::InvalidValue { expected, .. } => {
                output.push_str(&format!("\n  Expected: {expected}"));
            }
            _ => {}
        }
    }

    fn add_cli_context(&self, output: &mut String, error: &CliError) {
        match error {
            CliError::InvalidArgument {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            CliError::ConflictingArguments { suggestion, .. } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            _ => {}
        }
    }
}

/// Exit codes for different error types
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const ANALYSIS_REJECTED: i32 = 4;
    pub const TIMEOUT_ERROR: i32 = 6;
    pub const CLI_ERROR: i32 = 7;
    pub const PROCESS_ERROR: i32 = 9;
    pub const REGISTRY_ERROR: i32 = 10;
}

impl FlexError {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FlexError::Config(_) => exit_codes::CONFIG_ERROR,
            FlexError::Execution(exec_err) => match exec_err.kind() {
                ExecutionErrorKind::Timeout => exit_codes::TIMEOUT_ERROR,
                _ => exit_codes::PROCESS_ERROR,
            },
            FlexError::Registry(_) => exit_codes::REGISTRY_ERROR,
            FlexError::Cli(_) => exit_codes::CLI_ERROR,
            FlexError::Io(_) | FlexError::Json(_) => exit_codes::GENERAL_ERROR,
        }
    }

    /// Create a user-friendly error message with context
    pub fn user_message(&self, use_colors: bool) -> String {
        ErrorFormatter::new(use_colors).format_error(self)
    }
}

impl From<serde_yaml::Error> for Box<ConfigError> {
    fn from(error: serde_yaml::Error) -> Self {
        let location = error.location();
        Box::new(ConfigError::InvalidYaml {
            message: error.to_string(),
            line: location.as_ref().map(|l| l.line() as u32),
            column: location.as_ref().map(|l| l.column() as u32),
            file_path: None,
        })
    }
}

impl From<ExecutionError> for FlexError {
    fn from(error: ExecutionError) -> Self {
        FlexError::Execution(Box::new(error))
    }
}

impl From<RegistryError> for FlexError {
    fn from(error: RegistryError) -> Self {
        FlexError::Registry(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FlexError::Config(Box::new(ConfigError::InvalidValue {
            message: "must be between 1 and 300".to_string(),
            field: "execution.default_timeout_secs".to_string(),
            value: "0".to_string(),
            expected: "1..=300".to_string(),
        }));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration value for execution.default_timeout_secs: must be between 1 and 300"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let flex_error = FlexError::from(io_error);
        assert!(flex_error.to_string().contains("IO operation failed"));
        assert_eq!(flex_error.exit_code(), exit_codes::GENERAL_ERROR);
    }

    #[test]
    fn test_execution_error_kinds_and_exit_codes() {
        let timeout = ExecutionError::Timeout { timeout_secs: 1 };
        assert_eq!(timeout.kind(), ExecutionErrorKind::Timeout);
        assert_eq!(
            FlexError::from(timeout).exit_code(),
            exit_codes::TIMEOUT_ERROR
        );

        let spawn = ExecutionError::SpawnFailed {
            command: "flex".to_string(),
            error: "permission denied".to_string(),
        };
        assert_eq!(spawn.kind(), ExecutionErrorKind::SpawnFailed);
        assert_eq!(FlexError::from(spawn).exit_code(), exit_codes::PROCESS_ERROR);
    }

    #[test]
    fn test_non_zero_exit_report_text_prefers_stderr() {
        let with_stderr = ExecutionError::NonZeroExit {
            exit_code: 2,
            stderr: "undefined variable x\n".to_string(),
        };
        assert_eq!(with_stderr.report_text(), "undefined variable x");

        let silent = ExecutionError::NonZeroExit {
            exit_code: 2,
            stderr: String::new(),
        };
        assert_eq!(silent.report_text(), "Process exited with code 2");
    }

    #[test]
    fn test_resource_limit_message_names_the_resource() {
        let memory = ExecutionError::ResourceLimitExceeded {
            breach: LimitBreach::Memory {
                observed_mb: 600.0,
                limit_mb: 512,
            },
        };
        assert!(memory.to_string().contains("memory limit"));
        assert!(memory.suggestion().unwrap().contains("max_memory_mb"));

        let cpu = ExecutionError::ResourceLimitExceeded {
            breach: LimitBreach::Cpu {
                observed_percent: 97.5,
                limit_percent: 50.0,
            },
        };
        assert!(cpu.to_string().contains("CPU limit"));
    }

    #[test]
    fn test_formatter_adds_help_line() {
        let error = FlexError::from(ExecutionError::Timeout { timeout_secs: 5 });
        let message = error.user_message(false);
        assert!(message.starts_with("Error: "));
        assert!(message.contains("Help: "));
    }
}
