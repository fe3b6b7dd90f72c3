// Logging setup for flexguard
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::Result;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format (pretty for terminals, json for programmatic use)
    pub format: LogFormat,
    pub color: ColorConfig,
    /// Whether to show targets (module names)
    pub show_targets: bool,
}

/// Log output format options
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    /// JSON lines, one event per line
    Json,
    Compact,
}

/// Color output configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ColorConfig {
    /// Use colors when stderr is a terminal and NO_COLOR is unset
    Auto,
    Always,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            color: ColorConfig::Auto,
            show_targets: false,
        }
    }
}

impl LogConfig {
    /// Create logging configuration from CLI arguments.
    ///
    /// Script output goes to stdout, so the default level stays at WARN and
    /// `--verbose` opts into the execution lifecycle events.
    pub fn from_cli(verbose: bool, quiet: bool, color: Option<String>) -> Self {
        let level = if quiet {
            Level::ERROR
        } else if verbose {
            Level::DEBUG
        } else {
            Level::WARN
        };

        let color_config = match color.as_deref() {
            Some("always") => ColorConfig::Always,
            Some("never") => ColorConfig::Never,
            _ => ColorConfig::Auto,
        };

        Self {
            level,
            color: color_config,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Check if colors should be used based on configuration and terminal
    pub fn should_use_colors(&self) -> bool {
        match self.color {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => {
                io::stderr().is_terminal()
                    && std::env::var("TERM").map_or(true, |term| term != "dumb")
                    && std::env::var("NO_COLOR").is_err()
            }
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::new(format!("{}={}", crate::NAME, self.level))
    }
}

/// Initialize the global subscriber. Calling it a second time is a no-op.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = config.env_filter();
    let use_colors = config.should_use_colors();

    // try_init fails only when a subscriber is already installed.
    let _ = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_target(config.show_targets)
            .with_ansi(use_colors)
            .with_writer(io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .json()
            .with_writer(io::stderr)
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(env_filter)
            .compact()
            .with_target(config.show_targets)
            .with_ansi(use_colors)
            .with_writer(io::stderr)
            .try_init(),
    };

    Ok(())
}

/// Spans and structured events shared by the analyzer and the executor
pub mod utils {
    use std::path::Path;
    use tracing::{debug, error, info, span, warn, Level, Span};

    pub fn analysis_span(source_len: usize) -> Span {
        span!(Level::DEBUG, "analysis", source_len = source_len)
    }

    pub fn execution_span(execution_id: &str, timeout_secs: u64) -> Span {
        span!(
            Level::INFO,
            "execution",
            execution_id = %execution_id,
            timeout_secs = timeout_secs
        )
    }

    pub fn config_loading_span(config_path: &Path) -> Span {
        span!(Level::DEBUG, "config_loading", path = %config_path.display())
    }

    pub fn log_analysis_completion(
        dialect: &str,
        error_count: usize,
        warning_count: usize,
        critical: bool,
    ) {
        if critical {
            warn!(
                dialect = %dialect,
                error_count = error_count,
                warning_count = warning_count,
                "Critical loop-bound defect found"
            );
        } else {
            debug!(
                dialect = %dialect,
                error_count = error_count,
                warning_count = warning_count,
                "Analysis completed"
            );
        }
    }

    pub fn log_execution_start(pid: Option<u32>, script: &Path) {
        info!(pid = pid, script = %script.display(), "Interpreter started");
    }

    pub fn log_execution_completion(succeeded: bool, exit_code: i32, duration_ms: u128) {
        if succeeded {
            info!(
                exit_code = exit_code,
                duration_ms = duration_ms,
                "Execution completed successfully"
            );
        } else {
            error!(
                exit_code = exit_code,
                duration_ms = duration_ms,
                "Execution failed"
            );
        }
    }

    pub fn log_warning_with_context(message: &str, context: &str) {
        warn!(context = %context, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.color, ColorConfig::Auto);
        assert!(!config.show_targets);
    }

    #[test]
    fn test_log_config_from_cli_verbose() {
        let config = LogConfig::from_cli(true, false, None);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.color, ColorConfig::Auto);
    }

    #[test]
    fn test_log_config_from_cli_quiet_wins() {
        let config = LogConfig::from_cli(true, true, None);
        assert_eq!(config.level, Level::ERROR);
    }

    #[test]
    fn test_log_config_color_never() {
        let config = LogConfig::from_cli(false, false, Some("never".to_string()));
        assert_eq!(config.color, ColorConfig::Never);
        assert!(!config.should_use_colors());
    }

    #[test]
    fn test_with_format() {
        let config = LogConfig::default().with_format(LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
    }
}
