// flexguard - Library module
// Lexical safety analysis for Flex scripts and a resource-bounded executor
// for the Flex interpreter

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod fixer;
pub mod limits;
pub mod logging;
pub mod materialize;
pub mod monitor;
pub mod patterns;
pub mod pipeline;
pub mod process;
pub mod registry;

// Re-export main types for easier access
pub use analyzer::{
    loop_safety_examples, AnalysisReport, Analyzer, AnalyzerConfig, Finding, FindingKind,
    LoopSafetyExample,
};
pub use config::Settings;
pub use dialect::{classify, SourceDialect};
pub use error::{
    exit_codes, CliError, ConfigError, ExecutionError, ExecutionErrorKind, FlexError,
    RegistryError, Result,
};
pub use executor::{ExecutionRequest, ExecutionResult, ExecutorStats, SandboxExecutor};
pub use fixer::fix_critical_loop_defects;
pub use limits::{PollingOnlyLimiter, ResourceLimiter};
pub use logging::{ColorConfig, LogConfig, LogFormat};
pub use materialize::{FsSourceStore, SourceStore};
pub use monitor::LimitBreach;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use registry::{ExecutionId, ProcessRegistry, ProcessSnapshot};

#[cfg(unix)]
pub use limits::RlimitLimiter;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

// Build information (set by build script)
pub const BUILD_DATE: &str = env!("BUILD_DATE");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
pub const GIT_BRANCH: &str = env!("GIT_BRANCH");
pub const RUST_VERSION: &str = env!("RUST_VERSION");

/// Get formatted version string with build information
pub fn version_info() -> String {
    format!(
        "{NAME} {VERSION} (commit: {GIT_COMMIT}, branch: {GIT_BRANCH}, built: {BUILD_DATE}, rustc: {RUST_VERSION})"
    )
}
