// CLI interface for flexguard using clap
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::analyzer::{loop_safety_examples, Analyzer, AnalyzerConfig};
use crate::config::Settings;
use crate::error::{exit_codes, CliError, ErrorFormatter, ExecutionErrorKind, FlexError, Result};
use crate::executor::{ExecutionRequest, ExecutionResult, SandboxExecutor};
use crate::fixer::fix_critical_loop_defects;
use crate::pipeline::{Pipeline, PipelineOutcome};

#[derive(Parser)]
#[command(
    name = "flexguard",
    about = "flexguard - Check Flex scripts for unsafe loops and run them under resource limits",
    version = crate::VERSION,
    long_about = "flexguard analyzes Flex source for syntax and safety defects (most importantly inclusive l7d loops bounded by length()) and only hands accepted scripts to the Flex interpreter, under a timeout and memory/CPU ceilings."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path (defaults to flexguard.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Control color output (auto, always, never)
    #[arg(long, global = true, value_name = "WHEN")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a Flex script without running it
    Check {
        /// Script to analyze
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Rewrite inclusive loop bounds to their safe form
    Fix {
        /// Script to fix
        file: PathBuf,

        /// Write the fixed source back to the file instead of stdout
        #[arg(short, long)]
        write: bool,
    },

    /// Analyze a script and run it if it passes
    Run {
        /// Script to run
        file: PathBuf,

        /// Timeout in seconds (1-300)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Apply the loop-bound auto-fix before analysis
        #[arg(long)]
        fix: bool,

        /// Keep the executed copy in the output directory, optionally under NAME
        #[arg(long, value_name = "NAME", num_args = 0..=1, default_missing_value = "")]
        save: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check that the Flex interpreter is available and show executor settings
    Probe {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show safe and unsafe loop examples
    Examples,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        shell: Shell,
    },
}

impl Cli {
    pub fn run(&self) -> Result<i32> {
        self.init_logging();

        if self.verbose && self.quiet {
            return Err(FlexError::Cli(Box::new(CliError::ConflictingArguments {
                first: "--verbose".to_string(),
                second: "--quiet".to_string(),
                suggestion:
                    "Use either --verbose for more output or --quiet for less output, but not both"
                        .to_string(),
            })));
        }

        match &self.command {
            Commands::Completion { shell } => {
                let mut cmd = Self::command();
                let name = cmd.get_name().to_string();
                generate(*shell, &mut cmd, name, &mut std::io::stdout());
                Ok(exit_codes::SUCCESS)
            }
            Commands::Examples => {
                print_examples();
                Ok(exit_codes::SUCCESS)
            }
            _ => {
                let settings = Settings::load(self.config.as_deref())?;
                tokio::runtime::Runtime::new()?.block_on(self.run_with(settings))
            }
        }
    }

    async fn run_with(&self, settings: Settings) -> Result<i32> {
        let analyzer = Analyzer::new(AnalyzerConfig::from(&settings.analysis));

        match &self.command {
            Commands::Check { file, format } => {
                let source = read_script(file, &settings)?;
                let report = analyzer.analyze(&source);
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                    OutputFormat::Text => print!("{report}"),
                }
                Ok(if report.is_acceptable() {
                    exit_codes::SUCCESS
                } else {
                    exit_codes::ANALYSIS_REJECTED
                })
            }
            Commands::Fix { file, write } => {
                let source = read_script(file, &settings)?;
                let fixed = fix_critical_loop_defects(&source);
                if *write {
                    if fixed == source {
                        self.note("No inclusive loop bounds to fix");
                    } else {
                        std::fs::write(file, &fixed)?;
                        self.note(&format!("Fixed loop bounds in {}", file.display()));
                    }
                } else {
                    print!("{fixed}");
                }
                Ok(exit_codes::SUCCESS)
            }
            Commands::Run {
                file,
                timeout,
                fix,
                save,
                format,
            } => {
                let source = read_script(file, &settings)?;
                let mut template = ExecutionRequest::new(String::new()).with_timeout(
                    timeout.unwrap_or(settings.execution.default_timeout_secs),
                );
                if let Some(name) = save {
                    template = template.persisted(Some(name.clone()).filter(|n| !n.is_empty()));
                }

                let executor = Arc::new(SandboxExecutor::new(settings));
                let pipeline = Pipeline::new(analyzer, Arc::clone(&executor)).with_auto_fix(*fix);
                let outcome = pipeline.run(&source, &template).await?;
                executor.shutdown().await;

                if *format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                } else {
                    self.print_outcome(&outcome);
                }
                Ok(outcome_exit_code(&outcome))
            }
            Commands::Probe { format } => {
                let executor = SandboxExecutor::new(settings);
                let stats = executor.stats().await;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                    OutputFormat::Text => {
                        match &stats.interpreter_version {
                            Some(version) => println!("interpreter: {} ({version})", stats.interpreter),
                            None => println!("interpreter: {} (unavailable)", stats.interpreter),
                        }
                        println!("default timeout: {}s", stats.default_timeout_secs);
                        println!("memory limit: {}MB", stats.max_memory_mb);
                        match stats.max_cpu_percent {
                            Some(cpu) => println!("cpu limit: {cpu}%"),
                            None => println!("cpu limit: disabled"),
                        }
                        println!("limiter: {}", stats.limiter);
                    }
                }
                Ok(if stats.interpreter_available {
                    exit_codes::SUCCESS
                } else {
                    exit_codes::PROCESS_ERROR
                })
            }
            Commands::Examples | Commands::Completion { .. } => Ok(exit_codes::SUCCESS),
        }
    }

    fn print_outcome(&self, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Rejected { report, .. } => {
                eprint!("{report}");
                eprintln!("Execution blocked: fix the errors above and try again");
            }
            PipelineOutcome::Executed { report, result, .. } => {
                if !self.quiet {
                    for warning in report.warnings() {
                        eprintln!("warning: {warning}");
                    }
                }
                print!("{}", result.stdout_text);
                if !result.succeeded {
                    print_failure(result, self.use_colors());
                }
            }
        }
    }

    fn note(&self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn use_colors(&self) -> bool {
        crate::logging::LogConfig::from_cli(self.verbose, self.quiet, self.color.clone())
            .should_use_colors()
    }

    fn init_logging(&self) {
        use crate::logging::{init_logging, LogConfig};

        let log_config = LogConfig::from_cli(self.verbose, self.quiet, self.color.clone());

        if let Err(e) = init_logging(log_config) {
            eprintln!("Failed to initialize logging: {e}");
        }
    }
}

fn read_script(path: &Path, settings: &Settings) -> Result<String> {
    if !path.is_file() {
        return Err(FlexError::Cli(Box::new(CliError::InvalidArgument {
            argument: path.display().to_string(),
            message: "script not found".to_string(),
            suggestion: Some("Pass the path of an existing .flex file".to_string()),
        })));
    }
    if !settings.execution.has_flex_extension(path) {
        warn!(
            path = %path.display(),
            extensions = ?settings.execution.file_extensions,
            "Script does not have a Flex extension"
        );
    }
    Ok(std::fs::read_to_string(path)?)
}

fn print_failure(result: &ExecutionResult, use_colors: bool) {
    if !result.stderr_text.is_empty() && result.error_kind != Some(ExecutionErrorKind::NonZeroExit)
    {
        eprint!("{}", result.stderr_text);
    }
    if let Some(error_text) = &result.error_text {
        let prefix = if use_colors {
            "\x1b[31mError: \x1b[0m"
        } else {
            "Error: "
        };
        eprintln!("{prefix}{error_text}");
    }
    if let Some(suggestion) = &result.suggestion {
        eprintln!("  Help: {suggestion}");
    }
}

fn print_examples() {
    for example in loop_safety_examples() {
        let verdict = if example.is_safe { "SAFE" } else { "UNSAFE" };
        println!("== {} [{verdict}]: {}", example.name, example.description);
        println!("{}", example.code);
    }
}

/// Map a pipeline outcome to the process exit code.
pub fn outcome_exit_code(outcome: &PipelineOutcome) -> i32 {
    match outcome {
        PipelineOutcome::Rejected { .. } => exit_codes::ANALYSIS_REJECTED,
        PipelineOutcome::Executed { result, .. } if result.succeeded => exit_codes::SUCCESS,
        PipelineOutcome::Executed { result, .. } if result.is_timeout() => {
            exit_codes::TIMEOUT_ERROR
        }
        PipelineOutcome::Executed { .. } => exit_codes::PROCESS_ERROR,
    }
}

/// Render a top-level error for stderr.
pub fn format_error(error: &FlexError, use_colors: bool) -> String {
    ErrorFormatter::new(use_colors).format_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_version() {
        let cli = Cli::try_parse_from(["flexguard", "--version"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["flexguard"]).is_err());
    }

    #[test]
    fn test_check_defaults() {
        let cli = Cli::try_parse_from(["flexguard", "check", "demo.flex"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
        match cli.command {
            Commands::Check { file, format } => {
                assert_eq!(file, PathBuf::from("demo.flex"));
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_run_options() {
        let cli = Cli::try_parse_from([
            "flexguard", "run", "demo.flex", "--timeout", "5", "--fix", "--save", "kept",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                timeout, fix, save, ..
            } => {
                assert_eq!(timeout, Some(5));
                assert!(fix);
                assert_eq!(save.as_deref(), Some("kept"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_save_without_name() {
        let cli = Cli::try_parse_from(["flexguard", "run", "demo.flex", "--save"]).unwrap();
        match cli.command {
            Commands::Run { save, .. } => assert_eq!(save.as_deref(), Some("")),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["flexguard", "probe", "--color", "never", "-c", "alt.yaml"])
                .unwrap();
        assert_eq!(cli.color.as_deref(), Some("never"));
        assert_eq!(cli.config, Some(PathBuf::from("alt.yaml")));
    }
}
