// Logging configuration and structured event helpers
use flexguard::logging::{init_logging, utils, ColorConfig, LogConfig, LogFormat};
use std::path::PathBuf;
use tracing::Level;

#[test]
fn test_default_level_keeps_stdout_quiet() {
    let config = LogConfig::from_cli(false, false, None);
    assert_eq!(config.level, Level::WARN);
}

#[test]
fn test_verbose_log_level() {
    let config = LogConfig::from_cli(true, false, None);
    assert_eq!(config.level, Level::DEBUG);
}

#[test]
fn test_quiet_log_level() {
    let config = LogConfig::from_cli(false, true, None);
    assert_eq!(config.level, Level::ERROR);
}

#[test]
fn test_color_configuration() {
    let always = LogConfig::from_cli(false, false, Some("always".to_string()));
    assert_eq!(always.color, ColorConfig::Always);
    assert!(always.should_use_colors());

    let never = LogConfig::from_cli(false, false, Some("never".to_string()));
    assert!(!never.should_use_colors());

    let unknown = LogConfig::from_cli(false, false, Some("sometimes".to_string()));
    assert_eq!(unknown.color, ColorConfig::Auto);
}

#[test]
fn test_log_output_formats() {
    for format in [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact] {
        let config = LogConfig::default().with_format(format.clone());
        assert_eq!(config.format, format);
    }
}

#[test]
fn test_init_logging_twice_is_harmless() {
    let config = LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Compact,
        color: ColorConfig::Never,
        show_targets: true,
    };
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_ok());
}

#[test]
fn test_span_helpers() {
    let _ = init_logging(LogConfig::default());

    let analysis = utils::analysis_span(42);
    let _entered = analysis.enter();
    utils::log_analysis_completion("franco", 1, 0, true);
    utils::log_analysis_completion("english", 0, 2, false);

    let execution = utils::execution_span("4f0c9a2e", 30);
    let _inner = execution.enter();
    utils::log_execution_start(Some(4242), &PathBuf::from("temp/demo.flex"));
    utils::log_execution_completion(true, 0, 12);
    utils::log_execution_completion(false, 3, 40);

    let _config = utils::config_loading_span(&PathBuf::from("flexguard.yaml"));
    utils::log_warning_with_context("Script does not have a Flex extension", "demo.txt");
}
