// src/logging.rs
//! Optional log4rs setup for programs embedding the engine.
//!
//! The engine itself only logs through the `log` facade. Hosts that have
//! no logger of their own can install this one: a console appender, plus
//! a file appender that always records debug output.

use crate::constants::{
    CONSOLE_APPENDER, FILE_APPENDER, FILE_LOG_PATTERN, QUIET_LOG_PATTERN, VERBOSE_LOG_PATTERN,
};
use crate::error::LoggingError;
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    append::file::FileAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};
use std::fs;
use std::path::PathBuf;

/// Where and how verbosely to log.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Log at debug level on the console (warn otherwise).
    pub verbose: bool,
    /// Also write debug-level logs to this file.
    pub log_file: Option<PathBuf>,
}

/// Builds the log4rs configuration without installing it.
pub fn build_logging_config(options: &LoggingOptions) -> Result<Config, LoggingError> {
    let (console_level, pattern) = if options.verbose {
        (LevelFilter::Debug, VERBOSE_LOG_PATTERN)
    } else {
        (LevelFilter::Warn, QUIET_LOG_PATTERN)
    };

    let stdout_appender = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(console_level)))
            .build(CONSOLE_APPENDER, Box::new(stdout_appender)),
    );
    let mut root = Root::builder().appender(CONSOLE_APPENDER);
    let mut root_level = console_level;

    if let Some(path) = &options.log_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(FILE_LOG_PATTERN)))
            .build(path)?;
        builder = builder.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Debug)))
                .build(FILE_APPENDER, Box::new(file_appender)),
        );
        root = root.appender(FILE_APPENDER);
        root_level = LevelFilter::Debug;
    }

    Ok(builder.build(root.build(root_level))?)
}

/// Installs the logger globally. Fails if a logger is already installed.
pub fn setup_logging(options: &LoggingOptions) -> Result<log4rs::Handle, LoggingError> {
    let config = build_logging_config(options)?;
    let handle = log4rs::init_config(config)?;
    match &options.log_file {
        Some(path) => log::info!("Logging initialized. Log file: {}", path.display()),
        None => log::info!("Logging initialized"),
    }
    Ok(handle)
}
