// src/constants.rs
//! Named constants for the ambient parts of the engine.

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Console pattern when verbose output is requested.
pub const VERBOSE_LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}";

/// Console pattern for normal output: the message alone.
pub const QUIET_LOG_PATTERN: &str = "{m}{n}";

/// Pattern for the log file, which always records timestamps and targets.
pub const FILE_LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}";

/// Appender names registered with log4rs.
pub const CONSOLE_APPENDER: &str = "stdout";
pub const FILE_APPENDER: &str = "file";
