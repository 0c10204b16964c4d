//! Structured logging system with visual formatting.
//!
//! This module provides the logging layer used across twilightr. Output is
//! written as a vertical "pipe" of box-drawing characters so that the trigger
//! history of a long-running scheduler reads as one continuous log.
//!
//! Logging can be switched off at runtime (tests do this to keep output quiet)
//! and routed to a file through a background writer thread.

use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

// Use an AtomicBool instead of thread_local for thread safety
static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);

// Channel for routing output to file when --log is active
static LOG_CHANNEL: OnceLock<Option<Sender<LogMessage>>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Main logging interface providing structured output formatting.
///
/// ## Logging Conventions
///
/// - **`log_block_start!`**: opens a new conceptual block (a trigger being
///   handled, a state being published). Prints an empty `┃` then `┣ message`.
/// - **`log_decorated!`**: a line that belongs to the current block (`┣ message`).
/// - **`log_indented!`**: nested detail for the line above (`┃   message`).
/// - **`log_pipe!`**: a single empty `┃`, used before a semantic
///   `log_warning!`/`log_error!`/`log_info!`/`log_debug!` that starts a block.
/// - **`log_version!`** / **`log_end!`**: the startup header and the final marker.
pub struct Log;

impl Log {
    /// Enable or disable logging temporarily.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Check if logging is currently enabled.
    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Start file logging to the specified path.
    ///
    /// All subsequent output is written to the file (without ANSI colours)
    /// instead of stdout. The returned guard flushes and joins the writer
    /// thread when dropped.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(Some(tx.clone()))
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::Builder::new()
            .name("twilightr-log".to_string())
            .spawn(move || {
                let mut file = std::fs::File::create(&file_path)?;

                loop {
                    match rx.recv() {
                        Ok(LogMessage::Formatted(text)) => {
                            file.write_all(text.as_bytes())?;
                        }
                        Ok(LogMessage::Shutdown) | Err(_) => {
                            file.flush()?;
                            break;
                        }
                    }
                }

                Ok::<(), anyhow::Error>(())
            })?;

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Timestamp prefix for each log line.
    ///
    /// Only file output is timestamped; the interactive pipe stays clean.
    pub fn get_timestamp_prefix() -> String {
        if let Some(Some(_)) = LOG_CHANNEL.get() {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
        } else {
            String::new()
        }
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// Helper function to strip ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next(); // consume '['
                for ch in chars.by_ref() {
                    if ch == 'm' {
                        break;
                    }
                }
            } else {
                result.push(ch);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// Public function that routes output (needed by macros)
pub fn write_output(text: &str) {
    if let Some(Some(tx)) = LOG_CHANNEL.get() {
        // Send to file logger thread - strip ANSI codes for clean file output
        let clean_text = strip_ansi_codes(text);
        let _ = tx.send(LogMessage::Formatted(clean_text));
    } else {
        // Normal output with colors
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Write one line: timestamp prefix, `lead`, then the message.
///
/// With `open_block`, an empty pipe line goes first. Does nothing while
/// logging is disabled; the message is only formatted when it is written.
#[doc(hidden)]
pub fn emit(open_block: bool, lead: &str, message: std::fmt::Arguments<'_>) {
    if !Log::is_enabled() {
        return;
    }
    let prefix = Log::get_timestamp_prefix();
    let pipe = if open_block {
        format!("{prefix}┃\n")
    } else {
        String::new()
    };
    write_output(&format!("{pipe}{prefix}{lead}{message}\n"));
}

/// Line leads used by the macros.
#[doc(hidden)]
pub mod leads {
    pub const DECORATED: &str = "┣ ";
    pub const INDENTED: &str = "┃   ";
    pub const WARNING: &str = "┣[\x1b[33mWARNING\x1b[0m] ";
    pub const ERROR: &str = "┣[\x1b[31mERROR\x1b[0m] ";
    pub const ERROR_EXIT: &str = "┗[\x1b[31mERROR\x1b[0m] ";
    pub const INFO: &str = "┣[\x1b[32mINFO\x1b[0m] ";
    pub const DEBUG: &str = "┣[\x1b[32mDEBUG\x1b[0m] ";
}

// # Logging Macros
//
// Each macro takes either a format string with arguments or a single
// displayable expression.

/// A line belonging to the current block.
#[macro_export]
macro_rules! log_decorated {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::DECORATED, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::DECORATED, format_args!("{}", $expr))
    };
}

/// Nested detail for the line above.
#[macro_export]
macro_rules! log_indented {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::INDENTED, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::INDENTED, format_args!("{}", $expr))
    };
}

/// A single empty pipe line.
#[macro_export]
macro_rules! log_pipe {
    () => {
        $crate::logger::emit(false, "┃", format_args!(""))
    };
}

/// Open a new block: an empty pipe line, then the message.
#[macro_export]
macro_rules! log_block_start {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(true, $crate::logger::leads::DECORATED, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(true, $crate::logger::leads::DECORATED, format_args!("{}", $expr))
    };
}

/// Startup header with the crate version.
#[macro_export]
macro_rules! log_version {
    () => {
        $crate::logger::emit(
            false,
            "┏ ",
            format_args!("twilightr v{} ━━╸", env!("CARGO_PKG_VERSION")),
        )
    };
}

/// Final marker closing the pipe.
#[macro_export]
macro_rules! log_end {
    () => {
        $crate::logger::emit(false, "╹", format_args!(""))
    };
}

/// Warning in yellow.
#[macro_export]
macro_rules! log_warning {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::WARNING, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::WARNING, format_args!("{}", $expr))
    };
}

/// Error in red.
#[macro_export]
macro_rules! log_error {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::ERROR, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::ERROR, format_args!("{}", $expr))
    };
}

/// Error that ends the pipe, used right before exiting.
#[macro_export]
macro_rules! log_error_exit {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(true, $crate::logger::leads::ERROR_EXIT, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(true, $crate::logger::leads::ERROR_EXIT, format_args!("{}", $expr))
    };
}

/// Informational message in green.
#[macro_export]
macro_rules! log_info {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::INFO, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::INFO, format_args!("{}", $expr))
    };
}

/// Operational detail, shown with `--debug`.
#[macro_export]
macro_rules! log_debug {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit(false, $crate::logger::leads::DEBUG, format_args!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit(false, $crate::logger::leads::DEBUG, format_args!("{}", $expr))
    };
}
