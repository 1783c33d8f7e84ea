//! File logging for callflow.
//!
//! One process-wide sink, opened once by [`init`] from the configured log
//! path. Levels, most to least severe:
//! - ERROR: a recording or task failed
//! - WARN: recoverable trouble (degraded scores, skipped records on load)
//! - INFO: ingestion, task transitions, engine lifecycle
//! - DEBUG: persistence traces
//! - TRACE: per-step merge decisions
//!
//! `--debug` or `CALLFLOW_DEBUG=1` lowers the threshold to DEBUG. Before
//! `init` every macro is a no-op, which is what library embedders and tests
//! get.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

struct Sink {
    file: Mutex<File>,
    threshold: AtomicU8,
}

static SINK: OnceLock<Sink> = OnceLock::new();

/// Open (and truncate) the log file. Later calls keep the first sink.
pub fn init(path: &Path, debug: bool) -> Result<()> {
    let env_debug = std::env::var("CALLFLOW_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let threshold = if debug || env_debug {
        Level::Debug
    } else {
        Level::Info
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let _ = SINK.set(Sink {
        file: Mutex::new(file),
        threshold: AtomicU8::new(threshold as u8),
    });
    Ok(())
}

/// Whether a message at `level` would be written.
pub fn enabled(level: Level) -> bool {
    SINK.get()
        .is_some_and(|sink| level <= Level::from_u8(sink.threshold.load(Ordering::Relaxed)))
}

fn format_line(level: Level, args: fmt::Arguments<'_>) -> String {
    format!(
        "[{}] [{}] {}\n",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        level,
        args
    )
}

/// Macro backend; prefer the `flog!` family.
pub fn write(level: Level, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    if let Some(sink) = SINK.get() {
        let line = format_line(level, args);
        let mut file = crate::util::lock(&sink.file);
        let _ = file.write_all(line.as_bytes());
    }
}

#[macro_export]
macro_rules! flog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Warn, format_args!($($arg)*))
    };
}

/// Only written in debug mode.
#[macro_export]
macro_rules! flog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Trace, format_args!($($arg)*))
    };
}
