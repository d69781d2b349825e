//! Tracing setup. stdout belongs to the conversation, so logs go to a file
//! (`debug-log` feature) or to stderr when `--verbose` is given.

use std::path::PathBuf;

pub const DEFAULT_FILTER: &str = "mindful=debug";

/// Keeps the non-blocking writer alive; drop it last.
pub enum LogGuard {
    #[cfg(feature = "debug-log")]
    File(tracing_appender::non_blocking::WorkerGuard),
    Stderr,
}

#[cfg(feature = "debug-log")]
mod inner {
    use super::{LogGuard, PathBuf};
    use std::fs;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    static LOG_PATH: std::sync::OnceLock<PathBuf> = std::sync::OnceLock::new();

    pub fn init(_verbose: bool) -> Option<LogGuard> {
        let log_path = PathBuf::from("mindful-debug.log");

        let file = match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Failed to open log file: {e}");
                return None;
            }
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        );

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Failed to set tracing subscriber");
            return None;
        }

        LOG_PATH.set(log_path).ok();

        tracing::info!("Debug logging initialized");

        Some(LogGuard::File(guard))
    }

    pub fn log_file_path() -> Option<&'static PathBuf> {
        LOG_PATH.get()
    }
}

#[cfg(not(feature = "debug-log"))]
mod inner {
    use super::{DEFAULT_FILTER, LogGuard, PathBuf};
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    pub fn init(verbose: bool) -> Option<LogGuard> {
        if !verbose {
            return None;
        }

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        );

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Failed to set tracing subscriber");
            return None;
        }

        Some(LogGuard::Stderr)
    }

    #[inline(always)]
    pub const fn log_file_path() -> Option<&'static PathBuf> {
        None
    }
}

pub use inner::*;
