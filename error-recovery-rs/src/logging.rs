//! # Structured Logging
//!
//! Logging setup for hosts that do not bring their own subscriber, plus
//! correlation ID tracking so every failure context can be tied back to the
//! request that triggered it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::types::{RecoveryError, Result};

// Thread-local storage for the current correlation ID
thread_local! {
    static CORRELATION_ID: RwLock<Option<String>> = RwLock::new(None);
}

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Keeps the non-blocking file writer alive for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Initializes the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()))
    };

    let file_writer = if config.file_output {
        let dir = config.log_dir.clone().unwrap_or_else(|| "./logs".to_string());
        let appender = tracing_appender::rolling::daily(dir, "error-recovery.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(writer)
    } else {
        None
    };

    let set_result = match (config.json_format, file_writer) {
        (true, Some(writer)) => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .json()
                .finish(),
        ),
        (true, None) => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .finish(),
        ),
        (false, Some(writer)) => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .finish(),
        ),
        (false, None) => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt().with_env_filter(filter()).finish(),
        ),
    };

    set_result.map_err(|err| RecoveryError::Logging(err.to_string()))
}

/// Sets the correlation ID for the current thread.
pub fn set_correlation_id(id: Option<String>) {
    CORRELATION_ID.with(|cell| {
        *cell.write().unwrap() = id;
    });
}

/// Returns the correlation ID for the current thread, if one is set.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.with(|cell| cell.read().unwrap().clone())
}

/// Generates a fresh correlation ID and installs it for the current thread.
pub fn new_correlation_id() -> String {
    let id = Uuid::new_v4().to_string();
    set_correlation_id(Some(id.clone()));
    id
}
