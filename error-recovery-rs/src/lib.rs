//! # Error Recovery Framework
//!
//! A multi-layered failure recovery subsystem for an agent host that
//! delegates work to named external services (subprocess-based tool servers
//! and built-in agents). Raw failures are classified into a closed taxonomy,
//! matched to an ordered list of recovery strategies, and resolved into a
//! structured suggestion the caller can act on.
//!
//! ## Features
//!
//! - Total classification of raw error text into failure kinds
//! - Per-service health tracking with a three-state circuit breaker
//! - Policy-driven strategy selection with per-kind retry caps
//! - Strategy execution that never fails: a clear explanation is always
//!   produced as the last resort
//! - Durable learning of which strategy worked for which failure
//! - An invocation middleware that drives the retry loop end to end
//!
//! The orchestrator is advisory: it returns suggested actions and backoff
//! waits but never re-invokes anything itself. Construct one
//! [`RecoveryOrchestrator`] per process and share it across call sites.

pub mod classifier;
pub mod config;
pub mod executor;
pub mod health;
pub mod learning;
pub mod logging;
pub mod middleware;
pub mod orchestrator;
pub mod selector;
pub mod types;

// Re-export commonly used types
pub use classifier::{classify, classify_reqwest};
pub use config::RecoveryConfig;
pub use executor::{backoff_delay, StrategyExecutor};
pub use health::{CircuitConfig, CircuitState, HealthReport, ServiceHealthTracker};
pub use learning::{LearnedPattern, LearningConfig, LearningStore};
pub use logging::{current_correlation_id, init_logging, set_correlation_id};
pub use middleware::{CallOutcome, MiddlewareConfig, RecoveryMiddleware};
pub use orchestrator::{FailureStats, RecoveryOrchestrator};
pub use selector::RecoveryStrategySelector;
pub use types::{
    FailureContext, FailureKind, RecoveryError, RecoveryResult, RecoveryStrategy, Result,
};

/// Initializes the recovery framework with default settings.
pub fn init() -> Result<()> {
    logging::init_logging(None)
}

/// Initializes the recovery framework with custom logging settings.
pub fn init_with_logging(config: logging::LoggingConfig) -> Result<()> {
    logging::init_logging(Some(config))
}
