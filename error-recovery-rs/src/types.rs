//! # Recovery Data Model
//!
//! Core value types shared by the recovery subsystem: the closed failure
//! taxonomy, the set of recovery strategies, the per-failure context handed
//! in by callers, and the structured result handed back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our RecoveryError
pub type Result<T, E = RecoveryError> = std::result::Result<T, E>;

/// Errors raised by the fallible edges of the subsystem (setup, persistence,
/// configuration). The recovery flow itself never surfaces these to callers.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("logging initialization error: {0}")]
    Logging(String),

    #[error("learning store I/O error: {0}")]
    Store(#[from] std::io::Error),

    #[error("learning store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Categories of failures the recovery system can handle.
///
/// Classification is total: every raw failure maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The requested tool does not exist or is not registered
    ToolUnavailable,
    /// The tool ran but reported an error
    ToolExecutionError,
    /// Connectivity problem reaching the service
    NetworkError,
    /// The service throttled the request
    RateLimited,
    /// The operation was denied by the host or service
    PermissionError,
    /// The operation did not complete in time
    Timeout,
    /// The host or service ran out of a required resource
    ResourceExhausted,
    /// The request payload was rejected as malformed
    InvalidInput,
    /// The service itself is down or unreachable
    ServiceUnavailable,
}

impl FailureKind {
    /// Stable token used in learning keys, actions, and user messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ToolUnavailable => "tool_unavailable",
            FailureKind::ToolExecutionError => "tool_execution_error",
            FailureKind::NetworkError => "network_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::PermissionError => "permission_error",
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExhausted => "resource_exhausted",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::ServiceUnavailable => "service_unavailable",
        }
    }

    /// All variants, in declaration order. Useful for exhaustive reporting.
    pub fn all() -> &'static [FailureKind] {
        &[
            FailureKind::ToolUnavailable,
            FailureKind::ToolExecutionError,
            FailureKind::NetworkError,
            FailureKind::RateLimited,
            FailureKind::PermissionError,
            FailureKind::Timeout,
            FailureKind::ResourceExhausted,
            FailureKind::InvalidInput,
            FailureKind::ServiceUnavailable,
        ]
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The recovery actions the orchestrator can take for a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Suggest re-running the failed call after an exponential backoff
    RetryWithBackoff,
    /// Substitute a configured alternative service for the failed one
    UseAlternativeService,
    /// Suggest writing a custom script instead of using the failed service
    SuggestCustomScript,
    /// Suggest combining several services to cover for the failed one
    SuggestCrossServiceCoordination,
    /// Continue with reduced functionality and tell the user how
    DegradeGracefully,
    /// Explain the failure clearly; always applicable, never fails
    HumanReadableError,
}

impl RecoveryStrategy {
    /// Stable token used in learning keys and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::RetryWithBackoff => "retry_with_backoff",
            RecoveryStrategy::UseAlternativeService => "use_alternative_service",
            RecoveryStrategy::SuggestCustomScript => "suggest_custom_script",
            RecoveryStrategy::SuggestCrossServiceCoordination => {
                "suggest_cross_service_coordination"
            }
            RecoveryStrategy::DegradeGracefully => "degrade_gracefully",
            RecoveryStrategy::HumanReadableError => "human_readable_error",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Context information about a single failure.
///
/// Immutable once constructed; callers build a fresh context per attempt and
/// bump `retry_count` between attempts.
#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    /// A unique identifier for this failure instance
    pub id: Uuid,
    /// The classified kind of failure
    pub kind: FailureKind,
    /// Raw error text as reported by the failing call
    pub error_message: String,
    /// The service the call was addressed to, when known
    pub service_name: Option<String>,
    /// The agent that issued the call, when known
    pub agent_name: Option<String>,
    /// Free-text description of what the user was trying to do
    pub user_intent: Option<String>,
    /// How many times this operation has already been retried
    pub retry_count: u32,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
    /// Correlation ID for request tracing, when one is active
    pub correlation_id: Option<String>,
}

impl FailureContext {
    /// Creates a new failure context with the given kind and raw error text.
    pub fn new<S: Into<String>>(kind: FailureKind, error_message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            error_message: error_message.into(),
            service_name: None,
            agent_name: None,
            user_intent: None,
            retry_count: 0,
            timestamp: Utc::now(),
            correlation_id: crate::logging::current_correlation_id(),
        }
    }

    /// Builds a context by classifying the raw error text first.
    pub fn classified<S: Into<String>>(error_message: S, service_name: Option<&str>) -> Self {
        let error_message = error_message.into();
        let kind = crate::classifier::classify(&error_message, service_name);
        let mut context = Self::new(kind, error_message);
        context.service_name = service_name.map(str::to_string);
        context
    }

    /// Sets the service name
    pub fn service<S: Into<String>>(mut self, service: S) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// Sets the originating agent name
    pub fn agent<S: Into<String>>(mut self, agent: S) -> Self {
        self.agent_name = Some(agent.into());
        self
    }

    /// Sets the user-intent description
    pub fn user_intent<S: Into<String>>(mut self, intent: S) -> Self {
        self.user_intent = Some(intent.into());
        self
    }

    /// Sets the retry count
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }
}

/// Result of applying one recovery strategy.
///
/// When `success` is false the remaining fields are meaningless and callers
/// must ignore them.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    /// Whether the strategy produced a usable outcome
    pub success: bool,
    /// The strategy that produced this result
    pub strategy_used: RecoveryStrategy,
    /// Machine-readable next action, e.g. `use_<service>` or
    /// `retry_after_<n>_seconds`
    pub alternative_action: Option<String>,
    /// Message suitable for direct display to the end user
    pub user_message: Option<String>,
    /// Whether the caller should re-invoke the original operation
    pub retry_suggested: bool,
    /// Annotation recorded by the learning store when this strategy succeeds
    pub learning_note: Option<String>,
}

impl RecoveryResult {
    /// Creates a successful result for the given strategy.
    pub fn success(strategy: RecoveryStrategy) -> Self {
        Self {
            success: true,
            strategy_used: strategy,
            alternative_action: None,
            user_message: None,
            retry_suggested: false,
            learning_note: None,
        }
    }

    /// Creates a failed result for the given strategy.
    pub fn failure(strategy: RecoveryStrategy) -> Self {
        Self {
            success: false,
            strategy_used: strategy,
            alternative_action: None,
            user_message: None,
            retry_suggested: false,
            learning_note: None,
        }
    }

    /// Sets the machine-readable next action
    pub fn alternative_action<S: Into<String>>(mut self, action: S) -> Self {
        self.alternative_action = Some(action.into());
        self
    }

    /// Sets the user-facing message
    pub fn user_message<S: Into<String>>(mut self, message: S) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Sets whether the caller should retry the original operation
    pub fn retry_suggested(mut self, retry: bool) -> Self {
        self.retry_suggested = retry;
        self
    }

    /// Sets the learning annotation
    pub fn learning_note<S: Into<String>>(mut self, note: S) -> Self {
        self.learning_note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_tokens() {
        assert_eq!(FailureKind::NetworkError.as_str(), "network_error");
        assert_eq!(FailureKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(FailureKind::all().len(), 9);
    }

    #[test]
    fn test_strategy_tokens() {
        assert_eq!(
            RecoveryStrategy::RetryWithBackoff.to_string(),
            "retry_with_backoff"
        );
        assert_eq!(
            RecoveryStrategy::HumanReadableError.as_str(),
            "human_readable_error"
        );
    }

    #[test]
    fn test_context_builder() {
        let context = FailureContext::new(FailureKind::Timeout, "operation timed out")
            .service("fetch_agent")
            .agent("root_agent")
            .user_intent("download a page")
            .retry_count(2);

        assert_eq!(context.kind, FailureKind::Timeout);
        assert_eq!(context.service_name.as_deref(), Some("fetch_agent"));
        assert_eq!(context.agent_name.as_deref(), Some("root_agent"));
        assert_eq!(context.retry_count, 2);
    }

    #[test]
    fn test_result_builder() {
        let result = RecoveryResult::success(RecoveryStrategy::RetryWithBackoff)
            .alternative_action("retry_after_4_seconds")
            .retry_suggested(true);

        assert!(result.success);
        assert!(result.retry_suggested);
        assert_eq!(
            result.alternative_action.as_deref(),
            Some("retry_after_4_seconds")
        );

        let failed = RecoveryResult::failure(RecoveryStrategy::UseAlternativeService);
        assert!(!failed.success);
        assert!(failed.alternative_action.is_none());
    }
}
