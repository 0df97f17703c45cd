//! # Invocation Middleware
//!
//! Wraps a service call with the full recovery loop: the circuit breaker is
//! consulted before the call, the outcome is recorded after it, and on
//! failure the orchestrator's suggestion is honored (including the backoff
//! sleep) up to a bounded number of attempts.
//!
//! The middleware is the only place in the subsystem that actually sleeps
//! or re-invokes anything; the orchestrator itself stays advisory.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::executor::{backoff_delay, retry_after_from_action, sleep_with_jitter, suggested_delay};
use crate::orchestrator::RecoveryOrchestrator;
use crate::types::{FailureContext, FailureKind, RecoveryResult, RecoveryStrategy};

/// Configuration for the invocation middleware
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Maximum attempts per invocation, including the first
    pub max_attempts: u32,
    /// Jitter factor applied to backoff sleeps (0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            jitter_factor: 0.1,
        }
    }
}

/// Outcome of an invocation driven through the middleware.
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// The operation completed and returned a value
    Completed(T),
    /// The operation kept failing; the recovery result describes what
    /// happened and what to tell the user
    Unrecovered(RecoveryResult),
}

impl<T> CallOutcome<T> {
    /// Returns true if the operation completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, CallOutcome::Completed(_))
    }

    /// The completed value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            CallOutcome::Completed(value) => Some(value),
            CallOutcome::Unrecovered(_) => None,
        }
    }

    /// The message to surface to the user when the call was not completed.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            CallOutcome::Completed(_) => None,
            CallOutcome::Unrecovered(result) => result.user_message.as_deref(),
        }
    }
}

/// Drives service invocations through the recovery loop.
#[derive(Debug, Clone)]
pub struct RecoveryMiddleware {
    orchestrator: Arc<RecoveryOrchestrator>,
    config: MiddlewareConfig,
}

impl RecoveryMiddleware {
    /// Creates a middleware around a shared orchestrator.
    pub fn new(orchestrator: Arc<RecoveryOrchestrator>, config: MiddlewareConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Invokes `operation` against `service_name` with recovery.
    ///
    /// The operation is re-invoked while the orchestrator suggests retrying,
    /// sleeping the suggested backoff between attempts. Any other suggestion
    /// (service substitution, script generation, a plain explanation) is
    /// returned to the caller to act on.
    pub async fn invoke<F, Fut, T, E>(
        &self,
        service_name: &str,
        user_intent: Option<&str>,
        mut operation: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let health = self.orchestrator.health();

        for attempt in 0..self.config.max_attempts {
            if !health.may_attempt(service_name) {
                let mut context = FailureContext::new(
                    FailureKind::ServiceUnavailable,
                    format!("Circuit breaker open for {}", service_name),
                )
                .service(service_name)
                .retry_count(attempt);
                if let Some(intent) = user_intent {
                    context = context.user_intent(intent);
                }

                let result = self.orchestrator.handle(context).await;
                if self.should_retry(&result, attempt) {
                    self.wait_before_retry(&result, None, attempt).await;
                    continue;
                }
                return CallOutcome::Unrecovered(result);
            }

            match operation().await {
                Ok(value) => {
                    health.record_outcome(service_name, true);
                    return CallOutcome::Completed(value);
                }
                Err(err) => {
                    health.record_outcome(service_name, false);
                    let message = err.to_string();
                    debug!(
                        service = %service_name,
                        attempt = attempt,
                        error = %message,
                        "Service call failed"
                    );

                    let mut context =
                        FailureContext::classified(message.clone(), Some(service_name))
                            .retry_count(attempt);
                    if let Some(intent) = user_intent {
                        context = context.user_intent(intent);
                    }

                    let result = self.orchestrator.handle(context).await;
                    if self.should_retry(&result, attempt) {
                        self.wait_before_retry(&result, Some(&message), attempt).await;
                        continue;
                    }
                    return CallOutcome::Unrecovered(result);
                }
            }
        }

        warn!(
            service = %service_name,
            attempts = self.config.max_attempts,
            "Giving up after repeated failures"
        );
        CallOutcome::Unrecovered(
            RecoveryResult::failure(RecoveryStrategy::HumanReadableError).user_message(format!(
                "Operation failed after {} attempts",
                self.config.max_attempts
            )),
        )
    }

    fn should_retry(&self, result: &RecoveryResult, attempt: u32) -> bool {
        result.success && result.retry_suggested && attempt + 1 < self.config.max_attempts
    }

    // An explicit retry-after in the error text wins over the suggested
    // action token, which wins over recomputing the backoff locally.
    async fn wait_before_retry(
        &self,
        result: &RecoveryResult,
        error_message: Option<&str>,
        attempt: u32,
    ) {
        let delay = error_message
            .and_then(suggested_delay)
            .or_else(|| {
                result
                    .alternative_action
                    .as_deref()
                    .and_then(retry_after_from_action)
            })
            .unwrap_or_else(|| backoff_delay(attempt));

        sleep_with_jitter(delay, self.config.jitter_factor).await;
    }
}
