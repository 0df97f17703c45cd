//! # Strategy Selection
//!
//! Decides which recovery strategies apply to a classified failure, in
//! order. The returned list is never empty: [`RecoveryStrategy::HumanReadableError`]
//! is always the final candidate, and it cannot fail, so the orchestrator
//! always terminates with a usable result.

use crate::executor;
use crate::types::{FailureContext, FailureKind, RecoveryStrategy};

/// Maximum retries suggested per failure kind before backoff is dropped
/// from the candidate list.
pub fn retry_cap(kind: FailureKind) -> u32 {
    match kind {
        FailureKind::NetworkError => 3,
        FailureKind::RateLimited => 2,
        FailureKind::Timeout => 2,
        FailureKind::ServiceUnavailable => 3,
        FailureKind::ToolExecutionError => 1,
        _ => 1,
    }
}

/// Produces ordered candidate strategies for a failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryStrategySelector;

impl RecoveryStrategySelector {
    /// Returns the ordered candidate strategies for `context`.
    pub fn candidates(&self, context: &FailureContext) -> Vec<RecoveryStrategy> {
        let mut strategies = Vec::new();

        // Backoff applies to transient failures, while retries remain.
        match context.kind {
            FailureKind::NetworkError
            | FailureKind::RateLimited
            | FailureKind::Timeout
            | FailureKind::ServiceUnavailable => {
                if context.retry_count < retry_cap(context.kind) {
                    strategies.push(RecoveryStrategy::RetryWithBackoff);
                }
            }
            _ => {}
        }

        if matches!(
            context.kind,
            FailureKind::ToolUnavailable | FailureKind::ToolExecutionError
        ) {
            let has_alternative = context
                .service_name
                .as_deref()
                .map_or(false, executor::has_alternative);
            if has_alternative {
                strategies.push(RecoveryStrategy::UseAlternativeService);
            }
            strategies.push(RecoveryStrategy::SuggestCustomScript);
            strategies.push(RecoveryStrategy::SuggestCrossServiceCoordination);
        }

        if matches!(
            context.kind,
            FailureKind::PermissionError | FailureKind::InvalidInput
        ) {
            strategies.push(RecoveryStrategy::DegradeGracefully);
        }

        strategies.push(RecoveryStrategy::HumanReadableError);
        strategies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_ends_with_human_readable_error() {
        let selector = RecoveryStrategySelector;
        for kind in FailureKind::all() {
            for service in [None, Some("filesystem_agent"), Some("unknown_service")] {
                let mut context = FailureContext::new(*kind, "boom");
                context.service_name = service.map(str::to_string);

                let candidates = selector.candidates(&context);
                assert!(!candidates.is_empty());
                assert_eq!(
                    candidates.last(),
                    Some(&RecoveryStrategy::HumanReadableError),
                    "kind {} service {:?}",
                    kind,
                    service
                );
            }
        }
    }

    #[test]
    fn test_retry_first_for_transient_failures() {
        let selector = RecoveryStrategySelector;
        let context = FailureContext::new(FailureKind::NetworkError, "connection refused");
        assert_eq!(
            selector.candidates(&context).first(),
            Some(&RecoveryStrategy::RetryWithBackoff)
        );
    }

    #[test]
    fn test_retry_dropped_at_cap() {
        let selector = RecoveryStrategySelector;
        for (kind, cap) in [
            (FailureKind::NetworkError, 3),
            (FailureKind::RateLimited, 2),
            (FailureKind::Timeout, 2),
            (FailureKind::ServiceUnavailable, 3),
        ] {
            let below = FailureContext::new(kind, "boom").retry_count(cap - 1);
            assert!(selector
                .candidates(&below)
                .contains(&RecoveryStrategy::RetryWithBackoff));

            let at_cap = FailureContext::new(kind, "boom").retry_count(cap);
            assert!(!selector
                .candidates(&at_cap)
                .contains(&RecoveryStrategy::RetryWithBackoff));
        }
    }

    #[test]
    fn test_alternative_gated_on_known_service() {
        let selector = RecoveryStrategySelector;

        let known = FailureContext::new(FailureKind::ToolUnavailable, "tool not found")
            .service("filesystem_agent");
        assert_eq!(
            selector.candidates(&known),
            vec![
                RecoveryStrategy::UseAlternativeService,
                RecoveryStrategy::SuggestCustomScript,
                RecoveryStrategy::SuggestCrossServiceCoordination,
                RecoveryStrategy::HumanReadableError,
            ]
        );

        let unknown = FailureContext::new(FailureKind::ToolUnavailable, "tool not found")
            .service("telemetry_agent");
        assert_eq!(
            selector.candidates(&unknown),
            vec![
                RecoveryStrategy::SuggestCustomScript,
                RecoveryStrategy::SuggestCrossServiceCoordination,
                RecoveryStrategy::HumanReadableError,
            ]
        );
    }

    #[test]
    fn test_degrade_for_permission_and_input_errors() {
        let selector = RecoveryStrategySelector;
        for kind in [FailureKind::PermissionError, FailureKind::InvalidInput] {
            let context = FailureContext::new(kind, "denied");
            assert_eq!(
                selector.candidates(&context),
                vec![
                    RecoveryStrategy::DegradeGracefully,
                    RecoveryStrategy::HumanReadableError,
                ]
            );
        }
    }
}
