//! # Strategy Execution
//!
//! Applies one recovery strategy to a failure context and produces a
//! structured [`RecoveryResult`]. Strategies never raise: template lookups
//! fall back to generic text, so a malformed or missing entry degrades the
//! message rather than the recovery flow.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tracing::debug;

use crate::types::{FailureContext, FailureKind, RecoveryResult, RecoveryStrategy};

/// Backoff is capped at 30 seconds regardless of retry count.
pub const MAX_BACKOFF_SECS: u64 = 30;

// Which services can stand in for a failed one, best candidate first.
static SERVICE_ALTERNATIVES: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        // The code executor can do file work directly.
        ("filesystem_agent", vec!["mcp_code_executor_agent"]),
        ("search_agent", vec!["perplexity_agent", "fetch_agent"]),
        ("content_scraper_agent", vec!["fetch_agent", "search_agent"]),
        // Fetching can be scripted through the code executor.
        ("fetch_agent", vec!["mcp_code_executor_agent"]),
        ("perplexity_agent", vec!["search_agent"]),
        // No direct stand-in; a custom script is suggested instead.
        ("mcp_code_executor_agent", vec![]),
    ])
});

static SCRIPT_SUGGESTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            "filesystem_agent",
            "I'll write a script through the code executor to handle the file operations directly.",
        ),
        (
            "fetch_agent",
            "I'll write a script that issues the HTTP requests itself to fetch the content.",
        ),
        (
            "content_scraper_agent",
            "I'll write a script that downloads and parses the page content.",
        ),
        (
            "search_agent",
            "I'll write a script that gathers the information from the web directly.",
        ),
    ])
});

const GENERIC_SCRIPT_SUGGESTION: &str = "I'll write a custom script to accomplish this task.";

static COORDINATION_PATTERNS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            "filesystem_agent",
            "I'll use the code executor for the file operations and the search agent to find relevant information.",
        ),
        (
            "search_agent",
            "I'll combine the fetch agent and the research agent to gather comprehensive information.",
        ),
        (
            "content_scraper_agent",
            "I'll use the fetch agent to get the content and the code executor to process it.",
        ),
    ])
});

const GENERIC_COORDINATION: &str = "I'll coordinate multiple agents to accomplish this task.";

static RETRY_AFTER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry[\s_-]*after[\s:_-]*(\d+)").unwrap());

/// Alternatives configured for a service, best candidate first. Empty when
/// the service is unknown or has no stand-in.
pub fn alternatives_for(service_name: &str) -> &'static [&'static str] {
    SERVICE_ALTERNATIVES
        .get(service_name)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Whether at least one alternative is configured for `service_name`.
pub fn has_alternative(service_name: &str) -> bool {
    !alternatives_for(service_name).is_empty()
}

/// Exponential backoff delay: `min(2^retry_count, 30)` seconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let secs = if retry_count >= 5 {
        MAX_BACKOFF_SECS
    } else {
        (1u64 << retry_count).min(MAX_BACKOFF_SECS)
    };
    Duration::from_secs(secs)
}

/// Extracts an explicit "retry after N" delay from raw error text, as rate
/// limited services often spell out their own cooldown.
pub fn suggested_delay(error_message: &str) -> Option<Duration> {
    RETRY_AFTER_PATTERN
        .captures(error_message)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Parses the delay out of a `retry_after_<n>_seconds` action token.
pub fn retry_after_from_action(action: &str) -> Option<Duration> {
    action
        .strip_prefix("retry_after_")?
        .strip_suffix("_seconds")?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Sleeps for `base` plus a random jitter fraction to avoid thundering
/// herds, returning the actual duration slept.
pub async fn sleep_with_jitter(base: Duration, jitter_factor: f64) -> Duration {
    let duration = if jitter_factor > 0.0 {
        let jitter = rand::thread_rng().gen_range(0.0..jitter_factor);
        base.mul_f64(1.0 + jitter)
    } else {
        base
    };
    tokio::time::sleep(duration).await;
    duration
}

/// Applies recovery strategies to failure contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrategyExecutor;

impl StrategyExecutor {
    /// Applies `strategy` to `context`. Never panics; a strategy that does
    /// not apply reports `success = false` instead.
    pub fn apply(&self, strategy: RecoveryStrategy, context: &FailureContext) -> RecoveryResult {
        debug!(
            strategy = %strategy,
            kind = %context.kind,
            service = ?context.service_name,
            "Applying recovery strategy"
        );

        match strategy {
            RecoveryStrategy::RetryWithBackoff => {
                let wait = backoff_delay(context.retry_count).as_secs();
                RecoveryResult::success(strategy)
                    .alternative_action(format!("retry_after_{}_seconds", wait))
                    .user_message(format!(
                        "Retrying in {} seconds due to {}...",
                        wait, context.kind
                    ))
                    .retry_suggested(true)
            }

            RecoveryStrategy::UseAlternativeService => {
                let service = context.service_name.as_deref().unwrap_or_default();
                match alternatives_for(service).first() {
                    Some(alternative) => RecoveryResult::success(strategy)
                        .alternative_action(format!("use_{}", alternative))
                        .user_message(format!(
                            "The {} is unavailable. I'll use {} instead.",
                            service, alternative
                        ))
                        .learning_note(format!("Fallback from {} to {}", service, alternative)),
                    None => RecoveryResult::failure(strategy),
                }
            }

            RecoveryStrategy::SuggestCustomScript => {
                let service = context.service_name.as_deref().unwrap_or_default();
                let message = SCRIPT_SUGGESTIONS
                    .get(service)
                    .copied()
                    .unwrap_or(GENERIC_SCRIPT_SUGGESTION);
                RecoveryResult::success(strategy)
                    .alternative_action("generate_custom_script")
                    .user_message(message)
                    .learning_note(format!("Custom script suggested for {}", context.kind))
            }

            RecoveryStrategy::SuggestCrossServiceCoordination => {
                let service = context.service_name.as_deref().unwrap_or_default();
                let message = COORDINATION_PATTERNS
                    .get(service)
                    .copied()
                    .unwrap_or(GENERIC_COORDINATION);
                RecoveryResult::success(strategy)
                    .alternative_action("coordinate_multiple_agents")
                    .user_message(message)
                    .learning_note(format!("Multi-agent coordination for {}", context.kind))
            }

            RecoveryStrategy::DegradeGracefully => RecoveryResult::success(strategy)
                .user_message(degradation_message(context.kind))
                .learning_note(format!("Graceful degradation for {}", context.kind)),

            RecoveryStrategy::HumanReadableError => {
                // Providing a clear explanation is itself the successful
                // outcome; this strategy is the unconditional last resort.
                RecoveryResult::success(strategy).user_message(helpful_error_message(context))
            }
        }
    }
}

fn degradation_message(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::PermissionError => {
            "I don't have the necessary permissions. I'll provide instructions so you can complete this manually."
        }
        FailureKind::InvalidInput => {
            "The input format isn't quite right. Let me suggest the correct format and try again."
        }
        FailureKind::ResourceExhausted => {
            "System resources are currently limited. I'll provide a simplified approach."
        }
        _ => "I'll provide an alternative approach to accomplish your goal.",
    }
}

fn user_hint(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ToolUnavailable => {
            "This tool isn't available right now. Let me try a different approach."
        }
        FailureKind::NetworkError => {
            "There's a network connectivity issue. This is usually temporary."
        }
        FailureKind::RateLimited => "I've hit a rate limit. I'll wait a moment before trying again.",
        FailureKind::PermissionError => {
            "I don't have the necessary permissions for this operation."
        }
        FailureKind::Timeout => "The operation timed out. Let me try with a simpler approach.",
        FailureKind::InvalidInput => {
            "The input format needs adjustment. Let me help you with the correct format."
        }
        _ => "Let me try a different approach.",
    }
}

/// Combines the raw error text with an actionable hint for the user.
fn helpful_error_message(context: &FailureContext) -> String {
    let hint = user_hint(context.kind);
    if context.error_message.is_empty() {
        hint.to_string()
    } else {
        format!("{}\n{}", context.error_message.trim(), hint)
    }
}
