//! # Failure Classification
//!
//! Maps raw error text (and an optional originating-service name) to exactly
//! one [`FailureKind`]. Classification is a pure function with no side
//! effects; the pattern table is matched in order and the first hit wins.

use once_cell::sync::Lazy;

use crate::types::FailureKind;

// Ordered substring patterns. Order is significant: classification must be
// deterministic for messages matching more than one pattern.
static ERROR_PATTERNS: Lazy<Vec<(&'static str, FailureKind)>> = Lazy::new(|| {
    vec![
        ("permission denied", FailureKind::PermissionError),
        ("connection refused", FailureKind::NetworkError),
        ("timeout", FailureKind::Timeout),
        ("rate limit", FailureKind::RateLimited),
        ("not found", FailureKind::ToolUnavailable),
        ("service unavailable", FailureKind::ServiceUnavailable),
        ("invalid argument", FailureKind::InvalidInput),
    ]
});

/// Classifies the kind of failure based on the raw error message.
///
/// Matching is case-insensitive. When no pattern matches, failures from a
/// subprocess-based tool server (service name containing "mcp") default to
/// [`FailureKind::ServiceUnavailable`]; everything else defaults to
/// [`FailureKind::ToolExecutionError`].
pub fn classify(error_message: &str, service_name: Option<&str>) -> FailureKind {
    let lowered = error_message.to_lowercase();

    for (pattern, kind) in ERROR_PATTERNS.iter() {
        if lowered.contains(pattern) {
            return *kind;
        }
    }

    if service_name.map_or(false, |name| name.to_lowercase().contains("mcp")) {
        return FailureKind::ServiceUnavailable;
    }

    FailureKind::ToolExecutionError
}

/// Classifies an HTTP client error structurally, without string matching.
///
/// Useful for callers that still hold the typed error: timeouts, connect
/// failures, and throttling/server statuses carry more signal than their
/// rendered messages.
pub fn classify_reqwest(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::NetworkError
    } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
        FailureKind::RateLimited
    } else if err.status().map_or(false, |s| s.is_server_error()) {
        FailureKind::ServiceUnavailable
    } else {
        FailureKind::ToolExecutionError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_patterns() {
        assert_eq!(
            classify("Permission denied: /etc/shadow", None),
            FailureKind::PermissionError
        );
        assert_eq!(
            classify("connect failed: Connection refused", None),
            FailureKind::NetworkError
        );
        assert_eq!(
            classify("read timeout after 30s", None),
            FailureKind::Timeout
        );
        assert_eq!(
            classify("API rate limit exceeded", None),
            FailureKind::RateLimited
        );
        assert_eq!(
            classify("tool not found in registry", None),
            FailureKind::ToolUnavailable
        );
        assert_eq!(
            classify("503 Service Unavailable", None),
            FailureKind::ServiceUnavailable
        );
        assert_eq!(
            classify("invalid argument: expected a path", None),
            FailureKind::InvalidInput
        );
    }

    #[test]
    fn test_case_insensitive_with_surrounding_text() {
        assert_eq!(
            classify("ERROR: RATE LIMIT hit, slow down", None),
            FailureKind::RateLimited
        );
        assert_eq!(
            classify("upstream said: PeRmIsSiOn DeNiEd.", None),
            FailureKind::PermissionError
        );
    }

    #[test]
    fn test_first_match_wins() {
        // Both "connection refused" and "timeout" appear; table order decides.
        assert_eq!(
            classify("connection refused after timeout", None),
            FailureKind::NetworkError
        );
    }

    #[test]
    fn test_default_classification() {
        assert_eq!(
            classify("something unexpected happened", None),
            FailureKind::ToolExecutionError
        );
        assert_eq!(
            classify("something unexpected happened", Some("mcp_code_executor_agent")),
            FailureKind::ServiceUnavailable
        );
        assert_eq!(
            classify("something unexpected happened", Some("search_agent")),
            FailureKind::ToolExecutionError
        );
        assert_eq!(classify("", Some("MCP-fetch")), FailureKind::ServiceUnavailable);
        assert_eq!(classify("", None), FailureKind::ToolExecutionError);
    }
}
