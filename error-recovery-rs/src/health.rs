//! # Service Health Tracking
//!
//! Per-service success/failure accounting driving a three-state circuit
//! breaker (Closed, Open, Half-Open). The tracker is consulted before and
//! after every call to an external service; all state changes for one
//! service happen under a single lock so concurrent tasks never interleave
//! a read-modify-write.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked until the cooldown elapses
    Open,
    /// Testing recovery, a single probe request allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Configuration for the per-service circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Minimum recorded attempts before the failure rate is considered
    pub min_attempts: u64,
    /// Failure rate strictly above which the circuit opens
    pub failure_threshold: f64,
    /// Time an open circuit waits before permitting a probe
    pub cooldown: Duration,
    /// Failure rate above which a closed circuit reports as degraded
    pub degraded_threshold: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            min_attempts: 5,
            failure_threshold: 0.5,
            cooldown: Duration::from_secs(30),
            degraded_threshold: 0.3,
        }
    }
}

/// Health record for a single service
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    /// Number of recorded failures
    pub failure_count: u64,
    /// Number of recorded successes
    pub success_count: u64,
    /// Wall-clock time of the last recorded failure
    pub last_failure: Option<DateTime<Utc>>,
    /// Wall-clock time of the last recorded success
    pub last_success: Option<DateTime<Utc>>,
    /// Current circuit state
    pub circuit_state: CircuitState,
    /// Monotonic time of the last state change, drives the cooldown
    last_state_change: Instant,
    /// Whether the single half-open probe has been handed out
    probe_in_flight: bool,
}

impl ServiceHealth {
    fn new() -> Self {
        Self {
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            circuit_state: CircuitState::Closed,
            last_state_change: Instant::now(),
            probe_in_flight: false,
        }
    }

    /// Total recorded attempts for this service.
    pub fn total_attempts(&self) -> u64 {
        self.failure_count + self.success_count
    }

    /// Fraction of recorded attempts that failed, 0 when nothing recorded.
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            0.0
        } else {
            self.failure_count as f64 / total as f64
        }
    }
}

/// Per-service status row in a [`HealthReport`]
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Fraction of recorded attempts that failed
    pub failure_rate: f64,
    /// Current circuit state
    pub circuit_state: CircuitState,
    /// Wall-clock time of the last recorded failure
    pub last_failure: Option<DateTime<Utc>>,
    /// Wall-clock time of the last recorded success
    pub last_success: Option<DateTime<Utc>>,
}

/// Snapshot of every known service, bucketed by availability
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    /// Services operating normally
    pub healthy: Vec<String>,
    /// Services with an elevated failure rate but a usable circuit
    pub degraded: Vec<String>,
    /// Services whose circuit is open
    pub unavailable: Vec<String>,
    /// Full status rows keyed by service name
    pub services: HashMap<String, ServiceStatus>,
}

/// Tracks health for every known service and gates calls through the
/// circuit breaker.
#[derive(Debug)]
pub struct ServiceHealthTracker {
    config: CircuitConfig,
    services: RwLock<HashMap<String, ServiceHealth>>,
}

impl ServiceHealthTracker {
    /// Creates a tracker with the given circuit configuration.
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Records the outcome of a call to `service_name` and applies any
    /// circuit transition it triggers.
    pub fn record_outcome(&self, service_name: &str, success: bool) {
        let mut services = self.services.write().unwrap();
        let health = services
            .entry(service_name.to_string())
            .or_insert_with(ServiceHealth::new);

        if success {
            health.success_count += 1;
            health.last_success = Some(Utc::now());
            counter!(format!("recovery.service.{}.success", service_name), 1);

            if health.circuit_state == CircuitState::HalfOpen {
                health.circuit_state = CircuitState::Closed;
                health.last_state_change = Instant::now();
                health.failure_count = 0;
                health.probe_in_flight = false;

                info!(
                    circuit = %service_name,
                    "Circuit CLOSED: probe succeeded, service recovered"
                );
                emit_state(service_name, CircuitState::Closed);
            }
        } else {
            health.failure_count += 1;
            health.last_failure = Some(Utc::now());
            counter!(format!("recovery.service.{}.failure", service_name), 1);

            match health.circuit_state {
                CircuitState::Closed => {
                    if health.total_attempts() >= self.config.min_attempts
                        && health.failure_rate() > self.config.failure_threshold
                    {
                        health.circuit_state = CircuitState::Open;
                        health.last_state_change = Instant::now();

                        warn!(
                            circuit = %service_name,
                            failure_rate = %format!("{:.2}", health.failure_rate()),
                            attempts = %health.total_attempts(),
                            "Circuit OPEN: failure threshold exceeded"
                        );
                        emit_state(service_name, CircuitState::Open);
                    }
                }
                CircuitState::HalfOpen => {
                    // Any failure during the probe re-opens and restarts the clock.
                    health.circuit_state = CircuitState::Open;
                    health.last_state_change = Instant::now();
                    health.probe_in_flight = false;

                    warn!(
                        circuit = %service_name,
                        "Circuit REOPENED: probe failed"
                    );
                    emit_state(service_name, CircuitState::Open);
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Returns whether a call to `service_name` is currently allowed.
    ///
    /// Returns false only while the circuit is open and the cooldown has not
    /// elapsed. An open circuit whose cooldown has elapsed transitions to
    /// half-open as a side effect and hands out exactly one probe.
    pub fn may_attempt(&self, service_name: &str) -> bool {
        let mut services = self.services.write().unwrap();
        let health = match services.get_mut(service_name) {
            Some(health) => health,
            // Unknown services start closed.
            None => return true,
        };

        match health.circuit_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = health.last_state_change.elapsed();
                if elapsed >= self.config.cooldown {
                    health.circuit_state = CircuitState::HalfOpen;
                    health.last_state_change = Instant::now();
                    health.probe_in_flight = true;

                    info!(
                        circuit = %service_name,
                        "Circuit HALF-OPEN: permitting a probe call"
                    );
                    emit_state(service_name, CircuitState::HalfOpen);
                    true
                } else {
                    let remaining = self.config.cooldown.checked_sub(elapsed).unwrap_or_default();
                    debug!(
                        circuit = %service_name,
                        remaining_ms = %remaining.as_millis(),
                        "Circuit open, request rejected"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                if !health.probe_in_flight {
                    health.probe_in_flight = true;
                    true
                } else if health.last_state_change.elapsed() >= self.config.cooldown {
                    // A probe that never reported back would wedge the
                    // circuit; allow another one per cooldown window.
                    health.last_state_change = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Current health record for one service, if any outcome was recorded
    /// or an attempt was gated.
    pub fn health_of(&self, service_name: &str) -> Option<ServiceHealth> {
        self.services.read().unwrap().get(service_name).cloned()
    }

    /// Builds a bucketed report over every known service.
    pub fn report(&self) -> HealthReport {
        let services = self.services.read().unwrap();
        let mut report = HealthReport::default();

        for (name, health) in services.iter() {
            report.services.insert(
                name.clone(),
                ServiceStatus {
                    name: name.clone(),
                    failure_rate: health.failure_rate(),
                    circuit_state: health.circuit_state,
                    last_failure: health.last_failure,
                    last_success: health.last_success,
                },
            );

            if health.circuit_state == CircuitState::Open {
                report.unavailable.push(name.clone());
            } else if health.failure_rate() > self.config.degraded_threshold {
                report.degraded.push(name.clone());
            } else {
                report.healthy.push(name.clone());
            }
        }

        report
    }
}

fn emit_state(service_name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!(format!("recovery.circuit.{}.state", service_name), value);
    counter!(format!("recovery.circuit.{}.transitions", service_name), 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            cooldown: Duration::from_millis(50),
            ..CircuitConfig::default()
        }
    }

    #[test]
    fn test_circuit_opens_above_threshold() {
        let tracker = ServiceHealthTracker::new(CircuitConfig::default());
        let service = "fetch_agent";

        tracker.record_outcome(service, false);
        tracker.record_outcome(service, false);
        tracker.record_outcome(service, true);
        tracker.record_outcome(service, true);
        // 4 attempts: below the minimum, still closed.
        assert!(tracker.may_attempt(service));

        tracker.record_outcome(service, false);
        // 5 attempts at 60% failures: open.
        let health = tracker.health_of(service).unwrap();
        assert_eq!(health.circuit_state, CircuitState::Open);
        assert!(!tracker.may_attempt(service));
    }

    #[test]
    fn test_circuit_stays_closed_at_exact_threshold() {
        let tracker = ServiceHealthTracker::new(CircuitConfig::default());
        let service = "search_agent";

        for _ in 0..3 {
            tracker.record_outcome(service, true);
        }
        for _ in 0..3 {
            tracker.record_outcome(service, false);
        }
        // 50% is not strictly above the threshold.
        let health = tracker.health_of(service).unwrap();
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert!(tracker.may_attempt(service));
    }

    #[test_log::test(tokio::test)]
    async fn test_half_open_allows_single_probe() {
        let tracker = ServiceHealthTracker::new(fast_config());
        let service = "content_scraper_agent";

        for _ in 0..5 {
            tracker.record_outcome(service, false);
        }
        assert!(!tracker.may_attempt(service));

        sleep(Duration::from_millis(80)).await;

        // Cooldown elapsed: one probe allowed, the next caller is rejected.
        assert!(tracker.may_attempt(service));
        assert_eq!(
            tracker.health_of(service).unwrap().circuit_state,
            CircuitState::HalfOpen
        );
        assert!(!tracker.may_attempt(service));
    }

    #[test_log::test(tokio::test)]
    async fn test_half_open_success_closes_and_resets() {
        let tracker = ServiceHealthTracker::new(fast_config());
        let service = "perplexity_agent";

        for _ in 0..5 {
            tracker.record_outcome(service, false);
        }
        sleep(Duration::from_millis(80)).await;
        assert!(tracker.may_attempt(service));

        tracker.record_outcome(service, true);
        let health = tracker.health_of(service).unwrap();
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(health.failure_count, 0);
        assert!(tracker.may_attempt(service));
    }

    #[test_log::test(tokio::test)]
    async fn test_half_open_failure_reopens() {
        let tracker = ServiceHealthTracker::new(fast_config());
        let service = "filesystem_agent";

        for _ in 0..5 {
            tracker.record_outcome(service, false);
        }
        sleep(Duration::from_millis(80)).await;
        assert!(tracker.may_attempt(service));

        tracker.record_outcome(service, false);
        assert_eq!(
            tracker.health_of(service).unwrap().circuit_state,
            CircuitState::Open
        );
        // Cooldown restarted; rejected again until it elapses.
        assert!(!tracker.may_attempt(service));

        sleep(Duration::from_millis(80)).await;
        assert!(tracker.may_attempt(service));
    }

    #[test]
    fn test_report_buckets() {
        let tracker = ServiceHealthTracker::new(CircuitConfig::default());

        tracker.record_outcome("healthy_agent", true);
        tracker.record_outcome("healthy_agent", true);

        tracker.record_outcome("degraded_agent", false);
        tracker.record_outcome("degraded_agent", true);
        // 50% failure rate over 2 attempts: degraded, not open.

        for _ in 0..6 {
            tracker.record_outcome("broken_agent", false);
        }

        let report = tracker.report();
        assert_eq!(report.healthy, vec!["healthy_agent".to_string()]);
        assert_eq!(report.degraded, vec!["degraded_agent".to_string()]);
        assert_eq!(report.unavailable, vec!["broken_agent".to_string()]);
        assert_eq!(report.services.len(), 3);
    }
}
