//! # Recovery Orchestration
//!
//! The facade over the recovery subsystem. One orchestrator instance is
//! constructed per process and passed by reference to every call site, so
//! health counters and learned patterns accumulate instead of being thrown
//! away by ad-hoc re-instantiation.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::RecoveryConfig;
use crate::executor::StrategyExecutor;
use crate::health::ServiceHealthTracker;
use crate::learning::LearningStore;
use crate::selector::RecoveryStrategySelector;
use crate::types::{FailureContext, FailureKind, RecoveryResult, RecoveryStrategy};

/// How many history entries feed the preventive-measure scan.
const PREVENTIVE_SCAN_WINDOW: usize = 100;

/// A failure seen more often than this within the scan window earns a
/// preventive suggestion.
const PREVENTIVE_REPEAT_LIMIT: usize = 5;

/// Aggregate statistics over the recorded failure history.
#[derive(Debug, Clone, Serialize)]
pub struct FailureStats {
    /// Failures recorded since startup (bounded by the history limit)
    pub total_failures: usize,
    /// Failures recorded within the last hour
    pub recent_failures: usize,
    /// Per-kind failure counts
    pub failure_kinds: HashMap<String, usize>,
    /// The kind seen most often, when any failure was recorded
    pub most_common_kind: Option<FailureKind>,
    /// Snapshot of learned strategy effectiveness
    pub strategy_effectiveness: HashMap<String, f64>,
}

/// Coordinates classification, health tracking, strategy selection and
/// learning for every failure handed in by callers.
#[derive(Debug)]
pub struct RecoveryOrchestrator {
    selector: RecoveryStrategySelector,
    executor: StrategyExecutor,
    health: ServiceHealthTracker,
    learning: LearningStore,
    history: RwLock<VecDeque<FailureContext>>,
    history_limit: usize,
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator, loading previously learned patterns.
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            selector: RecoveryStrategySelector,
            executor: StrategyExecutor,
            health: ServiceHealthTracker::new(config.circuit),
            learning: LearningStore::open(config.learning),
            history: RwLock::new(VecDeque::new()),
            history_limit: config.history_limit,
        }
    }

    /// The process-wide service health tracker.
    pub fn health(&self) -> &ServiceHealthTracker {
        &self.health
    }

    /// The process-wide learning store.
    pub fn learning(&self) -> &LearningStore {
        &self.learning
    }

    /// Handles one failure and always produces a usable result.
    ///
    /// A previously learned strategy is tried first when its success rate
    /// clears the preference threshold; otherwise the default candidate
    /// order applies. The final candidate is always
    /// [`RecoveryStrategy::HumanReadableError`], which cannot fail, so this
    /// method never errors and never panics.
    pub async fn handle(&self, context: FailureContext) -> RecoveryResult {
        self.remember(&context);
        counter!("recovery.failures", 1);
        debug!(
            kind = %context.kind,
            service = ?context.service_name,
            retry_count = context.retry_count,
            "Handling failure"
        );

        if let Some((strategy, rate)) = self
            .learning
            .best_strategy_for(context.kind, context.service_name.as_deref())
        {
            let result = self.executor.apply(strategy, &context);
            if result.success {
                info!(
                    strategy = %strategy,
                    success_rate = %format!("{:.2}", rate),
                    "Recovered using learned strategy"
                );
                counter!("recovery.learned_hits", 1);
                self.record_success(&context, &result);
                return if result.learning_note.is_some() {
                    result
                } else {
                    result.learning_note(format!("Applied learned strategy {}", strategy))
                };
            }
            // The learned strategy no longer applies; let its rate decay.
            self.learning.record_failure(
                context.kind,
                context.service_name.as_deref(),
                strategy,
            );
        }

        for strategy in self.selector.candidates(&context) {
            let result = self.executor.apply(strategy, &context);
            if result.success {
                self.record_success(&context, &result);
                return result;
            }
            debug!(strategy = %strategy, "Strategy not applicable, trying next");
        }

        // Only reachable if the selector ever drops its guaranteed
        // HumanReadableError tail; the contract still holds either way.
        self.executor
            .apply(RecoveryStrategy::HumanReadableError, &context)
    }

    /// Statistics over the recorded failure history.
    pub fn failure_stats(&self) -> FailureStats {
        let history = self.history.read().unwrap();

        let mut counts: HashMap<FailureKind, usize> = HashMap::new();
        for failure in history.iter() {
            *counts.entry(failure.kind).or_default() += 1;
        }

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let recent = history.iter().filter(|f| f.timestamp > cutoff).count();
        let most_common = counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| *kind);

        FailureStats {
            total_failures: history.len(),
            recent_failures: recent,
            failure_kinds: counts
                .into_iter()
                .map(|(kind, count)| (kind.as_str().to_string(), count))
                .collect(),
            most_common_kind: most_common,
            strategy_effectiveness: self.learning.effectiveness(),
        }
    }

    /// Suggestions for avoiding failures that keep repeating.
    pub fn preventive_measures(&self) -> Vec<String> {
        let history = self.history.read().unwrap();

        let mut counts: HashMap<(FailureKind, Option<String>), usize> = HashMap::new();
        for failure in history.iter().rev().take(PREVENTIVE_SCAN_WINDOW) {
            *counts
                .entry((failure.kind, failure.service_name.clone()))
                .or_default() += 1;
        }

        let mut suggestions = Vec::new();
        for ((kind, service), count) in counts {
            if count <= PREVENTIVE_REPEAT_LIMIT {
                continue;
            }
            let service = service.unwrap_or_else(|| "this service".to_string());
            match kind {
                FailureKind::RateLimited => suggestions.push(format!(
                    "Consider caching requests to {} to stay under its rate limits",
                    service
                )),
                FailureKind::Timeout => suggestions.push(format!(
                    "Increase timeout limits or batch operations for {}",
                    service
                )),
                FailureKind::NetworkError => suggestions.push(format!(
                    "Consider local caching or an offline mode for {}",
                    service
                )),
                _ => {}
            }
        }
        suggestions
    }

    fn remember(&self, context: &FailureContext) {
        let mut history = self.history.write().unwrap();
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(context.clone());
    }

    fn record_success(&self, context: &FailureContext, result: &RecoveryResult) {
        if let Some(service) = context.service_name.as_deref() {
            self.health.record_outcome(service, true);
        }

        let description = result
            .learning_note
            .clone()
            .unwrap_or_else(|| format!("Recovered using {}", result.strategy_used));
        self.learning.record_success(
            context.kind,
            context.service_name.as_deref(),
            result.strategy_used,
            &description,
        );
        counter!("recovery.recovered", 1);
    }
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}
