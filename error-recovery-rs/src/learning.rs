//! # Recovery Learning Store
//!
//! Durable record of which strategy worked for which failure and service.
//! Entries are consulted before the default candidate order and updated
//! after every recovery. Persistence is best-effort: a missing or corrupt
//! file yields an empty store, and a failed write is logged and swallowed,
//! never surfaced to the recovery flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{FailureKind, RecoveryStrategy, Result};

/// Success rate a learned entry must exceed before it is tried ahead of the
/// default candidate order.
pub const PREFERENCE_THRESHOLD: f64 = 0.7;

// Success rates start at the midpoint and move by a fixed step per
// observation. The preference threshold is calibrated against this exact
// update law: three net successes are needed before an entry is preferred.
const INITIAL_RATE: f64 = 0.5;
const RATE_STEP: f64 = 0.1;

/// One learned association between a failure key and a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    /// The strategy that was applied
    pub strategy: RecoveryStrategy,
    /// When this entry was last updated
    pub timestamp: DateTime<Utc>,
    /// Free-text description of the recovery
    pub description: String,
    /// Estimated success rate in [0, 1]
    pub success_rate: f64,
    /// How many outcomes have been folded into the estimate
    #[serde(default)]
    pub observations: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LearningData {
    /// Entries keyed by `<failure_kind>_<service_name>`
    #[serde(default)]
    patterns: HashMap<String, Vec<LearnedPattern>>,
    /// Flat per-kind strategy effectiveness, keyed by `<kind>_<strategy>`
    #[serde(default)]
    effectiveness: HashMap<String, f64>,
}

/// Configuration for the learning store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Where learned patterns are persisted
    pub path: PathBuf,
    /// Persist after this many recorded updates
    pub save_every: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./agent_files/error_recovery_learning.json"),
            save_every: 1,
        }
    }
}

/// Durable store of recovery outcomes.
#[derive(Debug)]
pub struct LearningStore {
    config: LearningConfig,
    data: RwLock<LearningData>,
    pending_updates: AtomicU32,
}

impl LearningStore {
    /// Opens the store, loading any previously persisted data. A missing or
    /// unreadable file starts the store empty; startup never fails here.
    pub fn open(config: LearningConfig) -> Self {
        let data = match std::fs::read(&config.path) {
            Ok(bytes) => match serde_json::from_slice::<LearningData>(&bytes) {
                Ok(data) => {
                    info!(
                        path = %config.path.display(),
                        keys = data.patterns.len(),
                        "Loaded recovery learning data"
                    );
                    data
                }
                Err(err) => {
                    warn!(
                        path = %config.path.display(),
                        error = %err,
                        "Corrupt learning data, starting empty"
                    );
                    LearningData::default()
                }
            },
            Err(_) => LearningData::default(),
        };

        Self {
            config,
            data: RwLock::new(data),
            pending_updates: AtomicU32::new(0),
        }
    }

    /// Best previously successful strategy for `(kind, service)`, together
    /// with its success rate. Only entries above the preference threshold
    /// are returned.
    pub fn best_strategy_for(
        &self,
        kind: FailureKind,
        service_name: Option<&str>,
    ) -> Option<(RecoveryStrategy, f64)> {
        let key = pattern_key(kind, service_name);
        let data = self.data.read().unwrap();

        data.patterns
            .get(&key)?
            .iter()
            .filter(|entry| entry.success_rate > PREFERENCE_THRESHOLD)
            .max_by(|a, b| a.success_rate.total_cmp(&b.success_rate))
            .map(|entry| (entry.strategy, entry.success_rate))
    }

    /// Records that `strategy` successfully recovered `(kind, service)`.
    pub fn record_success(
        &self,
        kind: FailureKind,
        service_name: Option<&str>,
        strategy: RecoveryStrategy,
        description: &str,
    ) {
        let key = pattern_key(kind, service_name);
        {
            let mut data = self.data.write().unwrap();

            let entries = data.patterns.entry(key.clone()).or_default();
            match entries.iter_mut().find(|entry| entry.strategy == strategy) {
                Some(entry) => {
                    entry.success_rate = (entry.success_rate + RATE_STEP).min(1.0);
                    entry.observations += 1;
                    entry.timestamp = Utc::now();
                    entry.description = description.to_string();
                }
                None => entries.push(LearnedPattern {
                    strategy,
                    timestamp: Utc::now(),
                    description: description.to_string(),
                    success_rate: INITIAL_RATE + RATE_STEP,
                    observations: 1,
                }),
            }

            let effectiveness = data
                .effectiveness
                .entry(effectiveness_key(kind, strategy))
                .or_insert(INITIAL_RATE);
            *effectiveness = (*effectiveness + RATE_STEP).min(1.0);

            gauge!("recovery.learning.keys", data.patterns.len() as f64);
        }

        debug!(key = %key, strategy = %strategy, "Recorded successful recovery");
        self.bump_and_maybe_save();
    }

    /// Records that a learned `strategy` failed to recover `(kind, service)`.
    pub fn record_failure(
        &self,
        kind: FailureKind,
        service_name: Option<&str>,
        strategy: RecoveryStrategy,
    ) {
        let key = pattern_key(kind, service_name);
        {
            let mut data = self.data.write().unwrap();

            if let Some(entries) = data.patterns.get_mut(&key) {
                if let Some(entry) = entries.iter_mut().find(|entry| entry.strategy == strategy) {
                    entry.success_rate = (entry.success_rate - RATE_STEP).max(0.0);
                    entry.observations += 1;
                    entry.timestamp = Utc::now();
                }
            }

            if let Some(effectiveness) =
                data.effectiveness.get_mut(&effectiveness_key(kind, strategy))
            {
                *effectiveness = (*effectiveness - RATE_STEP).max(0.0);
            }
        }

        debug!(key = %key, strategy = %strategy, "Recorded failed recovery");
        self.bump_and_maybe_save();
    }

    /// Snapshot of the flat strategy-effectiveness map.
    pub fn effectiveness(&self) -> HashMap<String, f64> {
        self.data.read().unwrap().effectiveness.clone()
    }

    /// Writes the store to disk, surfacing any error. Intended for shutdown
    /// and tests; the recovery flow itself only uses best-effort saves.
    pub async fn flush(&self) -> Result<()> {
        let bytes = {
            let data = self.data.read().unwrap();
            serde_json::to_vec_pretty(&*data)?
        };
        if let Some(parent) = self.config.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config.path, bytes).await?;
        Ok(())
    }

    fn bump_and_maybe_save(&self) {
        let pending = self.pending_updates.fetch_add(1, Ordering::SeqCst) + 1;
        if pending >= self.config.save_every {
            self.pending_updates.store(0, Ordering::SeqCst);
            self.save_soon();
        }
    }

    // Fire-and-forget persistence. Serialization happens under the read
    // lock; the write itself must never take down the recovery flow.
    fn save_soon(&self) {
        let bytes = {
            let data = self.data.read().unwrap();
            match serde_json::to_vec_pretty(&*data) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "Failed to serialize learning data");
                    return;
                }
            }
        };
        let path = self.config.path.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(parent) = path.parent() {
                        let _ = tokio::fs::create_dir_all(parent).await;
                    }
                    if let Err(err) = tokio::fs::write(&path, bytes).await {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "Failed to persist learning data"
                        );
                    }
                });
            }
            // No runtime available; write in place, still best-effort.
            Err(_) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(err) = std::fs::write(&path, bytes) {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to persist learning data"
                    );
                }
            }
        }
    }
}

fn pattern_key(kind: FailureKind, service_name: Option<&str>) -> String {
    format!("{}_{}", kind, service_name.unwrap_or("unknown"))
}

fn effectiveness_key(kind: FailureKind, strategy: RecoveryStrategy) -> String {
    format!("{}_{}", kind, strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &std::path::Path) -> LearningStore {
        LearningStore::open(LearningConfig {
            path: dir.join("learning.json"),
            save_every: 1,
        })
    }

    #[tokio::test]
    async fn test_preference_requires_three_successes() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let kind = FailureKind::ToolUnavailable;
        let strategy = RecoveryStrategy::UseAlternativeService;

        store.record_success(kind, Some("filesystem_agent"), strategy, "fallback worked");
        store.record_success(kind, Some("filesystem_agent"), strategy, "fallback worked");
        // Two successes: 0.7, not strictly above the threshold.
        assert!(store.best_strategy_for(kind, Some("filesystem_agent")).is_none());

        store.record_success(kind, Some("filesystem_agent"), strategy, "fallback worked");
        let (best, rate) = store
            .best_strategy_for(kind, Some("filesystem_agent"))
            .unwrap();
        assert_eq!(best, strategy);
        assert!((rate - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_decrements_rate() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let kind = FailureKind::NetworkError;
        let strategy = RecoveryStrategy::RetryWithBackoff;

        for _ in 0..3 {
            store.record_success(kind, Some("fetch_agent"), strategy, "retried");
        }
        assert!(store.best_strategy_for(kind, Some("fetch_agent")).is_some());

        store.record_failure(kind, Some("fetch_agent"), strategy);
        // Back to 0.7: no longer strictly above the threshold.
        assert!(store.best_strategy_for(kind, Some("fetch_agent")).is_none());
    }

    #[tokio::test]
    async fn test_rates_clamped() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let kind = FailureKind::Timeout;
        let strategy = RecoveryStrategy::RetryWithBackoff;

        for _ in 0..20 {
            store.record_success(kind, Some("slow_agent"), strategy, "retried");
        }
        let (_, rate) = store.best_strategy_for(kind, Some("slow_agent")).unwrap();
        assert!(rate <= 1.0);

        for _ in 0..40 {
            store.record_failure(kind, Some("slow_agent"), strategy);
        }
        let effectiveness = store.effectiveness();
        let rate = effectiveness[&format!("{}_{}", kind, strategy)];
        assert!(rate >= 0.0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let kind = FailureKind::ToolUnavailable;
        let strategy = RecoveryStrategy::SuggestCustomScript;

        let store = store_in(dir.path());
        for _ in 0..3 {
            store.record_success(kind, Some("content_scraper_agent"), strategy, "scripted it");
        }
        store.flush().await.unwrap();

        let reloaded = store_in(dir.path());
        let (best, rate) = reloaded
            .best_strategy_for(kind, Some("content_scraper_agent"))
            .unwrap();
        assert_eq!(best, strategy);
        assert!((rate - 0.8).abs() < 1e-9);
        assert!(!reloaded.effectiveness().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = LearningStore::open(LearningConfig {
            path,
            save_every: 1,
        });
        assert!(store
            .best_strategy_for(FailureKind::Timeout, Some("fetch_agent"))
            .is_none());
        assert!(store.effectiveness().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_name_uses_shared_key() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let kind = FailureKind::PermissionError;
        let strategy = RecoveryStrategy::DegradeGracefully;

        for _ in 0..3 {
            store.record_success(kind, None, strategy, "degraded");
        }
        assert!(store.best_strategy_for(kind, None).is_some());
        assert!(store.best_strategy_for(kind, Some("fetch_agent")).is_none());
    }
}
