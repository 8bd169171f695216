//! Strategy learning store.
//!
//! Every finished request is folded into an aggregate keyed by
//! `(problem_type, approach)`: success and failure counts plus a running mean
//! of confidence. Aggregates are kept in memory for fast reads and written
//! through to an optional [`Storage`] backend. Persistence failures are
//! retried with exponential backoff and then logged; they never reach the
//! caller.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{LearningError, LearningResult, StorageResult};
use crate::storage::{FeedbackRecord, Storage, StrategyOutcome, StrategyRecord};

/// Strategies used fewer times than this are reported as underutilized.
const UNDERUTILIZED_USES: i64 = 3;

type StrategyKey = (String, String);

// ============================================================================
// Statistics
// ============================================================================

/// Attempt counts for one problem type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProblemTypeStats {
    pub total_attempts: i64,
    pub successful: i64,
    pub failed: i64,
    pub success_rate: f64,
}

impl ProblemTypeStats {
    fn add(&mut self, record: &StrategyRecord) {
        self.total_attempts += record.total_uses();
        self.successful += record.success_count;
        self.failed += record.failure_count;
        self.success_rate = if self.total_attempts > 0 {
            self.successful as f64 / self.total_attempts as f64
        } else {
            0.0
        };
    }
}

/// Global rollup of strategies and feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningInsights {
    pub total_strategies: usize,
    pub total_feedback: usize,
    pub positive_feedback_count: usize,
    pub positive_feedback_rate: f64,
    pub problem_type_success_rates: BTreeMap<String, f64>,
    pub best_performing_type: Option<String>,
    pub best_performing_rate: f64,
    pub most_common_type: Option<String>,
    pub most_common_count: i64,
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Backoff for write-through persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
        }
    }
}

// ============================================================================
// Strategy Store
// ============================================================================

/// Shared store of strategy outcomes and user feedback.
pub struct StrategyStore {
    strategies: RwLock<HashMap<StrategyKey, StrategyRecord>>,
    feedback: RwLock<Vec<FeedbackRecord>>,
    storage: Option<Arc<dyn Storage>>,
    retry: RetryPolicy,
}

impl Default for StrategyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyStore {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            feedback: RwLock::new(Vec::new()),
            storage: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Write every change through to `storage`
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the persistence retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the in-memory aggregates with what the backend holds.
    ///
    /// Returns the number of strategies and feedback entries loaded.
    pub async fn load(&self) -> StorageResult<(usize, usize)> {
        let Some(storage) = &self.storage else {
            return Ok((0, 0));
        };

        let records = storage.list_strategies().await?;
        let feedback = storage.list_feedback().await?;
        let counts = (records.len(), feedback.len());

        *self.strategies.write().await = records
            .into_iter()
            .map(|r| ((r.problem_type.clone(), r.approach.clone()), r))
            .collect();
        *self.feedback.write().await = feedback;

        info!(strategies = counts.0, feedback = counts.1, "Loaded learning data");
        Ok(counts)
    }

    /// Record one use of a strategy and its outcome.
    ///
    /// Metadata objects are merged into the stored metadata. Returns the
    /// updated aggregate.
    pub async fn record_strategy(
        &self,
        problem_type: &str,
        approach: &str,
        success: bool,
        confidence: f64,
        metadata: Option<Value>,
    ) -> StrategyRecord {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        let record = {
            let mut strategies = self.strategies.write().await;
            let entry = strategies
                .entry((problem_type.to_string(), approach.to_string()))
                .or_insert_with(|| StrategyRecord {
                    problem_type: problem_type.to_string(),
                    approach: approach.to_string(),
                    success_count: 0,
                    failure_count: 0,
                    avg_confidence: 0.0,
                    last_used_at: Utc::now(),
                    metadata: None,
                });

            let previous = entry.total_uses() as f64;
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
            entry.avg_confidence = (entry.avg_confidence * previous + confidence) / (previous + 1.0);
            entry.last_used_at = Utc::now();
            if let Some(metadata) = metadata {
                entry.metadata = Some(merge_metadata(entry.metadata.take(), metadata));
            }
            entry.clone()
        };

        info!(
            problem_type = %problem_type,
            approach = %approach,
            success,
            confidence,
            success_rate = record.success_rate(),
            "Recorded strategy"
        );

        if let Some(storage) = &self.storage {
            let outcome = StrategyOutcome {
                problem_type: problem_type.to_string(),
                approach: approach.to_string(),
                success,
                confidence,
                metadata: record.metadata.clone(),
            };
            self.persist("strategy", || storage.upsert_strategy(&outcome)).await;
        }

        record
    }

    /// Append user feedback; the rating must be between 1 and 5.
    pub async fn record_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        rating: u8,
        comment: Option<String>,
        metadata: Option<Value>,
    ) -> LearningResult<FeedbackRecord> {
        if !(1..=5).contains(&rating) {
            return Err(LearningError::InvalidRating { rating });
        }

        let mut feedback = FeedbackRecord::new(conversation_id, message_id, rating);
        feedback.comment = comment;
        feedback.metadata = metadata;

        self.feedback.write().await.push(feedback.clone());
        info!(rating, positive = feedback.is_positive, "Recorded feedback");

        if let Some(storage) = &self.storage {
            self.persist("feedback", || storage.insert_feedback(&feedback)).await;
        }
        Ok(feedback)
    }

    async fn persist<T, F, Fut>(&self, what: &'static str, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    debug!(what, retries, "Persisted learning data");
                    return Some(value);
                }
                Err(e) if retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = Duration::from_millis(self.retry.base_delay_ms * 2_u64.pow(retries - 1));
                    warn!(
                        what,
                        error = %e,
                        retry = retries,
                        delay_ms = delay.as_millis(),
                        "Persisting learning data failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(what, error = %e, retries, "Giving up on persisting learning data");
                    return None;
                }
            }
        }
    }

    /// Aggregate for one strategy
    pub async fn get_strategy(&self, problem_type: &str, approach: &str) -> Option<StrategyRecord> {
        self.strategies
            .read()
            .await
            .get(&(problem_type.to_string(), approach.to_string()))
            .cloned()
    }

    /// Best strategies for a problem type, by success rate then confidence.
    pub async fn get_best_strategies(
        &self,
        problem_type: &str,
        top_k: usize,
        min_success_rate: f64,
    ) -> Vec<StrategyRecord> {
        let mut relevant: Vec<StrategyRecord> = self
            .strategies
            .read()
            .await
            .values()
            .filter(|s| s.problem_type == problem_type && s.success_rate() >= min_success_rate)
            .cloned()
            .collect();

        relevant.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then(b.avg_confidence.total_cmp(&a.avg_confidence))
                .then_with(|| a.approach.cmp(&b.approach))
        });
        relevant.truncate(top_k);
        relevant
    }

    /// Per-type attempt counts; all types when `problem_type` is `None`.
    ///
    /// An unknown type yields a single zeroed entry.
    pub async fn problem_type_stats(&self, problem_type: Option<&str>) -> BTreeMap<String, ProblemTypeStats> {
        let strategies = self.strategies.read().await;
        let mut stats: BTreeMap<String, ProblemTypeStats> = BTreeMap::new();
        for record in strategies.values() {
            if problem_type.is_some_and(|pt| pt != record.problem_type) {
                continue;
            }
            stats.entry(record.problem_type.clone()).or_default().add(record);
        }
        if let Some(pt) = problem_type {
            stats.entry(pt.to_string()).or_default();
        }
        stats
    }

    /// Human-readable hints for a problem type.
    pub async fn suggest_improvements(&self, problem_type: &str) -> Vec<String> {
        let stats = self
            .problem_type_stats(Some(problem_type))
            .await
            .remove(problem_type)
            .unwrap_or_default();

        if stats.total_attempts == 0 {
            return vec![format!("No data yet for {} problems", problem_type)];
        }

        let mut suggestions = Vec::new();
        let rate = stats.success_rate;
        if rate < 0.5 {
            suggestions.push(format!(
                "Low success rate ({:.1}%) for {} - consider alternative approaches",
                rate * 100.0,
                problem_type
            ));
            if let Some(best) = self.get_best_strategies(problem_type, 1, 0.5).await.first() {
                suggestions.push(format!("Try approach: {}", best.approach));
            }
        } else if rate >= 0.8 {
            suggestions.push(format!(
                "High success rate ({:.1}%) - current strategies are working well",
                rate * 100.0
            ));
        }

        let underutilized = self
            .strategies
            .read()
            .await
            .values()
            .filter(|s| s.problem_type == problem_type && s.total_uses() < UNDERUTILIZED_USES)
            .count();
        if underutilized > 0 {
            suggestions.push(format!("Consider testing {} underutilized strategies", underutilized));
        }

        suggestions
    }

    /// Rollup across all strategies and feedback.
    pub async fn get_insights(&self) -> LearningInsights {
        let stats = self.problem_type_stats(None).await;
        let total_strategies = self.strategies.read().await.len();
        let feedback = self.feedback.read().await;
        let total_feedback = feedback.len();
        let positive_feedback_count = feedback.iter().filter(|f| f.is_positive).count();

        let problem_type_success_rates: BTreeMap<String, f64> = stats
            .iter()
            .filter(|(_, s)| s.total_attempts > 0)
            .map(|(pt, s)| (pt.clone(), s.success_rate))
            .collect();

        // Ties go to the first type in name order.
        let mut best: Option<(&String, f64)> = None;
        for (pt, rate) in &problem_type_success_rates {
            if best.map_or(true, |(_, r)| *rate > r) {
                best = Some((pt, *rate));
            }
        }
        let mut most_common: Option<(&String, i64)> = None;
        for (pt, s) in &stats {
            if most_common.map_or(true, |(_, n)| s.total_attempts > n) {
                most_common = Some((pt, s.total_attempts));
            }
        }

        LearningInsights {
            total_strategies,
            total_feedback,
            positive_feedback_count,
            positive_feedback_rate: if total_feedback > 0 {
                positive_feedback_count as f64 / total_feedback as f64
            } else {
                0.0
            },
            best_performing_type: best.map(|(pt, _)| pt.clone()),
            best_performing_rate: best.map_or(0.0, |(_, r)| r),
            most_common_type: most_common.map(|(pt, _)| pt.clone()),
            most_common_count: most_common.map_or(0, |(_, n)| n),
            problem_type_success_rates,
        }
    }

    /// Every feedback entry, oldest first
    pub async fn feedback(&self) -> Vec<FeedbackRecord> {
        self.feedback.read().await.clone()
    }
}

fn merge_metadata(existing: Option<Value>, update: Value) -> Value {
    match (existing, update) {
        (Some(Value::Object(mut base)), Value::Object(update)) => {
            base.extend(update);
            Value::Object(base)
        }
        (_, update) => update,
    }
}
