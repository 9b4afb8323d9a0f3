use crate::request::{CalculationRequest, CalculationResult, CostComparison, CostSummary};
use crate::{CalcError, Result};
use chrono::{DurationRound, Utc};
use costmon_collector::CostSourceAdapter;
use costmon_common::id;
use costmon_common::types::{CostCategory, MonitoredTarget, TargetScope, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};

/// Orchestrator limits, read from the `[calculation]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Calculations, and adapter calls across them, allowed in flight at
    /// once; further callers wait.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Zero disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Counter snapshot returned by [`CalculationOrchestrator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    completed: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

struct CacheEntry {
    stored_at: Instant,
    result: CalculationResult,
}

/// Result of one category's sub-calculation.
struct CategoryOutcome {
    category: CostCategory,
    per_target: BTreeMap<String, f64>,
    expected: usize,
    responded: usize,
    errors: Vec<String>,
}

impl CategoryOutcome {
    fn succeeded(&self) -> bool {
        self.responded > 0
    }

    fn total(&self) -> f64 {
        self.per_target.values().sum()
    }
}

pub struct CalculationOrchestrator {
    adapters: Vec<Arc<dyn CostSourceAdapter>>,
    semaphore: Arc<Semaphore>,
    /// Bounds adapter calls across every category of every calculation.
    invocations: Arc<Semaphore>,
    config: CalculationConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    counters: Counters,
}

impl CalculationOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn CostSourceAdapter>>, config: CalculationConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            adapters,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            invocations: Arc::new(Semaphore::new(max_concurrent)),
            config,
            cache: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CalculationConfig {
        &self.config
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// Runs a calculation, or returns the cached result of an identical
    /// request younger than the cache TTL.
    ///
    /// # Errors
    ///
    /// [`CalcError::InvalidRequest`] for an empty target set, range or
    /// category selection, [`CalcError::Timeout`] when the deadline passes
    /// and [`CalcError::AllFailed`] when no category produced data.
    pub async fn calculate(&self, request: CalculationRequest) -> Result<CalculationResult> {
        request.validate()?;
        let key = request.cache_key();
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CalcError::Closed)?;

        // An identical request may have finished while this one waited.
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let deadline = self.deadline();
        let outcomes = match timeout(deadline, self.run_categories(&request)).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    targets = request.target_ids.len(),
                    timeout = ?deadline,
                    "Calculation timed out"
                );
                return Err(CalcError::Timeout(deadline));
            }
        };

        let mut result = match aggregate(request, outcomes) {
            Ok(result) => result,
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Calculation failed");
                return Err(e);
            }
        };
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            calculation_id = %result.calculation_id,
            total_cost = result.total_cost,
            confidence = result.confidence,
            warnings = result.warnings.len(),
            duration_ms = result.duration_ms,
            "Calculation completed"
        );

        self.store(key, &result);
        Ok(result)
    }

    /// Total cost of `target_ids` over the trailing `days` days.
    pub async fn quick_summary(
        &self,
        scope: TargetScope,
        target_ids: Vec<String>,
        days: u32,
    ) -> Result<CostSummary> {
        if days == 0 {
            return Err(CalcError::InvalidRequest("days must be at least 1".to_string()));
        }
        // Minute-aligned so repeated summaries share a cache key.
        let now = Utc::now();
        let end = now
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(now);
        let range = TimeRange::trailing(chrono::Duration::days(i64::from(days)), end);
        let result = self
            .calculate(CalculationRequest::new(scope, target_ids, range))
            .await?;
        Ok(CostSummary::from_result(&result, days))
    }

    /// Runs both requests concurrently and reports `current - baseline`.
    pub async fn compare(
        &self,
        baseline: CalculationRequest,
        current: CalculationRequest,
    ) -> Result<CostComparison> {
        let (baseline, current) = tokio::join!(self.calculate(baseline), self.calculate(current));
        Ok(CostComparison::new(baseline?, current?))
    }

    /// Drops every cached result.
    pub fn invalidate_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn cached(&self, key: &str) -> Option<CalculationResult> {
        let ttl = self.cache_ttl();
        if ttl.is_zero() {
            return None;
        }
        let cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = cache.get(key)?;
        if entry.stored_at.elapsed() >= ttl {
            return None;
        }
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(calculation_id = %entry.result.calculation_id, "Calculation served from cache");
        Some(CalculationResult {
            cache_hit: true,
            ..entry.result.clone()
        })
    }

    fn store(&self, key: String, result: &CalculationResult) {
        let ttl = self.cache_ttl();
        if ttl.is_zero() {
            return;
        }
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        cache.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                result: result.clone(),
            },
        );
    }

    /// One task per category. Dropping the returned future (on timeout)
    /// aborts every task still running.
    async fn run_categories(&self, request: &CalculationRequest) -> Vec<CategoryOutcome> {
        let targets = request.targets();
        let mut tasks = JoinSet::new();
        let mut pending = BTreeMap::new();

        for category in request.categories() {
            let adapters: Vec<Arc<dyn CostSourceAdapter>> = self
                .adapters
                .iter()
                .filter(|a| a.category() == category)
                .cloned()
                .collect();
            pending.insert(category, targets.len() * adapters.len().max(1));
            let targets = targets.clone();
            let range = request.range;
            let invocations = self.invocations.clone();
            tasks.spawn(async move {
                calculate_category(category, adapters, targets, range, invocations).await
            });
        }

        let mut outcomes = Vec::new();
        let mut panics = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.category);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sub-calculation task panicked");
                    panics.push(e.to_string());
                }
            }
        }

        // A panicked task carries no category, so whatever never reported
        // is the set that panicked.
        let reason = if panics.is_empty() {
            "task ended without a result".to_string()
        } else {
            panics.join("; ")
        };
        for (category, expected) in pending {
            outcomes.push(CategoryOutcome {
                category,
                per_target: BTreeMap::new(),
                expected,
                responded: 0,
                errors: vec![format!("{category}: sub-calculation panicked: {reason}")],
            });
        }
        outcomes
    }
}

async fn calculate_category(
    category: CostCategory,
    adapters: Vec<Arc<dyn CostSourceAdapter>>,
    targets: Vec<MonitoredTarget>,
    range: TimeRange,
    invocations: Arc<Semaphore>,
) -> CategoryOutcome {
    let mut outcome = CategoryOutcome {
        category,
        per_target: BTreeMap::new(),
        expected: targets.len() * adapters.len().max(1),
        responded: 0,
        errors: Vec::new(),
    };
    if adapters.is_empty() {
        outcome
            .errors
            .push(format!("{category}: no cost source registered"));
        return outcome;
    }

    for target in &targets {
        for adapter in &adapters {
            let Ok(_permit) = invocations.acquire().await else {
                outcome.errors.push(format!("{category}: orchestrator is shutting down"));
                continue;
            };
            match adapter.collect(target, &range).await {
                Ok(samples) => {
                    let cost: f64 = samples.iter().map(|s| s.total_cost).sum();
                    *outcome.per_target.entry(target.id.clone()).or_insert(0.0) += cost;
                    outcome.responded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        category = %category,
                        adapter = adapter.name(),
                        target_id = %target.id,
                        error = %e,
                        "Cost source failed during calculation"
                    );
                    outcome.errors.push(format!("{category}: {e}"));
                }
            }
        }
    }
    outcome
}

/// Folds category outcomes into a result. Maps are keyed by category and
/// target id, so task completion order does not matter.
fn aggregate(request: CalculationRequest, outcomes: Vec<CategoryOutcome>) -> Result<CalculationResult> {
    if outcomes.iter().all(|o| !o.succeeded()) {
        let mut errors: Vec<String> = outcomes.into_iter().flat_map(|o| o.errors).collect();
        errors.sort();
        return Err(CalcError::AllFailed { errors });
    }

    let mut outcomes = outcomes;
    outcomes.sort_by_key(|o| o.category);

    let mut category_breakdown = BTreeMap::new();
    let mut target_breakdown: BTreeMap<String, f64> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut expected = 0;
    let mut responded = 0;

    for outcome in &outcomes {
        expected += outcome.expected;
        responded += outcome.responded;
        if outcome.succeeded() {
            category_breakdown.insert(outcome.category, outcome.total());
            for (target_id, cost) in &outcome.per_target {
                *target_breakdown.entry(target_id.clone()).or_insert(0.0) += cost;
            }
            if !outcome.errors.is_empty() {
                warnings.push(format!(
                    "{}: {} of {} sources failed ({})",
                    outcome.category,
                    outcome.errors.len(),
                    outcome.expected,
                    outcome.errors.join("; ")
                ));
            }
        } else {
            category_breakdown.insert(outcome.category, 0.0);
            warnings.push(format!(
                "{} sub-calculation failed and contributes zero: {}",
                outcome.category,
                outcome.errors.join("; ")
            ));
        }
    }

    let total_cost: f64 = category_breakdown.values().sum();
    if total_cost == 0.0 && warnings.is_empty() {
        warnings.push("every cost source reported zero cost".to_string());
    }

    Ok(CalculationResult {
        calculation_id: id::next_calculation_id(),
        request,
        total_cost,
        category_breakdown,
        target_breakdown,
        confidence: confidence(responded, expected, warnings.len()),
        warnings,
        sources_expected: expected,
        sources_responded: responded,
        cache_hit: false,
        calculated_at: Utc::now(),
        duration_ms: 0,
    })
}

/// Coverage of expected sources times `max(0.5, 1 - 0.1 * warnings)`.
fn confidence(responded: usize, expected: usize, warnings: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    let coverage = responded as f64 / expected as f64;
    let penalty = (1.0 - 0.1 * warnings as f64).max(0.5);
    (coverage * penalty).clamp(0.0, 1.0)
}
