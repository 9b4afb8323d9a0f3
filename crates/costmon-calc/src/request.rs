use crate::{CalcError, Result};
use chrono::{DateTime, Utc};
use costmon_common::types::{CostCategory, MonitoredTarget, TargetScope, TimeRange};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// What to calculate: a set of targets of one scope over a time range, with
/// per-category inclusion flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub scope: TargetScope,
    pub target_ids: Vec<String>,
    pub range: TimeRange,
    #[serde(default = "default_include")]
    pub include_hardware: bool,
    #[serde(default = "default_include")]
    pub include_power: bool,
    #[serde(default = "default_include")]
    pub include_labor: bool,
    #[serde(default = "default_include")]
    pub include_overhead: bool,
}

fn default_include() -> bool {
    true
}

impl CalculationRequest {
    /// A request covering every cost category.
    pub fn new(scope: TargetScope, target_ids: Vec<String>, range: TimeRange) -> Self {
        Self {
            scope,
            target_ids,
            range,
            include_hardware: true,
            include_power: true,
            include_labor: true,
            include_overhead: true,
        }
    }

    /// A request covering only `categories`.
    pub fn for_categories(
        scope: TargetScope,
        target_ids: Vec<String>,
        range: TimeRange,
        categories: &[CostCategory],
    ) -> Self {
        Self {
            include_hardware: categories.contains(&CostCategory::Hardware),
            include_power: categories.contains(&CostCategory::PowerMaintenance),
            include_labor: categories.contains(&CostCategory::Labor),
            include_overhead: categories.contains(&CostCategory::Overhead),
            ..Self::new(scope, target_ids, range)
        }
    }

    pub fn categories(&self) -> Vec<CostCategory> {
        CostCategory::ALL
            .into_iter()
            .filter(|category| match category {
                CostCategory::Hardware => self.include_hardware,
                CostCategory::PowerMaintenance => self.include_power,
                CostCategory::Labor => self.include_labor,
                CostCategory::Overhead => self.include_overhead,
            })
            .collect()
    }

    /// Distinct targets ordered by id.
    pub fn targets(&self) -> Vec<MonitoredTarget> {
        self.target_ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|id| MonitoredTarget::new(id.clone(), self.scope))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_ids.is_empty() {
            return Err(CalcError::InvalidRequest("no targets given".to_string()));
        }
        if let Some(position) = self.target_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(CalcError::InvalidRequest(format!(
                "target id at position {position} is blank"
            )));
        }
        if self.range.end <= self.range.start {
            return Err(CalcError::InvalidRequest(format!(
                "empty time range {} .. {}",
                self.range.start, self.range.end
            )));
        }
        if self.categories().is_empty() {
            return Err(CalcError::InvalidRequest("no cost category included".to_string()));
        }
        Ok(())
    }

    /// Hex SHA-256 of the request in canonical form. Target order and
    /// duplicates do not change the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use costmon_calc::CalculationRequest;
    /// use costmon_common::types::{TargetScope, TimeRange};
    ///
    /// let range = TimeRange::trailing(Duration::days(1), Utc::now());
    /// let a = CalculationRequest::new(TargetScope::Asset, vec!["b".into(), "a".into()], range);
    /// let b = CalculationRequest::new(TargetScope::Asset, vec!["a".into(), "b".into(), "a".into()], range);
    /// assert_eq!(a.cache_key(), b.cache_key());
    /// assert_eq!(a.cache_key().len(), 64);
    /// ```
    pub fn cache_key(&self) -> String {
        let targets: Vec<&str> = self
            .target_ids
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let canonical = format!(
            "scope={}|targets={}|start={}|end={}|hw={}|pw={}|lb={}|oh={}",
            self.scope,
            targets.join(","),
            self.range.start.timestamp_millis(),
            self.range.end.timestamp_millis(),
            self.include_hardware,
            self.include_power,
            self.include_labor,
            self.include_overhead,
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Aggregated outcome of one calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationResult {
    pub calculation_id: String,
    pub request: CalculationRequest,
    pub total_cost: f64,
    /// Every requested category; failed ones contribute zero.
    pub category_breakdown: BTreeMap<CostCategory, f64>,
    pub target_breakdown: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    /// Source coverage times a warning penalty, in `[0, 1]`.
    pub confidence: f64,
    pub sources_expected: usize,
    pub sources_responded: usize,
    /// Set when the result was served from the cache.
    pub cache_hit: bool,
    pub calculated_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Cost over the trailing `days` days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub scope: TargetScope,
    pub target_ids: Vec<String>,
    pub days: u32,
    pub total_cost: f64,
    pub daily_average: f64,
    pub category_breakdown: BTreeMap<CostCategory, f64>,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl CostSummary {
    pub(crate) fn from_result(result: &CalculationResult, days: u32) -> Self {
        Self {
            scope: result.request.scope,
            target_ids: result.request.target_ids.clone(),
            days,
            total_cost: result.total_cost,
            daily_average: result.total_cost / f64::from(days.max(1)),
            category_breakdown: result.category_breakdown.clone(),
            confidence: result.confidence,
            warnings: result.warnings.clone(),
        }
    }
}

/// Difference between two calculations, `current - baseline`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostComparison {
    pub baseline: CalculationResult,
    pub current: CalculationResult,
    pub absolute_change: f64,
    /// `None` when the baseline total is zero.
    pub percent_change: Option<f64>,
    pub category_changes: BTreeMap<CostCategory, f64>,
}

impl CostComparison {
    pub(crate) fn new(baseline: CalculationResult, current: CalculationResult) -> Self {
        let absolute_change = current.total_cost - baseline.total_cost;
        let percent_change = (baseline.total_cost != 0.0)
            .then(|| absolute_change / baseline.total_cost * 100.0);

        let mut category_changes = BTreeMap::new();
        for category in baseline
            .category_breakdown
            .keys()
            .chain(current.category_breakdown.keys())
        {
            let before = baseline.category_breakdown.get(category).copied().unwrap_or(0.0);
            let after = current.category_breakdown.get(category).copied().unwrap_or(0.0);
            category_changes.insert(*category, after - before);
        }

        Self {
            baseline,
            current,
            absolute_change,
            percent_change,
            category_changes,
        }
    }
}
