//! Proper scoring rules that grade a forecast against the market probability.
//!
//! Every metric maps onto a "higher is better" range so that means across
//! metrics read the same way. A failed forecast scores 0 on every metric.

use std::collections::BTreeMap;

use crate::types::{ForecastOutcome, ItemResult, ScoreResult};

/// Reason attached to every score of a failed forecast.
pub const FAILED_REASON: &str = "Error in forecast";

/// Clamp bounds used by the log score to keep `ln` finite.
const LOG_EPSILON: f64 = 0.001;

/// One scoring rule over (forecast, market probability in percent).
pub trait ScoringMetric: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score a successful forecast. Inputs are on the 0–100 scale.
    fn score_probability(&self, predicted: f64, market: f64) -> ScoreResult;

    /// Score an outcome, short-circuiting failures to zero.
    fn score(&self, outcome: &ForecastOutcome, market: f64) -> ScoreResult {
        if outcome.is_success() {
            self.score_probability(outcome.probability, market)
        } else {
            ScoreResult {
                name: self.name().to_string(),
                value: 0.0,
                reason: FAILED_REASON.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// `1 - (p - m)^2` on the probability scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrierScore;

impl ScoringMetric for BrierScore {
    fn name(&self) -> &'static str {
        "brier_score"
    }

    fn score_probability(&self, predicted: f64, market: f64) -> ScoreResult {
        let p = predicted / 100.0;
        let m = market / 100.0;
        let brier = (p - m).powi(2);
        ScoreResult {
            name: self.name().to_string(),
            value: (1.0 - brier).clamp(0.0, 1.0),
            reason: format!("Market: {market:.1}%, Predicted: {predicted:.1}%, Brier: {brier:.3}"),
        }
    }
}

/// `exp(m·ln(p) + (1-m)·ln(1-p))` with both sides clamped away from 0 and 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScore;

impl ScoringMetric for LogScore {
    fn name(&self) -> &'static str {
        "log_score"
    }

    fn score_probability(&self, predicted: f64, market: f64) -> ScoreResult {
        let p = (predicted / 100.0).clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
        let m = (market / 100.0).clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
        let raw = m * p.ln() + (1.0 - m) * (1.0 - p).ln();
        ScoreResult {
            name: self.name().to_string(),
            value: raw.exp(),
            reason: format!(
                "Market: {:.1}%, Predicted: {:.1}%, Raw log: {raw:.3}",
                m * 100.0,
                p * 100.0,
            ),
        }
    }
}

/// `1 - |predicted - market| / 100` on the percent scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationScore;

impl ScoringMetric for CalibrationScore {
    fn name(&self) -> &'static str {
        "calibration"
    }

    fn score_probability(&self, predicted: f64, market: f64) -> ScoreResult {
        let error = (predicted - market).abs();
        ScoreResult {
            name: self.name().to_string(),
            value: (1.0 - error / 100.0).clamp(0.0, 1.0),
            reason: format!("Market: {market:.1}%, Predicted: {predicted:.1}%, Error: {error:.1}%"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// An ordered set of metrics applied to every item.
pub struct Scorer {
    metrics: Vec<Box<dyn ScoringMetric>>,
}

impl Scorer {
    pub fn new(metrics: Vec<Box<dyn ScoringMetric>>) -> Self {
        Self { metrics }
    }

    /// Brier, log and calibration, in that order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(BrierScore),
            Box::new(LogScore),
            Box::new(CalibrationScore),
        ])
    }

    pub fn metric_names(&self) -> Vec<&'static str> {
        self.metrics.iter().map(|m| m.name()).collect()
    }

    pub fn score_all(&self, outcome: &ForecastOutcome, market: f64) -> Vec<ScoreResult> {
        self.metrics.iter().map(|m| m.score(outcome, market)).collect()
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Mean scores across successful items, overall and per topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBoard {
    pub means: BTreeMap<String, f64>,
    pub by_topic: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ScoreBoard {
    pub fn from_results(results: &[ItemResult]) -> Self {
        let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut topic_totals: BTreeMap<String, BTreeMap<String, (f64, usize)>> = BTreeMap::new();

        for item in results.iter().filter(|r| r.outcome.is_success()) {
            let topic = item
                .metadata
                .map(|m| m.topic.to_string())
                .unwrap_or_else(|| "uncategorized".to_string());
            for score in &item.scores {
                let entry = totals.entry(score.name.clone()).or_insert((0.0, 0));
                entry.0 += score.value;
                entry.1 += 1;

                let entry = topic_totals
                    .entry(topic.clone())
                    .or_default()
                    .entry(score.name.clone())
                    .or_insert((0.0, 0));
                entry.0 += score.value;
                entry.1 += 1;
            }
        }

        Self {
            means: mean_of(totals),
            by_topic: topic_totals
                .into_iter()
                .map(|(topic, t)| (topic, mean_of(t)))
                .collect(),
        }
    }
}

fn mean_of(totals: BTreeMap<String, (f64, usize)>) -> BTreeMap<String, f64> {
    totals
        .into_iter()
        .map(|(name, (sum, n))| (name, sum / n as f64))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
