//! Shared types for the evaluation harness.
//!
//! These types form the data model used across all modules: question
//! records and their category metadata, forecast outcomes, score results,
//! and the per-run experiment summary handed to the tracker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Question records
// ---------------------------------------------------------------------------

/// A single evaluation question with its reference market probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    /// Reference probability on the 0–100 scale.
    pub market_probability: f64,
    /// Platform label, e.g. "Metaculus" or "Polymarket".
    pub platform: String,
    /// Where this record came from (dataset file, cache, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Optional quality/relevance score used when filling a curated sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl fmt::Display for QuestionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (market: {:.1}%)",
            self.platform, self.question, self.market_probability,
        )
    }
}

impl QuestionRecord {
    /// Build a record with the given identity and probability. The
    /// probability is clamped into [0, 100].
    pub fn new(id: impl Into<String>, question: impl Into<String>, market_probability: f64) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            market_probability: market_probability.clamp(0.0, 100.0),
            platform: "Unknown".to_string(),
            source: None,
            url: None,
            relevance: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }

    /// The ten-point bucket the market probability falls into.
    pub fn probability_bucket(&self) -> ProbabilityBucket {
        ProbabilityBucket::from_probability(self.market_probability)
    }
}

/// A question as it flows through the pipeline: the immutable record plus
/// the category metadata attached by the categorization stage, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalItem {
    pub question: QuestionRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CategoryMetadata>,
}

impl EvalItem {
    /// Wrap a record that has not been categorized.
    pub fn plain(question: QuestionRecord) -> Self {
        Self { question, metadata: None }
    }

    pub fn id(&self) -> &str {
        &self.question.id
    }

    /// Topic from metadata, `Other` when uncategorized.
    pub fn topic(&self) -> Topic {
        self.metadata.as_ref().map(|m| m.topic).unwrap_or(Topic::Other)
    }

    /// Bucket from metadata, recomputed from the record when uncategorized.
    pub fn probability_bucket(&self) -> ProbabilityBucket {
        self.metadata
            .as_ref()
            .map(|m| m.probability_bucket)
            .unwrap_or_else(|| self.question.probability_bucket())
    }
}

// ---------------------------------------------------------------------------
// Category metadata
// ---------------------------------------------------------------------------

/// Classification attached to a question. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMetadata {
    pub topic: Topic,
    pub time_horizon: TimeHorizon,
    pub question_type: QuestionType,
    pub probability_bucket: ProbabilityBucket,
    pub confidence: ConfidenceLevel,
}

impl fmt::Display for CategoryMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic={} horizon={} type={} bucket={} confidence={}",
            self.topic, self.time_horizon, self.question_type,
            self.probability_bucket, self.confidence,
        )
    }
}

/// Topic of a question, derived from keyword hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Sports,
    Politics,
    Economics,
    Technology,
    Science,
    Entertainment,
    Geopolitics,
    Other,
}

impl Topic {
    /// All known topics in declaration order (tie-break order for classification).
    pub const ALL: &'static [Topic] = &[
        Topic::Sports,
        Topic::Politics,
        Topic::Economics,
        Topic::Technology,
        Topic::Science,
        Topic::Entertainment,
        Topic::Geopolitics,
        Topic::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Sports => "sports",
            Topic::Politics => "politics",
            Topic::Economics => "economics",
            Topic::Technology => "technology",
            Topic::Science => "science",
            Topic::Entertainment => "entertainment",
            Topic::Geopolitics => "geopolitics",
            Topic::Other => "other",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a topic name (case-insensitive).
impl std::str::FromStr for Topic {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sports" | "sport" => Ok(Topic::Sports),
            "politics" | "political" => Ok(Topic::Politics),
            "economics" | "economy" | "econ" => Ok(Topic::Economics),
            "technology" | "tech" => Ok(Topic::Technology),
            "science" => Ok(Topic::Science),
            "entertainment" => Ok(Topic::Entertainment),
            "geopolitics" => Ok(Topic::Geopolitics),
            "other" => Ok(Topic::Other),
            _ => Err(EvalError::Config(format!("Unknown topic: {s}"))),
        }
    }
}

/// Year a question is about, or `no_year` when none can be inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeHorizon {
    Year(u32),
    NoYear,
}

impl fmt::Display for TimeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeHorizon::Year(y) => write!(f, "{y}"),
            TimeHorizon::NoYear => f.write_str("no_year"),
        }
    }
}

impl std::str::FromStr for TimeHorizon {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "no_year" {
            return Ok(TimeHorizon::NoYear);
        }
        s.parse::<u32>()
            .map(TimeHorizon::Year)
            .map_err(|_| EvalError::Dataset(format!("Invalid time horizon: {s}")))
    }
}

impl Serialize for TimeHorizon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeHorizon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Shape of the question, from an ordered rule chain over its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    CompetitionOutcome,
    ThresholdQuestion,
    EventOccurrence,
    NumericalPrediction,
    SelectionQuestion,
    #[default]
    GeneralPrediction,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuestionType::CompetitionOutcome => "competition_outcome",
            QuestionType::ThresholdQuestion => "threshold_question",
            QuestionType::EventOccurrence => "event_occurrence",
            QuestionType::NumericalPrediction => "numerical_prediction",
            QuestionType::SelectionQuestion => "selection_question",
            QuestionType::GeneralPrediction => "general_prediction",
        };
        f.write_str(s)
    }
}

/// One of ten 10-point-wide probability ranges, identified by its lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProbabilityBucket(u8);

impl ProbabilityBucket {
    /// Floor-to-10 of the probability. 100 lands in the top "90-100%" bucket.
    pub fn from_probability(probability: f64) -> Self {
        let p = if probability.is_nan() { 50.0 } else { probability.clamp(0.0, 100.0) };
        let lower = ((p / 10.0).floor() as u8).min(9) * 10;
        Self(lower)
    }

    pub fn lower(&self) -> u8 {
        self.0
    }

    pub fn upper(&self) -> u8 {
        self.0 + 10
    }
}

impl fmt::Display for ProbabilityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}%", self.lower(), self.upper())
    }
}

impl Serialize for ProbabilityBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProbabilityBucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let lower = s
            .split('-')
            .next()
            .and_then(|lo| lo.parse::<u8>().ok())
            .filter(|lo| lo % 10 == 0 && *lo <= 90)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid probability bucket: {s}")))?;
        Ok(Self(lower))
    }
}

/// How far the market sits from a coin flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    #[serde(rename = "high_confidence")]
    High,
    #[serde(rename = "medium_confidence")]
    Medium,
    #[serde(rename = "low_confidence")]
    Low,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceLevel::High => f.write_str("high_confidence"),
            ConfidenceLevel::Medium => f.write_str("medium_confidence"),
            ConfidenceLevel::Low => f.write_str("low_confidence"),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasts and scores
// ---------------------------------------------------------------------------

/// Normalized result of one forecaster call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutcome {
    /// Forecast probability on the 0–100 scale (50 when absent).
    pub probability: f64,
    /// Present when the call failed for any reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: String,
    /// Cost reported by the forecaster itself, if it sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_cost_usd: Option<Decimal>,
}

impl fmt::Display for ForecastOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(f, "error: {e} (model={})", self.model),
            None => write!(
                f,
                "P={:.1}% (tokens in={} out={} model={})",
                self.probability, self.tokens_in, self.tokens_out, self.model,
            ),
        }
    }
}

impl ForecastOutcome {
    /// A failed outcome carrying the given error message.
    pub fn failed(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            probability: 50.0,
            error: Some(error.into()),
            tokens_in: 0,
            tokens_out: 0,
            model: model.into(),
            reported_cost_usd: None,
        }
    }

    /// A successful outcome with no token usage (handy for tests and replays).
    pub fn succeeded(model: impl Into<String>, probability: f64) -> Self {
        Self {
            probability,
            error: None,
            tokens_in: 0,
            tokens_out: 0,
            model: model.into(),
            reported_cost_usd: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One metric's grade for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub name: String,
    pub value: f64,
    pub reason: String,
}

impl fmt::Display for ScoreResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.3} ({})", self.name, self.value, self.reason)
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Lifecycle of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Dispatching,
    Collecting,
    Finalized,
    Aborted,
}

impl RunState {
    /// Move to `next` if the transition is legal.
    pub fn advance(self, next: RunState) -> Result<RunState, EvalError> {
        use RunState::*;
        let legal = matches!(
            (self, next),
            (Pending, Dispatching)
                | (Dispatching, Collecting)
                | (Collecting, Finalized)
                | (Dispatching, Aborted)
                | (Collecting, Aborted)
        );
        if legal {
            Ok(next)
        } else {
            Err(EvalError::Config(format!("Illegal run transition {self:?} -> {next:?}")))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finalized | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Dispatching => "dispatching",
            RunState::Collecting => "collecting",
            RunState::Finalized => "finalized",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Per-item result record, tagged with its originating question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// Position of the item in the run's input order.
    pub index: usize,
    pub question_id: String,
    pub question: String,
    pub market_probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CategoryMetadata>,
    pub outcome: ForecastOutcome,
    pub scores: Vec<ScoreResult>,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
}

impl ItemResult {
    pub fn score(&self, name: &str) -> Option<f64> {
        self.scores.iter().find(|s| s.name == name).map(|s| s.value)
    }
}

/// Run configuration recorded with the experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub dataset: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub concurrency: usize,
    pub num_forecasts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub categories: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Everything a finished run hands to the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub run_id: String,
    pub experiment: String,
    pub config: ExperimentConfig,
    pub state: RunState,
    /// Results in input order.
    pub items: Vec<ItemResult>,
    /// Item count per market-probability bucket.
    pub market_histogram: BTreeMap<String, usize>,
    /// Item count per forecast-probability bucket (successful items only).
    pub forecast_histogram: BTreeMap<String, usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_cost_usd: Decimal,
    pub mean_cost_usd: Decimal,
    /// Mean value per metric over successful items.
    pub mean_scores: BTreeMap<String, f64>,
    /// Mean value per metric, per topic.
    pub topic_scores: BTreeMap<String, BTreeMap<String, f64>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Items per second of wall-clock time.
    pub throughput: f64,
}

impl fmt::Display for ExperimentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} items ({} ok / {} failed) cost=${:.4} in {:.1}s ({:.2} items/s)",
            self.experiment,
            self.state,
            self.items.len(),
            self.succeeded,
            self.failed,
            self.total_cost_usd,
            self.duration_secs,
            self.throughput,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the harness.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// Fatal before dispatch: unknown dataset, missing file, bad config.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Forecast error ({model}): {message}")]
    Forecast { model: String, message: String },

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
