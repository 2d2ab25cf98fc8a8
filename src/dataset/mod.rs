//! Question datasets: loading, normalization, categorization and curation.
//!
//! The pipeline is composed explicitly by the caller:
//! `load_dataset` (loader stage) → `Categorizer::decorate` (optional
//! decorator stage) → `Curator::select` (optional sampling stage).

pub mod categorize;
pub mod curate;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::DatasetConfig;
use crate::types::{EvalError, QuestionRecord};

/// Default probability for items that arrive without one.
pub const DEFAULT_PROBABILITY: f64 = 50.0;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Probability filter applied to a named dataset on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFilter {
    /// Keep everything.
    #[default]
    All,
    /// Markets at or beyond 80% / 20%.
    Confident,
    /// Markets between 30% and 70% inclusive.
    Moderate,
}

impl DatasetFilter {
    pub fn accepts(&self, market_probability: f64) -> bool {
        match self {
            DatasetFilter::All => true,
            DatasetFilter::Confident => market_probability >= 80.0 || market_probability <= 20.0,
            DatasetFilter::Moderate => (30.0..=70.0).contains(&market_probability),
        }
    }
}

// ---------------------------------------------------------------------------
// Probability normalization
// ---------------------------------------------------------------------------

/// Bring a probability onto the 0–100 scale.
///
/// Values ≤ 1 are fractions and are multiplied by 100. Values above 100
/// are divided by 100 until they fit, so 150 becomes 1.5 (not 15).
pub fn normalize_probability(raw: f64) -> f64 {
    if !raw.is_finite() {
        return DEFAULT_PROBABILITY;
    }
    let mut p = raw;
    if p <= 1.0 {
        p *= 100.0;
    } else {
        while p > 100.0 {
            p /= 100.0;
        }
    }
    p.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDataset {
    Wrapped { questions: Vec<Value> },
    Bare(Vec<Value>),
}

/// One question entry. Fields stay untyped so a single wrong-typed
/// optional field degrades that field, not the whole file.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default, alias = "title")]
    question: Option<Value>,
    #[serde(default, alias = "current_probability")]
    market_probability: Option<Value>,
    #[serde(default)]
    platform: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    source: Option<Value>,
    #[serde(default)]
    url: Option<Value>,
    #[serde(default)]
    relevance: Option<Value>,
}

/// Where a shape warning came from.
struct Origin<'a> {
    source: &'a str,
    index: usize,
}

impl Origin<'_> {
    fn ignored(&self, field: &str, value: &Value) {
        warn!(source = self.source, index = self.index, field, value = %value, "Ignoring malformed field");
    }
}

fn id_string(value: Option<Value>, origin: &Origin) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) => format!("q-{}", origin.index),
        Some(other) => {
            origin.ignored("id", &other);
            format!("q-{}", origin.index)
        }
    }
}

/// Numbers, or numeric strings such as `"0.42"`.
fn number(value: Option<Value>, field: &str, origin: &Origin) -> Option<f64> {
    match value? {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                origin.ignored(field, &Value::String(s));
                None
            }
        },
        other => {
            origin.ignored(field, &other);
            None
        }
    }
}

fn text(value: Option<Value>, field: &str, origin: &Origin) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => {
            origin.ignored(field, &other);
            None
        }
    }
}

/// Platform arrives either as a plain label or as `{"label": ...}`.
fn platform_label(value: Option<Value>, origin: &Origin) -> Option<String> {
    match value? {
        Value::Object(map) => {
            if let Some(Value::String(label)) = map.get("label") {
                return Some(label.clone());
            }
            origin.ignored("platform", &Value::Object(map));
            None
        }
        other => text(Some(other), "platform", origin),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse question JSON (`{"questions": [...]}` or a bare list) into records.
///
/// Only a file that is not JSON, or has neither shape, is an error. Entries
/// that are not objects or have no text are skipped, and malformed optional
/// fields fall back to their defaults, each with a warning.
pub fn parse_questions(json: &str, source: &str) -> Result<Vec<QuestionRecord>, EvalError> {
    let raw: RawDataset = serde_json::from_str(json)
        .map_err(|e| EvalError::Dataset(format!("{source}: {e}")))?;
    let raw = match raw {
        RawDataset::Wrapped { questions } => questions,
        RawDataset::Bare(list) => list,
    };

    let mut records = Vec::with_capacity(raw.len());
    let mut defaulted = 0usize;
    for (index, entry) in raw.into_iter().enumerate() {
        let origin = Origin { source, index };
        let q: RawQuestion = match entry {
            Value::Object(_) => match serde_json::from_value(entry) {
                Ok(q) => q,
                Err(e) => {
                    warn!(source, index, error = %e, "Skipping unreadable entry");
                    continue;
                }
            },
            other => {
                warn!(source, index, value = %other, "Skipping entry that is not an object");
                continue;
            }
        };

        let question = match text(q.question, "question", &origin).map(|t| t.trim().to_string()) {
            Some(t) if !t.is_empty() => t,
            _ => {
                warn!(source, index, "Skipping question with no text");
                continue;
            }
        };
        let market_probability = match number(q.market_probability, "market_probability", &origin) {
            Some(p) => normalize_probability(p),
            None => {
                defaulted += 1;
                DEFAULT_PROBABILITY
            }
        };
        records.push(QuestionRecord {
            id: id_string(q.id, &origin),
            question,
            market_probability,
            platform: platform_label(q.platform, &origin).unwrap_or_else(|| "Unknown".to_string()),
            source: text(q.source, "source", &origin),
            url: text(q.url, "url", &origin),
            relevance: number(q.relevance, "relevance", &origin),
        });
    }

    if defaulted > 0 {
        warn!(source, count = defaulted, "Questions missing market_probability defaulted to 50%");
    }
    Ok(records)
}

/// Load and normalize every question in a JSON file.
pub fn load_questions(path: &Path) -> Result<Vec<QuestionRecord>, EvalError> {
    if !path.exists() {
        return Err(EvalError::Config(format!("Data file not found: {}", path.display())));
    }
    let json = std::fs::read_to_string(path)?;
    parse_questions(&json, &path.display().to_string())
}

/// Resolve a dataset entry's file against the data directory.
pub fn dataset_path(dataset: &DatasetConfig, data_dir: &Path) -> PathBuf {
    let file = Path::new(&dataset.file);
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        data_dir.join(file)
    }
}

/// Loader stage: read a named dataset, apply its filter, then the limit.
pub fn load_dataset(
    dataset: &DatasetConfig,
    data_dir: &Path,
    limit: Option<usize>,
) -> Result<Vec<QuestionRecord>, EvalError> {
    let path = dataset_path(dataset, data_dir);
    let all = load_questions(&path)?;
    let total = all.len();

    let mut questions: Vec<QuestionRecord> = all
        .into_iter()
        .filter(|q| dataset.filter.accepts(q.market_probability))
        .collect();
    let filtered_out = total - questions.len();

    if let Some(limit) = limit {
        questions.truncate(limit);
    }

    info!(
        dataset = %dataset.name,
        path = %path.display(),
        total,
        filtered_out,
        loaded = questions.len(),
        "Dataset loaded"
    );
    Ok(questions)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("forecast_eval_test_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&p, contents).unwrap();
        p
    }

    fn dataset(file: &Path, filter: DatasetFilter) -> DatasetConfig {
        DatasetConfig {
            name: "test".into(),
            file: file.to_string_lossy().to_string(),
            filter,
            description: None,
        }
    }

    #[test]
    fn test_normalize_fraction() {
        assert!((normalize_probability(0.42) - 42.0).abs() < 1e-9);
        assert_eq!(normalize_probability(1.0), 100.0);
        assert_eq!(normalize_probability(0.0), 0.0);
    }

    #[test]
    fn test_normalize_percent_unchanged() {
        assert_eq!(normalize_probability(42.0), 42.0);
        assert_eq!(normalize_probability(100.0), 100.0);
    }

    #[test]
    fn test_normalize_over_hundred_divides_until_fit() {
        assert!((normalize_probability(4200.0) - 42.0).abs() < 1e-9);
        assert!((normalize_probability(150.0) - 1.5).abs() < 1e-9);
        assert!((normalize_probability(420_000.0) - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_garbage() {
        assert_eq!(normalize_probability(f64::NAN), 50.0);
        assert_eq!(normalize_probability(-0.5), 0.0);
    }

    #[test]
    fn test_parse_wrapped_format() {
        let json = r#"{"metadata": {"source": "x"}, "questions": [
            {"question": "Will A happen?", "market_probability": 0.3, "platform": "Metaculus", "id": "abc"},
            {"question": "Will B happen?", "market_probability": 65, "id": 17}
        ]}"#;
        let qs = parse_questions(json, "test").unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].id, "abc");
        assert!((qs[0].market_probability - 30.0).abs() < 1e-9);
        assert_eq!(qs[0].platform, "Metaculus");
        assert_eq!(qs[1].id, "17");
        assert_eq!(qs[1].market_probability, 65.0);
        assert_eq!(qs[1].platform, "Unknown");
    }

    #[test]
    fn test_parse_bare_list_with_legacy_fields() {
        let json = r#"[
            {"title": "Will C happen?", "current_probability": 0.8, "platform": {"label": "Polymarket"}}
        ]"#;
        let qs = parse_questions(json, "test").unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].question, "Will C happen?");
        assert!((qs[0].market_probability - 80.0).abs() < 1e-9);
        assert_eq!(qs[0].platform, "Polymarket");
        assert_eq!(qs[0].id, "q-0");
    }

    #[test]
    fn test_parse_defaults_and_skips() {
        let json = r#"[
            {"question": "No probability?"},
            {"market_probability": 40},
            {"question": "   "}
        ]"#;
        let qs = parse_questions(json, "test").unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].market_probability, 50.0);
    }

    #[test]
    fn test_parse_wrong_typed_fields_degrade_per_item() {
        let json = r#"{"questions": [
            {"question": "Relevance as text?", "market_probability": 0.3, "relevance": "high"},
            {"question": "Platform without label?", "market_probability": 40, "platform": {"name": "Kalshi"}},
            {"question": "Numeric strings?", "market_probability": "0.25", "relevance": "0.9", "id": ["x"]},
            {"question": "Odd probability?", "market_probability": {"value": 1}, "url": 7},
            42,
            {"question": 17, "market_probability": 20}
        ]}"#;
        let qs = parse_questions(json, "test").unwrap();
        assert_eq!(qs.len(), 4);

        assert!((qs[0].market_probability - 30.0).abs() < 1e-9);
        assert_eq!(qs[0].relevance, None);

        assert_eq!(qs[1].platform, "Unknown");
        assert_eq!(qs[1].market_probability, 40.0);

        assert!((qs[2].market_probability - 25.0).abs() < 1e-9);
        assert_eq!(qs[2].relevance, Some(0.9));
        assert_eq!(qs[2].id, "q-2");

        assert_eq!(qs[3].market_probability, DEFAULT_PROBABILITY);
        assert_eq!(qs[3].url, None);
    }

    #[test]
    fn test_parse_malformed_is_dataset_error() {
        let err = parse_questions("{not json", "bad.json").unwrap_err();
        assert!(matches!(err, EvalError::Dataset(_)));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_questions(Path::new("/nonexistent/questions.json")).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_filters() {
        assert!(DatasetFilter::All.accepts(50.0));
        assert!(DatasetFilter::Confident.accepts(85.0));
        assert!(DatasetFilter::Confident.accepts(20.0));
        assert!(!DatasetFilter::Confident.accepts(50.0));
        assert!(DatasetFilter::Moderate.accepts(30.0));
        assert!(DatasetFilter::Moderate.accepts(70.0));
        assert!(!DatasetFilter::Moderate.accepts(75.0));
    }

    #[test]
    fn test_load_dataset_filter_then_limit() {
        let path = temp_file(
            r#"{"questions": [
                {"question": "a", "market_probability": 10},
                {"question": "b", "market_probability": 50},
                {"question": "c", "market_probability": 90},
                {"question": "d", "market_probability": 95}
            ]}"#,
        );
        let ds = dataset(&path, DatasetFilter::Confident);
        let qs = load_dataset(&ds, Path::new("/unused"), Some(2)).unwrap();
        let texts: Vec<&str> = qs.iter().map(|q| q.question.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_dataset_path_relative() {
        let ds = DatasetConfig {
            name: "x".into(),
            file: "balanced.json".into(),
            filter: DatasetFilter::All,
            description: None,
        };
        assert_eq!(dataset_path(&ds, Path::new("data")), PathBuf::from("data/balanced.json"));
    }
}
