//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the forecaster API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::dataset::DatasetFilter;
use crate::engine::accountant::ModelPrice;
use crate::types::EvalError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub evaluation: EvaluationConfig,
    pub forecaster: ForecasterConfig,
    #[serde(default)]
    pub categorizer: CategorizerConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// Name of the `[[datasets]]` entry to evaluate.
    pub dataset: String,
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Worker pool width.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-call forecaster timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecasterConfig {
    pub url: String,
    pub api_key_env: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_num_forecasts")]
    pub num_forecasts: u32,
    /// Extra request fields merged into every forecaster call.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategorizerConfig {
    /// Year that "this year" / "next year" phrases are resolved against.
    #[serde(default = "default_reference_year")]
    pub reference_year: u32,
    /// Topic name → keyword phrases, replacing the built-in list for that topic.
    #[serde(default)]
    pub keywords: HashMap<String, Vec<String>>,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            reference_year: default_reference_year(),
            keywords: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_near_duplicate_cap")]
    pub near_duplicate_cap: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Balance topics inside each probability band.
    #[serde(default)]
    pub diversify_topics: bool,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_count: default_target_count(),
            near_duplicate_cap: default_near_duplicate_cap(),
            seed: default_seed(),
            diversify_topics: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    /// Model whose pricing applies to unknown model identifiers.
    pub default_model: String,
    pub models: HashMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-opus-4-20250514".to_string(),
            ModelPrice { input_per_million: dec!(15.00), output_per_million: dec!(75.00) },
        );
        models.insert(
            "claude-3-5-sonnet-20241022".to_string(),
            ModelPrice { input_per_million: dec!(3.00), output_per_million: dec!(15.00) },
        );
        models.insert(
            "claude-3-haiku-20240307".to_string(),
            ModelPrice { input_per_million: dec!(0.25), output_per_million: dec!(1.25) },
        );
        Self {
            default_model: "claude-opus-4-20250514".to_string(),
            models,
        }
    }
}

/// A named question file plus the probability filter applied on load.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub name: String,
    /// Path relative to `evaluation.data_dir` (or absolute).
    pub file: String,
    #[serde(default)]
    pub filter: DatasetFilter,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_concurrency() -> usize {
    16
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_output_dir() -> String {
    "eval_output".to_string()
}

fn default_num_forecasts() -> u32 {
    1
}

fn default_reference_year() -> u32 {
    2025
}

fn default_target_count() -> usize {
    50
}

fn default_near_duplicate_cap() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.evaluation.concurrency == 0 {
            return Err(EvalError::Config("evaluation.concurrency must be at least 1".into()));
        }
        if self.evaluation.timeout_secs == 0 {
            return Err(EvalError::Config("evaluation.timeout_secs must be at least 1".into()));
        }
        if self.forecaster.num_forecasts == 0 {
            return Err(EvalError::Config("forecaster.num_forecasts must be at least 1".into()));
        }
        if !self.pricing.models.contains_key(&self.pricing.default_model) {
            return Err(EvalError::Config(format!(
                "pricing.default_model '{}' has no entry in pricing.models",
                self.pricing.default_model
            )));
        }
        Ok(())
    }

    /// Look up a configured dataset by name.
    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig, EvalError> {
        self.datasets.iter().find(|d| d.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.datasets.iter().map(|d| d.name.as_str()).collect();
            EvalError::Config(format!(
                "Unknown dataset: {name} (available: {})",
                known.join(", ")
            ))
        })
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve the forecaster API key, if set.
    pub fn forecaster_api_key(&self) -> Option<SecretString> {
        Self::resolve_env(&self.forecaster.api_key_env)
            .ok()
            .map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[evaluation]
dataset = "balanced"
limit = 10

[forecaster]
url = "http://localhost:3000/api/tools/forecaster"
api_key_env = "FORECASTER_API_KEY"
model = "claude-3-5-sonnet-20241022"

[forecaster.parameters]
usePerplexity = false

[curation]
enabled = true
target_count = 20

[[datasets]]
name = "balanced"
file = "balanced_50_questions.json"

[[datasets]]
name = "metaculus-easy"
file = "current_questions.json"
filter = "confident"
"#;

    #[test]
    fn test_parse_sample_config() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.evaluation.dataset, "balanced");
        assert_eq!(cfg.evaluation.limit, Some(10));
        assert_eq!(cfg.evaluation.concurrency, 16);
        assert_eq!(cfg.evaluation.timeout_secs, 30);
        assert_eq!(cfg.forecaster.num_forecasts, 1);
        assert_eq!(cfg.forecaster.parameters["usePerplexity"], serde_json::json!(false));
        assert!(cfg.curation.enabled);
        assert_eq!(cfg.curation.target_count, 20);
        assert_eq!(cfg.curation.near_duplicate_cap, 2);
        assert_eq!(cfg.categorizer.reference_year, 2025);
        assert_eq!(cfg.pricing.default_model, "claude-opus-4-20250514");
        assert_eq!(cfg.datasets.len(), 2);
        assert_eq!(cfg.datasets[1].filter, DatasetFilter::Confident);
    }

    #[test]
    fn test_dataset_lookup() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.dataset("balanced").unwrap().file, "balanced_50_questions.json");
        let err = cfg.dataset("nope").unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert!(err.to_string().contains("metaculus-easy"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let bad = SAMPLE.replace("limit = 10", "limit = 10\nconcurrency = 0");
        assert!(AppConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn test_default_model_must_be_priced() {
        let bad = format!(
            "{SAMPLE}\n[pricing]\ndefault_model = \"mystery\"\n[pricing.models.other]\ninput_per_million = 1.0\noutput_per_million = 2.0\n"
        );
        assert!(AppConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load("/nonexistent/forecast-eval.toml").is_err());
    }
}
