//! End-to-end pipeline tests.
//!
//! Exercises load → categorize → curate → track → run → log with a
//! mock forecaster and temp directories. No network access required.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use forecast_eval::config::AppConfig;
use forecast_eval::dataset::categorize::{analyze_distribution, Categorizer};
use forecast_eval::dataset::curate::Curator;
use forecast_eval::dataset::load_dataset;
use forecast_eval::engine::accountant::PricingTable;
use forecast_eval::engine::orchestrator::{Orchestrator, RunSettings};
use forecast_eval::scoring::Scorer;
use forecast_eval::tracking::{experiment_name, tracked_dataset_name, JsonTracker, Tracker};
use forecast_eval::types::{EvalError, EvalItem, ExperimentConfig, RunState, Topic};

use crate::mock_forecaster::MockForecaster;

fn temp_dir() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("forecast_eval_it_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&p).unwrap();
    p
}

/// 30 questions spread over all probability bands, plus 4 F1 near-duplicates.
fn write_questions(dir: &Path) {
    let mut questions = Vec::new();
    let stems = [
        "Will the Lakers win the NBA championship",
        "Will the Senate pass the election reform bill",
        "Will inflation exceed 3% in 2026",
        "Will OpenAI release a new AI model",
        "Will the film win the Oscar",
    ];
    for i in 0..30 {
        let stem = stems[i % stems.len()];
        questions.push(serde_json::json!({
            "id": format!("q{i}"),
            "question": format!("{stem} (#{i})?"),
            "market_probability": (i as f64 * 3.3 + 1.0) / 100.0,
            "platform": "Metaculus"
        }));
    }
    for (i, pos) in ["fourth", "fifth", "fourth", "fifth"].iter().enumerate() {
        questions.push(serde_json::json!({
            "id": format!("f1-{i}"),
            "title": format!("Will driver {i} finish {pos} in the F1 drivers championship?"),
            "current_probability": 45
        }));
    }
    let body = serde_json::json!({ "questions": questions });
    std::fs::write(dir.join("pool.json"), serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

fn config(dir: &Path) -> AppConfig {
    let toml = format!(
        r#"
[evaluation]
dataset = "pool"
concurrency = 4
timeout_secs = 5
data_dir = "{data}"
output_dir = "{out}"

[forecaster]
url = "http://localhost:0/unused"
api_key_env = "FORECAST_EVAL_IT_KEY"
model = "claude-3-5-sonnet-20241022"

[curation]
enabled = true
target_count = 20
seed = 7

[[datasets]]
name = "pool"
file = "pool.json"

[[datasets]]
name = "pool-confident"
file = "pool.json"
filter = "confident"
"#,
        data = dir.display(),
        out = dir.join("out").display(),
    );
    AppConfig::from_toml_str(&toml).unwrap()
}

fn prepare(cfg: &AppConfig, dataset: &str) -> Vec<EvalItem> {
    prepare_with(cfg, dataset, cfg.curation.seed, cfg.curation.target_count)
}

fn decorated(cfg: &AppConfig, dataset: &str) -> Vec<EvalItem> {
    let ds = cfg.dataset(dataset).unwrap();
    let questions = load_dataset(ds, Path::new(&cfg.evaluation.data_dir), cfg.evaluation.limit).unwrap();
    let categorizer = Categorizer::from_config(&cfg.categorizer).unwrap();
    categorizer.decorate(questions)
}

fn prepare_with(cfg: &AppConfig, dataset: &str, seed: u64, target: usize) -> Vec<EvalItem> {
    let items = decorated(cfg, dataset);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Curator::default().select(&items, target, cfg.curation.near_duplicate_cap, &mut rng)
}

fn orchestrator(cfg: &AppConfig, forecaster: Arc<MockForecaster>) -> Orchestrator {
    Orchestrator::new(
        forecaster,
        Scorer::standard(),
        PricingTable::from_config(&cfg.pricing),
        RunSettings::from_config(cfg),
    )
}

fn experiment_config(cfg: &AppConfig) -> ExperimentConfig {
    ExperimentConfig {
        dataset: cfg.evaluation.dataset.clone(),
        model: "claude-3-5-sonnet-20241022".into(),
        timestamp: chrono::Utc::now(),
        concurrency: cfg.evaluation.concurrency,
        num_forecasts: cfg.forecaster.num_forecasts,
        description: None,
        categories: vec!["topic".into()],
        parameters: serde_json::Map::new(),
    }
}

#[test]
fn test_prepare_respects_curation_rules() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);

    let items = prepare(&cfg, "pool");
    assert_eq!(items.len(), 20);
    let f1 = items.iter().filter(|i| i.id().starts_with("f1-")).count();
    assert!(f1 <= 2, "near-duplicate cap broken: {f1}");

    let again = prepare(&cfg, "pool");
    let ids: Vec<&str> = items.iter().map(|i| i.id()).collect();
    let ids_again: Vec<&str> = again.iter().map(|i| i.id()).collect();
    assert_eq!(ids, ids_again);

    let dist = analyze_distribution(&items);
    assert!(dist.topic.get("sports").copied().unwrap_or(0) > 0);
    assert!(items.iter().all(|i| i.metadata.is_some()));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_named_filter_applies() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);

    let ds = cfg.dataset("pool-confident").unwrap();
    let questions = load_dataset(ds, Path::new(&cfg.evaluation.data_dir), None).unwrap();
    assert!(!questions.is_empty());
    assert!(questions
        .iter()
        .all(|q| q.market_probability <= 20.0 || q.market_probability >= 80.0));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_unknown_dataset_is_fatal() {
    let dir = temp_dir();
    let cfg = config(&dir);
    assert!(matches!(cfg.dataset("missing"), Err(EvalError::Config(_))));

    let ds = cfg.dataset("pool").unwrap();
    let err = load_dataset(ds, Path::new(&cfg.evaluation.data_dir), None).unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_full_run_is_tracked() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);
    let items = prepare(&cfg, "pool");

    let tracker = JsonTracker::new(&cfg.evaluation.output_dir);
    let handle = tracker.create_or_get_dataset("forecaster-pool-test", None).unwrap();

    let rejected = items[3].question.question.clone();
    let forecaster = Arc::new(MockForecaster::new(50.0).reject(&rejected));
    let orchestrator = orchestrator(&cfg, forecaster.clone());

    let name = experiment_name("pool", chrono::Utc::now());
    let (summary, logged) = orchestrator
        .run_tracked(&tracker, &handle, &name, experiment_config(&cfg), &items)
        .await
        .unwrap();

    assert_eq!(summary.state, RunState::Finalized);
    assert_eq!(summary.items.len(), 20);
    assert_eq!(forecaster.requests().len(), 20);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 19);
    assert_eq!(summary.items[3].outcome.error.as_deref(), Some("forecaster declined"));
    assert!(summary.items[3].scores.iter().all(|s| s.value == 0.0));

    // Published order follows the curated order, which is what got stored.
    let stored = tracker.load_items(&handle).unwrap();
    assert_eq!(stored.len(), 20);
    for ((result, item), kept) in summary.items.iter().zip(&items).zip(&stored) {
        assert_eq!(result.question_id, item.id());
        assert_eq!(kept.id(), item.id());
    }

    // Sonnet at 2000 / 500 tokens per call.
    assert_eq!(summary.items[0].cost_usd, dec!(0.0135));
    assert_eq!(summary.total_cost_usd, dec!(0.0135) * rust_decimal::Decimal::from(19u64));
    assert_eq!(summary.market_histogram.values().sum::<usize>(), 20);
    assert_eq!(summary.forecast_histogram.get("50-60%"), Some(&19));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&logged.location).unwrap()).unwrap();
    assert_eq!(json["dataset"], "forecaster-pool-test");
    assert_eq!(json["items"].as_array().unwrap().len(), 20);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_same_day_rerun_evaluates_only_its_own_selection() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);

    let first = prepare_with(&cfg, "pool", 1, 10);
    let second = prepare_with(&cfg, "pool", 2, 10);
    let first_ids: HashSet<&str> = first.iter().map(|i| i.id()).collect();
    assert!(second.iter().any(|i| !first_ids.contains(i.id())));

    // Both runs land in the same day's tracked dataset.
    let now = chrono::Utc::now();
    let tracker = JsonTracker::new(&cfg.evaluation.output_dir);
    let dataset = tracked_dataset_name("pool", now);

    for (n, selection) in [&first, &second].into_iter().enumerate() {
        let handle = tracker.create_or_get_dataset(&dataset, None).unwrap();
        let forecaster = Arc::new(MockForecaster::new(50.0));
        let (summary, _) = orchestrator(&cfg, forecaster.clone())
            .run_tracked(&tracker, &handle, &format!("rerun-{n}"), experiment_config(&cfg), selection)
            .await
            .unwrap();

        assert_eq!(summary.items.len(), selection.len());
        assert_eq!(forecaster.requests().len(), selection.len());
        let evaluated: Vec<&str> = summary.items.iter().map(|r| r.question_id.as_str()).collect();
        let expected: Vec<&str> = selection.iter().map(|i| i.id()).collect();
        assert_eq!(evaluated, expected);
    }

    // The dataset itself accumulates both selections.
    let handle = tracker.create_or_get_dataset(&dataset, None).unwrap();
    let union: HashSet<&str> = first.iter().chain(&second).map(|i| i.id()).collect();
    assert_eq!(tracker.load_items(&handle).unwrap().len(), union.len());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_forecaster_outage_degrades_every_item() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);
    let items = prepare(&cfg, "pool");

    let forecaster = Arc::new(MockForecaster::new(50.0));
    forecaster.set_error("connection refused");
    let orchestrator = Orchestrator::new(
        forecaster,
        Scorer::standard(),
        PricingTable::default(),
        RunSettings { concurrency: 3, timeout: Duration::from_secs(5), ..RunSettings::default() },
    );

    let summary = orchestrator.run("outage", experiment_config(&cfg), &items).await.unwrap();
    assert_eq!(summary.state, RunState::Finalized);
    assert_eq!(summary.failed, items.len());
    assert!(summary.mean_scores.is_empty());
    assert_eq!(summary.total_cost_usd, rust_decimal::Decimal::ZERO);
    assert!(summary.forecast_histogram.is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_topic_breakdown_in_summary() {
    let dir = temp_dir();
    write_questions(&dir);
    let cfg = config(&dir);
    let items = decorated(&cfg, "pool");

    // Six Lakers questions and four F1 questions.
    let sports_items = items.iter().filter(|i| i.topic() == Topic::Sports).count();
    assert_eq!(sports_items, 10);

    let forecaster = Arc::new(MockForecaster::new(50.0).answer(&items[0].question.question, 90.0));
    let summary = orchestrator(&cfg, forecaster)
        .run("topics", experiment_config(&cfg), &items)
        .await
        .unwrap();
    assert_eq!(summary.items[0].outcome.probability, 90.0);

    let sports = Topic::Sports.to_string();
    let scores = summary.topic_scores.get(&sports).expect("sports breakdown missing");
    for metric in ["brier_score", "log_score", "calibration"] {
        let value = scores.get(metric).copied().unwrap_or(-1.0);
        assert!((0.0..=1.0).contains(&value), "{metric} = {value}");
    }
    assert_eq!(summary.mean_scores.len(), 3);

    std::fs::remove_dir_all(&dir).unwrap();
}
