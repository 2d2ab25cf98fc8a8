//! forecast-eval — forecaster evaluation harness.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! prepares the evaluation set (load → categorize → curate), persists it
//! through the tracker and runs one experiment against the forecaster.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use forecast_eval::config::AppConfig;
use forecast_eval::dataset::categorize::{analyze_distribution, Categorizer, Distribution};
use forecast_eval::dataset::curate::{band_distribution, Curator};
use forecast_eval::dataset::load_dataset;
use forecast_eval::engine::accountant::{format_cost, PricingTable, TokenProfile};
use forecast_eval::engine::orchestrator::{Orchestrator, RunSettings};
use forecast_eval::forecaster::http::HttpForecaster;
use forecast_eval::scoring::Scorer;
use forecast_eval::tracking::{experiment_name, tracked_dataset_name, JsonTracker, Tracker};
use forecast_eval::types::{ExperimentConfig, ExperimentSummary};

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("FORECAST_EVAL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();
    info!(
        config = %config_path,
        dataset = %cfg.evaluation.dataset,
        forecaster = %cfg.forecaster.url,
        "forecast-eval starting"
    );

    // -- Prepare the evaluation set ---------------------------------------

    let dataset_name = cfg.evaluation.dataset.clone();
    let dataset_cfg = cfg.dataset(&dataset_name)?;
    let questions = load_dataset(dataset_cfg, Path::new(&cfg.evaluation.data_dir), cfg.evaluation.limit)?;
    if questions.is_empty() {
        bail!("Dataset '{dataset_name}' produced no questions");
    }

    let categorizer = Categorizer::from_config(&cfg.categorizer)?;
    let mut items = categorizer.decorate(questions);
    analyze_distribution(&items).log_summary();

    if cfg.curation.enabled {
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.curation.seed);
        let curator = Curator::default().with_topic_diversity(cfg.curation.diversify_topics);
        items = curator.select(&items, cfg.curation.target_count, cfg.curation.near_duplicate_cap, &mut rng);
        info!(
            selected = items.len(),
            target = cfg.curation.target_count,
            seed = cfg.curation.seed,
            bands = ?band_distribution(&items),
            "Curated evaluation set"
        );
    }

    // -- Estimate cost -----------------------------------------------------

    let pricing = PricingTable::from_config(&cfg.pricing);
    let settings = RunSettings::from_config(&cfg);
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| pricing.default_model().to_string());
    let estimate = pricing.estimate(
        &model,
        TokenProfile::from_parameters(&settings.parameters),
        items.len(),
        settings.num_forecasts,
    );
    info!(
        items = items.len(),
        model = %model,
        num_forecasts = settings.num_forecasts,
        estimated_cost = %format_cost(estimate),
        "Estimated run cost"
    );

    // -- Tracked dataset ---------------------------------------------------

    let now = Utc::now();
    let tracker = JsonTracker::new(&cfg.evaluation.output_dir);
    let handle = tracker.create_or_get_dataset(
        &tracked_dataset_name(&dataset_name, now),
        dataset_cfg.description.as_deref(),
    )?;

    // -- Run ---------------------------------------------------------------

    let api_key = cfg.forecaster_api_key();
    if api_key.is_none() {
        warn!(env = %cfg.forecaster.api_key_env, "No forecaster API key set, calling without auth");
    }
    let forecaster = HttpForecaster::new(cfg.forecaster.url.clone(), api_key, settings.timeout)?;

    let experiment = cfg
        .evaluation
        .experiment
        .clone()
        .unwrap_or_else(|| experiment_name(&dataset_name, now));
    let experiment_config = ExperimentConfig {
        dataset: dataset_name.clone(),
        model,
        timestamp: now,
        concurrency: settings.concurrency,
        num_forecasts: settings.num_forecasts,
        description: cfg.evaluation.description.clone(),
        categories: Distribution::AXES.iter().map(|a| a.to_string()).collect(),
        parameters: settings.parameters.clone(),
    };

    let orchestrator = Orchestrator::new(Arc::new(forecaster), Scorer::standard(), pricing, settings);
    let (summary, logged) = orchestrator
        .run_tracked(&tracker, &handle, &experiment, experiment_config, &items)
        .await
        .context("Evaluation run failed")?;

    log_summary(&summary);
    println!("{summary}");
    info!(path = %logged.location.display(), "Results written");

    Ok(())
}

/// Log the headline numbers of a finished run.
fn log_summary(summary: &ExperimentSummary) {
    for (metric, mean) in &summary.mean_scores {
        info!(metric = %metric, mean = format!("{mean:.3}").as_str(), "Mean score");
    }
    for (topic, scores) in &summary.topic_scores {
        info!(topic = %topic, scores = ?scores, "Topic scores");
    }
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        total_cost = %format_cost(summary.total_cost_usd),
        mean_cost = %format_cost(summary.mean_cost_usd),
        throughput = summary.throughput,
        market_buckets = ?summary.market_histogram,
        forecast_buckets = ?summary.forecast_histogram,
        "Run summary"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forecast_eval=info"));

    if std::env::var("FORECAST_EVAL_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
