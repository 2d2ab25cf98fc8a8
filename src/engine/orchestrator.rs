//! Orchestrator — dispatches one forecast per item through a bounded pool.
//!
//! A run moves Pending → Dispatching → Collecting → Finalized, or to Aborted
//! when the pool cannot be established. Each item is a spawned task: call the
//! forecaster under a timeout, normalize the reply, score it, price it.
//! Failures stay local to their item, panics included. Results are published
//! in input order regardless of completion order.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::engine::accountant::{format_cost, PricingTable};
use crate::forecaster::{normalize, ForecastRequest, Forecaster};
use crate::scoring::{ScoreBoard, Scorer};
use crate::tracking::{DatasetHandle, ExperimentHandle, Tracker};
use crate::types::{
    EvalError, EvalItem, ExperimentConfig, ExperimentSummary, ForecastOutcome, ItemResult,
    ProbabilityBucket, RunState,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Per-run dispatch settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Worker pool width.
    pub concurrency: usize,
    /// Per-call forecaster timeout.
    pub timeout: Duration,
    pub num_forecasts: u32,
    pub model: Option<String>,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 16,
            timeout: Duration::from_secs(30),
            num_forecasts: 1,
            model: None,
            parameters: serde_json::Map::new(),
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.evaluation.concurrency,
            timeout: Duration::from_secs(config.evaluation.timeout_secs),
            num_forecasts: config.forecaster.num_forecasts,
            model: config.forecaster.model.clone(),
            parameters: config.forecaster.parameters.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    shared: Arc<Shared>,
}

/// Everything a spawned item task needs.
struct Shared {
    forecaster: Arc<dyn Forecaster>,
    scorer: Scorer,
    pricing: PricingTable,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        forecaster: Arc<dyn Forecaster>,
        scorer: Scorer,
        pricing: PricingTable,
        settings: RunSettings,
    ) -> Self {
        Self { shared: Arc::new(Shared { forecaster, scorer, pricing, settings }) }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.shared.settings
    }

    /// Model label recorded on outcomes and used for pricing.
    pub fn model(&self) -> &str {
        self.shared.model()
    }

    /// Evaluate every item and build the run summary.
    ///
    /// Each item runs in its own spawned task, at most `concurrency` at a
    /// time. A task that panics is recorded as a failed item; its siblings
    /// keep running.
    pub async fn run(
        &self,
        experiment: &str,
        config: ExperimentConfig,
        items: &[EvalItem],
    ) -> Result<ExperimentSummary, EvalError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let width = self.shared.settings.concurrency;

        let state = self.transition(&run_id, RunState::Pending, RunState::Dispatching)?;
        if width == 0 {
            self.transition(&run_id, state, RunState::Aborted)?;
            warn!(run_id = %run_id, experiment, "Run aborted before dispatch");
            return Err(EvalError::Config("Worker pool width must be at least 1".into()));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            run_id = %run_id,
            experiment,
            items = items.len(),
            concurrency = width,
            model = self.model(),
            "Dispatching forecasts"
        );

        let permits = Arc::new(Semaphore::new(width));
        let tasks: Vec<JoinHandle<ItemResult>> = items
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, item)| {
                let shared = Arc::clone(&self.shared);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    shared.evaluate(index, &item).await
                })
            })
            .collect();

        let state = self.transition(&run_id, state, RunState::Collecting)?;
        // One slot per input index: awaiting in order keeps the published order.
        let mut results = Vec::with_capacity(items.len());
        for (index, (item, task)) in items.iter().zip(tasks).enumerate() {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    let message = task_failure(e);
                    warn!(index, id = item.id(), error = %message, "Forecast task failed");
                    let outcome = ForecastOutcome::failed(self.model(), message);
                    self.shared.record(index, item, outcome, 0)
                }
            };
            results.push(result);
        }

        let state = self.transition(&run_id, state, RunState::Finalized)?;
        let finished_at = Utc::now();
        let duration_secs = clock.elapsed().as_secs_f64();

        let summary = summarize(
            run_id,
            experiment.to_string(),
            config,
            state,
            results,
            started_at,
            finished_at,
            duration_secs,
        );
        info!(
            experiment = %summary.experiment,
            succeeded = summary.succeeded,
            failed = summary.failed,
            total_cost = %format_cost(summary.total_cost_usd),
            duration_secs = summary.duration_secs,
            "Run finalized"
        );
        Ok(summary)
    }

    /// Record `items` in the tracked dataset, evaluate exactly those items
    /// and log the experiment against the dataset.
    pub async fn run_tracked(
        &self,
        tracker: &dyn Tracker,
        dataset: &DatasetHandle,
        experiment: &str,
        config: ExperimentConfig,
        items: &[EvalItem],
    ) -> Result<(ExperimentSummary, ExperimentHandle), EvalError> {
        tracker.insert(dataset, items)?;
        let summary = self.run(experiment, config, items).await?;
        let handle = tracker.log_experiment(dataset, &summary)?;
        Ok((summary, handle))
    }

    fn transition(&self, run_id: &str, from: RunState, to: RunState) -> Result<RunState, EvalError> {
        let next = from.advance(to)?;
        debug!(run_id, from = %from, to = %next, "Run state");
        Ok(next)
    }
}

impl Shared {
    fn model(&self) -> &str {
        self.settings.model.as_deref().unwrap_or(self.pricing.default_model())
    }

    /// One item's task. Never fails: errors become a failed outcome.
    async fn evaluate(&self, index: usize, item: &EvalItem) -> ItemResult {
        let model = self.model().to_string();
        let request = ForecastRequest {
            question: item.question.question.clone(),
            num_forecasts: self.settings.num_forecasts,
            model: self.settings.model.clone(),
            parameters: self.settings.parameters.clone(),
        };

        let started = Instant::now();
        let reply = match tokio::time::timeout(self.settings.timeout, self.forecaster.forecast(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(EvalError::Forecast {
                model: model.clone(),
                message: format!("Timed out after {}s", self.settings.timeout.as_secs_f64()),
            }),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = normalize(reply, &model);
        match &outcome.error {
            Some(err) => warn!(index, id = item.id(), error = %err, "Forecast failed"),
            None => debug!(
                index,
                id = item.id(),
                market = item.question.market_probability,
                forecast = outcome.probability,
                latency_ms,
                "Forecast complete"
            ),
        }
        self.record(index, item, outcome, latency_ms)
    }

    /// Score and price an outcome into the item's result record.
    fn record(&self, index: usize, item: &EvalItem, outcome: ForecastOutcome, latency_ms: u64) -> ItemResult {
        let market = item.question.market_probability;
        let scores = self.scorer.score_all(&outcome, market);
        let cost_usd = self.pricing.cost(&outcome.model, outcome.tokens_in, outcome.tokens_out);
        ItemResult {
            index,
            question_id: item.id().to_string(),
            question: item.question.question.clone(),
            market_probability: market,
            metadata: item.metadata,
            outcome,
            scores,
            cost_usd,
            latency_ms,
        }
    }
}

/// Readable message for a task that panicked or was cancelled.
fn task_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("Forecast task cancelled: {err}");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Forecast task panicked: {detail}")
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn summarize(
    run_id: String,
    experiment: String,
    config: ExperimentConfig,
    state: RunState,
    items: Vec<ItemResult>,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
    duration_secs: f64,
) -> ExperimentSummary {
    let mut market_histogram = BTreeMap::new();
    let mut forecast_histogram = BTreeMap::new();
    for item in &items {
        let bucket = item
            .metadata
            .map(|m| m.probability_bucket)
            .unwrap_or_else(|| ProbabilityBucket::from_probability(item.market_probability));
        *market_histogram.entry(bucket.to_string()).or_insert(0) += 1;
        if item.outcome.is_success() {
            let bucket = ProbabilityBucket::from_probability(item.outcome.probability);
            *forecast_histogram.entry(bucket.to_string()).or_insert(0) += 1;
        }
    }

    let succeeded = items.iter().filter(|i| i.outcome.is_success()).count();
    let failed = items.len() - succeeded;
    let total_cost_usd: Decimal = items.iter().map(|i| i.cost_usd).sum();
    let mean_cost_usd = if items.is_empty() {
        Decimal::ZERO
    } else {
        total_cost_usd / Decimal::from(items.len() as u64)
    };
    let board = ScoreBoard::from_results(&items);
    let throughput = if duration_secs > 0.0 { items.len() as f64 / duration_secs } else { 0.0 };

    ExperimentSummary {
        run_id,
        experiment,
        config,
        state,
        items,
        market_histogram,
        forecast_histogram,
        succeeded,
        failed,
        total_cost_usd,
        mean_cost_usd,
        mean_scores: board.means,
        topic_scores: board.by_topic,
        started_at,
        finished_at,
        duration_secs,
        throughput,
    }
}

/// Successful outcomes only, for quick assertions and logs.
pub fn successful_outcomes(summary: &ExperimentSummary) -> impl Iterator<Item = &ForecastOutcome> {
    summary.items.iter().map(|i| &i.outcome).filter(|o| o.is_success())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
