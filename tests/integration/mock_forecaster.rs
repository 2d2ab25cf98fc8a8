//! Mock forecaster for integration testing.
//!
//! Deterministic `Forecaster` that answers from a question → probability
//! table, fails on demand and records every request it receives.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use forecast_eval::forecaster::{CostPayload, ForecastEnvelope, ForecastPayload, ForecastRequest, Forecaster};
use forecast_eval::types::EvalError;

pub struct MockForecaster {
    answers: HashMap<String, f64>,
    default_probability: f64,
    /// Questions that get a `{success: false}` reply.
    rejected: HashSet<String>,
    /// If set, every call fails at the transport level with this message.
    force_error: Arc<Mutex<Option<String>>>,
    requests: Arc<Mutex<Vec<ForecastRequest>>>,
}

impl MockForecaster {
    pub fn new(default_probability: f64) -> Self {
        Self {
            answers: HashMap::new(),
            default_probability,
            rejected: HashSet::new(),
            force_error: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn answer(mut self, question: &str, probability: f64) -> Self {
        self.answers.insert(question.to_string(), probability);
        self
    }

    pub fn reject(mut self, question: &str) -> Self {
        self.rejected.insert(question.to_string());
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn requests(&self) -> Vec<ForecastRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forecaster for MockForecaster {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastEnvelope, EvalError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(EvalError::Forecast {
                model: request.model.clone().unwrap_or_default(),
                message: msg,
            });
        }
        if self.rejected.contains(&request.question) {
            return Ok(ForecastEnvelope::err("forecaster declined"));
        }

        let probability = self
            .answers
            .get(&request.question)
            .copied()
            .unwrap_or(self.default_probability);
        Ok(ForecastEnvelope {
            success: true,
            result: Some(ForecastPayload {
                probability: Some(probability),
                cost: Some(CostPayload {
                    total_usd: None,
                    total_input_tokens: 2000 * u64::from(request.num_forecasts),
                    total_output_tokens: 500 * u64::from(request.num_forecasts),
                }),
                llm_interactions: Vec::new(),
            }),
            error: None,
        })
    }
}
