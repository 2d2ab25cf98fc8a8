//! Forecaster boundary: request/response wire types and outcome normalization.
//!
//! Defines the `Forecaster` trait the orchestrator dispatches through and
//! folds both response shapes (and transport failures) into a single
//! `ForecastOutcome`.

pub mod http;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{EvalError, ForecastOutcome};

/// Abstraction over the external forecasting service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Submit one question. Transport and protocol failures are errors;
    /// a well-formed `{success: false}` reply is returned as-is.
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastEnvelope, EvalError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRequest {
    pub question: String,
    #[serde(rename = "numForecasts")]
    pub num_forecasts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extra fields merged into the top-level body.
    #[serde(flatten)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ForecastRequest {
    pub fn new(question: impl Into<String>, num_forecasts: u32) -> Self {
        Self {
            question: question.into(),
            num_forecasts,
            model: None,
            parameters: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ForecastPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForecastEnvelope {
    pub fn ok(probability: f64) -> Self {
        Self {
            success: true,
            result: Some(ForecastPayload {
                probability: Some(probability),
                cost: None,
                llm_interactions: Vec::new(),
            }),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, result: None, error: Some(message.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPayload {
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostPayload>,
    #[serde(default, rename = "llmInteractions")]
    pub llm_interactions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPayload {
    #[serde(default, rename = "totalUSD")]
    pub total_usd: Option<f64>,
    #[serde(default, rename = "totalInputTokens")]
    pub total_input_tokens: u64,
    #[serde(default, rename = "totalOutputTokens")]
    pub total_output_tokens: u64,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Fold a forecaster reply (or the error that replaced it) into an outcome.
pub fn normalize(reply: Result<ForecastEnvelope, EvalError>, model: &str) -> ForecastOutcome {
    let envelope = match reply {
        Ok(e) => e,
        Err(EvalError::Forecast { message, .. }) => return ForecastOutcome::failed(model, message),
        Err(e) => return ForecastOutcome::failed(model, e.to_string()),
    };

    if !envelope.success {
        let message = envelope.error.unwrap_or_else(|| "Unknown error".to_string());
        return ForecastOutcome::failed(model, message);
    }
    let Some(result) = envelope.result else {
        return ForecastOutcome::failed(model, "Response missing result");
    };

    let probability = match result.probability {
        Some(p) if p.is_finite() => p.clamp(0.0, 100.0),
        Some(p) => return ForecastOutcome::failed(model, format!("Invalid probability: {p}")),
        None => {
            warn!(model, "Forecast result without probability, defaulting to 50");
            50.0
        }
    };

    let mut outcome = ForecastOutcome::succeeded(model, probability);
    if let Some(cost) = result.cost {
        outcome.tokens_in = cost.total_input_tokens;
        outcome.tokens_out = cost.total_output_tokens;
        outcome.reported_cost_usd = cost.total_usd.and_then(Decimal::from_f64);
    }
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
