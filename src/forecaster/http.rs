//! HTTP client for the forecaster tool endpoint.
//!
//! POSTs a `ForecastRequest` as JSON with optional bearer auth and returns
//! the decoded envelope. Non-2xx replies that still carry a
//! `{success: false, error}` body are passed through so the caller sees
//! the service's own message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

use super::{ForecastEnvelope, ForecastRequest, Forecaster};
use crate::types::EvalError;

/// Body excerpt length kept in error messages.
const ERROR_SNIPPET_LEN: usize = 200;

pub struct HttpForecaster {
    http: Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpForecaster {
    pub fn new(url: impl Into<String>, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build forecaster HTTP client")?;
        Ok(Self { http, url: url.into(), api_key })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn error(request: &ForecastRequest, message: String) -> EvalError {
        EvalError::Forecast {
            model: request.model.clone().unwrap_or_else(|| "default".to_string()),
            message,
        }
    }
}

#[async_trait]
impl Forecaster for HttpForecaster {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastEnvelope, EvalError> {
        let mut builder = self.http.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let resp = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "Request timed out".to_string()
            } else {
                format!("Request failed: {e}")
            };
            Self::error(request, message)
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Self::error(request, format!("Failed to read response body: {e}")))?;
        debug!(status = %status, bytes = body.len(), "Forecaster responded");

        let parsed = serde_json::from_str::<ForecastEnvelope>(&body);
        if status.is_success() {
            return parsed.map_err(|e| Self::error(request, format!("Invalid response body: {e}")));
        }
        match parsed {
            Ok(envelope) if !envelope.success => Ok(envelope),
            _ => {
                let snippet: String = body.chars().take(ERROR_SNIPPET_LEN).collect();
                Err(Self::error(request, format!("HTTP {status}: {snippet}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
