//! Accountant — forecaster cost pricing and run cost estimates.
//!
//! Prices token usage per model, estimates a run's cost before it starts,
//! and formats dollar amounts for logs.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::PricingConfig;

/// Decimal places kept on per-item costs.
pub const COST_DECIMALS: u32 = 6;

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// USD price per million tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl ModelPrice {
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> Decimal {
        let million = dec!(1_000_000);
        (Decimal::from(tokens_in) * self.input_per_million
            + Decimal::from(tokens_out) * self.output_per_million)
            / million
    }
}

/// Model → price table with a default for unknown identifiers.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPrice>,
    default_model: String,
}

impl PricingTable {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            models: config.models.clone(),
            default_model: config.default_model.clone(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Price for `model`, falling back to the default model.
    pub fn price(&self, model: &str) -> ModelPrice {
        self.models
            .get(model)
            .or_else(|| self.models.get(&self.default_model))
            .copied()
            .unwrap_or(ModelPrice {
                input_per_million: Decimal::ZERO,
                output_per_million: Decimal::ZERO,
            })
    }

    /// Cost in USD of one call, rounded to six decimal places.
    pub fn cost(&self, model: &str, tokens_in: u64, tokens_out: u64) -> Decimal {
        self.price(model)
            .cost(tokens_in, tokens_out)
            .round_dp(COST_DECIMALS)
    }

    /// Projected cost of a run before any call is made.
    pub fn estimate(&self, model: &str, profile: TokenProfile, items: usize, num_forecasts: u32) -> Decimal {
        let per_forecast = self.cost(model, profile.input_tokens(), profile.output_tokens);
        per_forecast * Decimal::from(num_forecasts) * Decimal::from(items as u64)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Token profile
// ---------------------------------------------------------------------------

/// Assumed token usage of a single forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenProfile {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Extra input when the forecaster pulls web context.
    pub extra_context_tokens: u64,
    pub uses_extra_context: bool,
}

impl Default for TokenProfile {
    fn default() -> Self {
        Self {
            input_tokens: 2000,
            output_tokens: 500,
            extra_context_tokens: 1000,
            uses_extra_context: false,
        }
    }
}

impl TokenProfile {
    /// Profile derived from forecaster parameters (`usePerplexity`).
    pub fn from_parameters(parameters: &serde_json::Map<String, serde_json::Value>) -> Self {
        let uses_extra_context = parameters
            .get("usePerplexity")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Self { uses_extra_context, ..Self::default() }
    }

    pub fn input_tokens(&self) -> u64 {
        if self.uses_extra_context {
            self.input_tokens + self.extra_context_tokens
        } else {
            self.input_tokens
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Dollar formatting with precision scaled to magnitude.
pub fn format_cost(cost: Decimal) -> String {
    let places: u32 = if cost < dec!(0.01) {
        4
    } else if cost < dec!(1) {
        3
    } else {
        2
    };
    let rounded = cost.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
    format!("${:.*}", places as usize, rounded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_known_model() {
        let table = PricingTable::default();
        // 2000 * 3 / 1M + 500 * 15 / 1M = 0.006 + 0.0075
        assert_eq!(table.cost("claude-3-5-sonnet-20241022", 2000, 500), dec!(0.0135));
    }

    #[test]
    fn test_cost_unknown_model_uses_default() {
        let table = PricingTable::default();
        // Opus: 2000 * 15 / 1M + 500 * 75 / 1M = 0.03 + 0.0375
        assert_eq!(table.cost("mystery-model", 2000, 500), dec!(0.0675));
    }

    #[test]
    fn test_cost_rounded_to_six_places() {
        let table = PricingTable::default();
        // Haiku: 1 * 0.25 / 1M = 0.00000025 → 0.000000
        assert_eq!(table.cost("claude-3-haiku-20240307", 1, 0), dec!(0));
        assert_eq!(table.cost("claude-3-haiku-20240307", 7, 3), dec!(0.000006));
    }

    #[test]
    fn test_zero_tokens_zero_cost() {
        let table = PricingTable::default();
        assert_eq!(table.cost("claude-opus-4-20250514", 0, 0), Decimal::ZERO);
    }

    #[test]
    fn test_token_profile_extra_context() {
        let mut params = serde_json::Map::new();
        assert_eq!(TokenProfile::from_parameters(&params).input_tokens(), 2000);
        params.insert("usePerplexity".into(), serde_json::json!(true));
        assert_eq!(TokenProfile::from_parameters(&params).input_tokens(), 3000);
    }

    #[test]
    fn test_estimate_scales_with_items_and_forecasts() {
        let table = PricingTable::default();
        let profile = TokenProfile::default();
        let one = table.estimate("claude-3-5-sonnet-20241022", profile, 1, 1);
        assert_eq!(one, dec!(0.0135));
        let many = table.estimate("claude-3-5-sonnet-20241022", profile, 10, 3);
        assert_eq!(many, dec!(0.405));
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(dec!(0.0042)), "$0.0042");
        assert_eq!(format_cost(dec!(0.0675)), "$0.068");
        assert_eq!(format_cost(dec!(0.25)), "$0.250");
        assert_eq!(format_cost(dec!(12.5)), "$12.50");
    }
}
