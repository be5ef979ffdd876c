//! Token and cost accounting.
//!
//! Costs are kept in integer nanodollars (1 USD = 1_000_000_000) so that
//! merging usage is exact: summing in any order yields identical totals.

use serde::{Deserialize, Serialize};

/// Token counters reported by the terminal `result` event of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Token/cost accounting, used both per request and as running totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_nanos: u64,
    pub requests: u64,
}

impl UsageMetrics {
    /// Usage for a single request priced against `model`.
    pub fn from_counts(counts: &TokenCounts, model: &str) -> Self {
        let price = price_for_model(model);
        Self {
            input_tokens: counts.input_tokens,
            output_tokens: counts.output_tokens,
            cache_read_tokens: counts.cache_read_input_tokens,
            cache_creation_tokens: counts.cache_creation_input_tokens,
            cost_nanos: price.cost_nanos(counts.input_tokens, counts.output_tokens),
            requests: 1,
        }
    }

    /// Fieldwise sum, saturating at `u64::MAX`.
    pub fn merge(&mut self, other: &UsageMetrics) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.cache_creation_tokens = self.cache_creation_tokens.saturating_add(other.cache_creation_tokens);
        self.cost_nanos = self.cost_nanos.saturating_add(other.cost_nanos);
        self.requests = self.requests.saturating_add(other.requests);
    }

    pub fn merged(mut self, other: &UsageMetrics) -> Self {
        self.merge(other);
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_nanos as f64 / 1_000_000_000.0
    }
}

/// Price of a model in nanodollars per token.
///
/// `$X per 1M tokens` is `X * 1000` nanodollars per token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelPrice {
    pub input_nano_per_token: u64,
    pub output_nano_per_token: u64,
}

impl ModelPrice {
    pub fn cost_nanos(&self, input_tokens: u64, output_tokens: u64) -> u64 {
        // Counters come straight from the subprocess and may be absurd.
        input_tokens
            .saturating_mul(self.input_nano_per_token)
            .saturating_add(output_tokens.saturating_mul(self.output_nano_per_token))
    }
}

/// Used for any model not matched by [`PRICE_TABLE`] ($3/1M in, $15/1M out).
pub const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input_nano_per_token: 3_000,
    output_nano_per_token: 15_000,
};

/// Model family fragments matched against the resolved model name, first hit wins.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    // Opus: $15/1M input, $75/1M output
    (
        "opus",
        ModelPrice {
            input_nano_per_token: 15_000,
            output_nano_per_token: 75_000,
        },
    ),
    // Sonnet: $3/1M input, $15/1M output
    (
        "sonnet",
        ModelPrice {
            input_nano_per_token: 3_000,
            output_nano_per_token: 15_000,
        },
    ),
    // Haiku: $0.80/1M input, $4/1M output
    (
        "haiku",
        ModelPrice {
            input_nano_per_token: 800,
            output_nano_per_token: 4_000,
        },
    ),
];

pub fn price_for_model(model: &str) -> ModelPrice {
    let model = model.trim().to_ascii_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(fragment, _)| model.contains(fragment))
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: u64) -> UsageMetrics {
        UsageMetrics {
            input_tokens: 100 * i,
            output_tokens: 7 * i + 3,
            cache_read_tokens: i * i,
            cache_creation_tokens: 11,
            cost_nanos: 123_456_789 * i + 1,
            requests: i,
        }
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let (a, b, c) = (sample(1), sample(2), sample(5));

        let abc = a.merged(&b).merged(&c);
        let a_bc = a.merged(&b.merged(&c));
        let cba = c.merged(&b).merged(&a);
        let bac = b.merged(&a).merged(&c);

        assert_eq!(abc, a_bc);
        assert_eq!(abc, cba);
        assert_eq!(abc, bac);
        assert_eq!(abc.requests, 8);
    }

    #[test]
    fn merge_with_default_is_identity() {
        let a = sample(3);
        assert_eq!(a.merged(&UsageMetrics::default()), a);
    }

    #[test]
    fn known_models_use_family_price() {
        assert_eq!(price_for_model("claude-opus-4-1-20250805").input_nano_per_token, 15_000);
        assert_eq!(price_for_model("claude-3-5-haiku-latest").output_nano_per_token, 4_000);
        assert_eq!(price_for_model("Claude-Sonnet-4"), DEFAULT_PRICE);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(price_for_model("some-local-model"), DEFAULT_PRICE);
        assert_eq!(price_for_model(""), DEFAULT_PRICE);
    }

    #[test]
    fn from_counts_prices_input_and_output_only() {
        let counts = TokenCounts {
            input_tokens: 1_000,
            output_tokens: 500,
            cache_read_input_tokens: 40_000,
            cache_creation_input_tokens: 2_000,
        };
        let usage = UsageMetrics::from_counts(&counts, "claude-sonnet-4-20250514");

        // 1000 * 3000 + 500 * 15000
        assert_eq!(usage.cost_nanos, 10_500_000);
        assert_eq!(usage.cache_read_tokens, 40_000);
        assert_eq!(usage.requests, 1);
        assert!((usage.cost_usd() - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn huge_counters_saturate_instead_of_overflowing() {
        let counts = TokenCounts {
            input_tokens: u64::MAX,
            output_tokens: 1,
            ..Default::default()
        };
        let usage = UsageMetrics::from_counts(&counts, "claude-opus-4");
        assert_eq!(usage.cost_nanos, u64::MAX);
        assert_eq!(usage.total_tokens(), u64::MAX);

        let total = usage.merged(&usage);
        assert_eq!(total.input_tokens, u64::MAX);
        assert_eq!(total.cost_nanos, u64::MAX);
        assert_eq!(total.requests, 2);
    }
}
