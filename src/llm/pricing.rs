//! Per-model token prices, USD per one million tokens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPrice {
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    pub fn cost_usd(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_m
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_m
    }
}

pub const DEFAULT_MODEL: &str = "gpt-5.2";

const BUILTIN: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", ModelPrice::new(0.15, 0.60)),
    ("gpt-4o", ModelPrice::new(2.50, 10.00)),
    ("gpt-4.1-mini", ModelPrice::new(0.40, 1.60)),
    ("gpt-4.1-nano", ModelPrice::new(0.10, 0.40)),
    ("gpt-5.2", ModelPrice::new(1.75, 14.00)),
    ("grok-3-mini-fast", ModelPrice::new(0.30, 0.50)),
    ("grok-3-mini", ModelPrice::new(0.30, 0.50)),
    ("grok-3", ModelPrice::new(3.00, 15.00)),
    ("grok-3-fast", ModelPrice::new(5.00, 25.00)),
];

/// Unknown models are priced like the fallback model, so spend is never
/// under-counted as zero.
#[derive(Debug, Clone)]
pub struct Pricing {
    table: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
}

impl Default for Pricing {
    fn default() -> Self {
        let table: HashMap<String, ModelPrice> = BUILTIN.iter().map(|(m, p)| (m.to_string(), *p)).collect();
        let fallback = table
            .get(DEFAULT_MODEL)
            .copied()
            .unwrap_or(ModelPrice::new(2.0, 10.0));
        Self { table, fallback }
    }
}

impl Pricing {
    /// Built-in table with extra or overriding entries.
    pub fn with_overrides(overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut p = Self::default();
        for (model, price) in overrides {
            if price.input_per_m.is_finite()
                && price.output_per_m.is_finite()
                && price.input_per_m >= 0.0
                && price.output_per_m >= 0.0
            {
                p.table.insert(model.clone(), *price);
            }
        }
        p
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.table.get(model).copied().unwrap_or(self.fallback)
    }

    pub fn cost_usd(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.price_for(model).cost_usd(prompt_tokens, completion_tokens)
    }
}
