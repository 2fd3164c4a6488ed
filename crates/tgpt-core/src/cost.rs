//! Token pricing

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::llm::Usage;
use crate::session::Cost;
use crate::{Error, Result};

/// Price of a model per 1,000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub input_per_1k: Cost,
    pub output_per_1k: Cost,
}

impl Price {
    pub const fn new(input_per_1k: Cost, output_per_1k: Cost) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Cost of the tokens in `usage` at `price`
pub fn calculate_cost(usage: &Usage, price: &Price) -> Cost {
    let input = usage.input_tokens as f64 / 1000.0 * price.input_per_1k;
    let output = usage.output_tokens as f64 / 1000.0 * price.output_per_1k;
    input + output
}

/// Model name to price mapping
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: HashMap<String, Price>,
}

impl PriceTable {
    /// Table with no entries
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or replace a model's price
    pub fn insert(&mut self, model: impl Into<String>, price: Price) {
        self.prices.insert(model.into(), price);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, model: impl Into<String>, price: Price) -> Self {
        self.insert(model, price);
        self
    }

    pub fn get(&self, model: &str) -> Option<&Price> {
        self.prices.get(model)
    }

    /// Cost of `usage` on `model`, failing when the model has no price
    pub fn calculate_cost_by_model(&self, usage: &Usage, model: &str) -> Result<Cost> {
        let price = self.get(model).ok_or_else(|| Error::PriceNotFound {
            model: model.to_string(),
        })?;
        Ok(calculate_cost(usage, price))
    }
}

impl Default for PriceTable {
    /// OpenAI list prices for the chat models the bot has been run against
    fn default() -> Self {
        Self::empty()
            .with("gpt-3.5-turbo", Price::new(0.0015, 0.002))
            .with("gpt-3.5-turbo-16k", Price::new(0.003, 0.004))
            .with("gpt-3.5-turbo-1106", Price::new(0.001, 0.002))
            .with("gpt-4", Price::new(0.03, 0.06))
            .with("gpt-4-32k", Price::new(0.06, 0.12))
            .with("gpt-4-1106-preview", Price::new(0.01, 0.03))
    }
}
