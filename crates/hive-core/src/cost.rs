use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::write_json_atomic;

pub const DEFAULT_INPUT_PRICE: f64 = 3.0;
pub const DEFAULT_OUTPUT_PRICE: f64 = 15.0;
const DOWNGRADE_SPEND_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub calls: u32,
}

/// Per-run token and dollar accounting with a budget gate and a
/// cost-aware model downgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTracker {
    pub per_agent: BTreeMap<String, AgentCost>,
    pub total_cost_usd: f64,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
}

impl CostTracker {
    pub fn new(input_price: f64, output_price: f64, budget: Option<f64>) -> Self {
        Self {
            per_agent: BTreeMap::new(),
            total_cost_usd: 0.0,
            input_price_per_million: input_price,
            output_price_per_million: output_price,
            budget_usd: budget,
        }
    }

    pub fn record(&mut self, agent: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = input_tokens as f64 * self.input_price_per_million / 1e6
            + output_tokens as f64 * self.output_price_per_million / 1e6;
        let entry = self.per_agent.entry(agent.to_string()).or_default();
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost_usd += cost;
        entry.calls += 1;
        self.total_cost_usd += cost;
        cost
    }

    pub fn spent(&self) -> f64 {
        self.total_cost_usd
    }

    /// Whether an estimated next call fits the remaining budget. With no
    /// budget configured everything fits.
    pub fn fits_budget(&self, estimated_cost: f64) -> bool {
        match self.budget_usd {
            Some(budget) => estimated_cost <= budget - self.total_cost_usd,
            None => true,
        }
    }

    pub fn over_budget(&self) -> bool {
        self.budget_usd
            .map(|budget| self.total_cost_usd >= budget)
            .unwrap_or(false)
    }

    /// Map the selected model down one tier once spend crosses 60% of the
    /// budget: opus → sonnet → haiku.
    pub fn model_for(&self, selected: &str) -> String {
        let Some(budget) = self.budget_usd else {
            return selected.to_string();
        };
        if budget <= 0.0 || self.total_cost_usd < budget * DOWNGRADE_SPEND_RATIO {
            return selected.to_string();
        }
        downgrade_model(selected)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json_atomic(path, self)
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_PRICE, DEFAULT_OUTPUT_PRICE, None)
    }
}

/// `ceil(chars / 4)` token estimate used for subprocess output.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 + 3) / 4
}

fn downgrade_model(selected: &str) -> String {
    if selected.contains("opus") {
        selected.replace("opus", "sonnet")
    } else if selected.contains("sonnet") {
        selected.replace("sonnet", "haiku")
    } else {
        selected.to_string()
    }
}
