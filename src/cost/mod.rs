//! Cost tracker: per-call token/USD accounting into `cost_records`, plus a
//! model-pricing table. The original source left cost calculation as a
//! placeholder `0.0`; SPEC_FULL.md §11 supplements it with a real per-model
//! pricing table and a `breakdown` aggregation, since an append-only ledger
//! with no way to price a call is not a useful cost tracker.

use uuid::Uuid;

use chrono::Utc;

use crate::models::CostRecord;
use crate::storage::{Storage, StorageResult};

/// USD-per-1000-tokens rate for a single model, input and output priced
/// separately (output is consistently pricier across every provider's public
/// price sheet).
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Keyed lookup from model name to its rate, with a conservative default
/// fallback for unlisted models. Rates are illustrative placeholders, not a
/// live price feed — operators are expected to override this table as
/// provider pricing changes.
pub struct PricingTable {
    rates: Vec<(&'static str, ModelRate)>,
    default_rate: ModelRate,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            rates: vec![
                ("gpt-4o", ModelRate { input_per_1k: 0.0025, output_per_1k: 0.010 }),
                ("gpt-4o-mini", ModelRate { input_per_1k: 0.00015, output_per_1k: 0.0006 }),
                ("gpt-4-turbo", ModelRate { input_per_1k: 0.010, output_per_1k: 0.030 }),
                ("claude-3-opus", ModelRate { input_per_1k: 0.015, output_per_1k: 0.075 }),
                ("claude-3-5-sonnet", ModelRate { input_per_1k: 0.003, output_per_1k: 0.015 }),
                ("claude-3-haiku", ModelRate { input_per_1k: 0.00025, output_per_1k: 0.00125 }),
                ("gemini-1.5-pro", ModelRate { input_per_1k: 0.00125, output_per_1k: 0.005 }),
                ("gemini-1.5-flash", ModelRate { input_per_1k: 0.000075, output_per_1k: 0.0003 }),
            ],
            default_rate: ModelRate { input_per_1k: 0.001, output_per_1k: 0.002 },
        }
    }
}

impl PricingTable {
    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.rates.iter().find(|(name, _)| *name == model).map(|(_, rate)| *rate).unwrap_or(self.default_rate)
    }

    /// Cost in fixed-point micro-dollars (1e-6 USD), matching `CostRecord::cost_micros`.
    pub fn cost_micros(&self, model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
        let rate = self.rate_for(model);
        let usd = (input_tokens as f64 / 1000.0) * rate.input_per_1k + (output_tokens as f64 / 1000.0) * rate.output_per_1k;
        (usd * 1_000_000.0).round() as i64
    }
}

/// Per-tool / per-project aggregate over a set of cost records.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CostBreakdown {
    pub total_micros: i64,
    pub by_tool: std::collections::HashMap<String, i64>,
    pub by_project: std::collections::HashMap<String, i64>,
}

impl CostBreakdown {
    pub fn total_usd(&self) -> f64 {
        self.total_micros as f64 / 1_000_000.0
    }
}

/// Appends cost records and answers aggregate queries against them. Pricing
/// is computed externally via `PricingTable` and passed in as already-priced
/// micros, per the storage backend's append-only `cost_records` contract.
#[derive(Clone)]
pub struct CostTracker {
    storage: Storage,
}

impl CostTracker {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        tool: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost_micros: i64,
        conversation_id: Option<&str>,
        project_id: Option<&str>,
    ) -> StorageResult<()> {
        let record = CostRecord {
            id: Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            model: model.to_string(),
            input_tokens: input_tokens as i64,
            output_tokens: output_tokens as i64,
            cost_micros,
            conversation_id: conversation_id.map(String::from),
            project_id: project_id.map(String::from),
            created_at: Utc::now().timestamp(),
        };
        self.storage.record_cost(&record).await
    }

    /// Sum of `cost_micros` across every record matching the filter.
    pub async fn total(&self, start: Option<i64>, end: Option<i64>, project_id: Option<&str>) -> StorageResult<i64> {
        let records = self.storage.get_costs(start, end, None, project_id).await?;
        Ok(records.iter().map(|r| r.cost_micros).sum())
    }

    /// Aggregate by tool and by project over the matching record set.
    pub async fn breakdown(&self, start: Option<i64>, end: Option<i64>, tool: Option<&str>, project_id: Option<&str>) -> StorageResult<CostBreakdown> {
        let records = self.storage.get_costs(start, end, tool, project_id).await?;
        let mut breakdown = CostBreakdown::default();
        for record in &records {
            breakdown.total_micros += record.cost_micros;
            *breakdown.by_tool.entry(record.tool.clone()).or_insert(0) += record.cost_micros;
            if let Some(project) = &record.project_id {
                *breakdown.by_project.entry(project.clone()).or_insert(0) += record.cost_micros;
            }
        }
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_storage;

    #[test]
    fn known_model_uses_its_own_rate() {
        let table = PricingTable::default();
        let cost = table.cost_micros("gpt-4o", 1000, 1000);
        assert_eq!(cost, 2500 + 10000);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let table = PricingTable::default();
        let cost = table.cost_micros("some-future-model", 1000, 0);
        assert_eq!(cost, 1000);
    }

    #[tokio::test]
    async fn record_then_total_sums_matching_rows() {
        let tracker = CostTracker::new(test_storage().await);
        tracker.record("gpt", "gpt-4o", 100, 50, 1000, Some("c1"), Some("proj-a")).await.unwrap();
        tracker.record("gpt", "gpt-4o", 100, 50, 2000, Some("c2"), Some("proj-a")).await.unwrap();
        tracker.record("claude", "claude-3-opus", 10, 10, 500, None, Some("proj-b")).await.unwrap();

        assert_eq!(tracker.total(None, None, Some("proj-a")).await.unwrap(), 3000);
    }

    #[tokio::test]
    async fn breakdown_groups_by_tool_and_project() {
        let tracker = CostTracker::new(test_storage().await);
        tracker.record("gpt", "gpt-4o", 100, 50, 1000, Some("c1"), Some("proj-a")).await.unwrap();
        tracker.record("claude", "claude-3-opus", 10, 10, 500, Some("c2"), Some("proj-b")).await.unwrap();

        let breakdown = tracker.breakdown(None, None, None, None).await.unwrap();
        assert_eq!(breakdown.total_micros, 1500);
        assert_eq!(breakdown.by_tool.get("gpt"), Some(&1000));
        assert_eq!(breakdown.by_tool.get("claude"), Some(&500));
        assert_eq!(breakdown.by_project.get("proj-a"), Some(&1000));
    }
}
