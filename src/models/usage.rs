use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Token usage recovered from one OpenAI-shaped object inside a node run.
/// Never stored as is; see `engine::formatter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub model: String,
    pub raw_model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    pub execution_id: Option<String>,
    pub node_id: String,
    pub node_name: String,
    /// Position of this record among all records extracted from the same
    /// execution.
    pub extraction_index: usize,
}

/// Row of the `openai_usage` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUsageRow {
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub workflow_name: String,
    pub node_id: String,
    pub node_name: String,
    pub execution_id: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
    pub user_id: Option<String>,
    pub request_id: String,
    pub tags: Vec<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ModelUsageSummary {
    pub model: String,
    pub requests: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
}
