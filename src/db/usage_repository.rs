use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::usage::{ModelUsageSummary, StoredUsageRow};

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Inserts or overwrites rows keyed on `request_id`. Returns the number
    /// of rows written.
    async fn upsert_usage_batch(&self, rows: &[StoredUsageRow]) -> Result<u64, sqlx::Error>;

    /// `update_openai_daily_summary()` on the store.
    async fn refresh_daily_summary(&self) -> Result<(), sqlx::Error>;

    /// `update_recent_agent_executions()` on the store.
    async fn refresh_recent_executions(&self) -> Result<(), sqlx::Error>;

    async fn usage_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ModelUsageSummary>, sqlx::Error>;
}
