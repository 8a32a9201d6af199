use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::lead::LeadMetric;

#[async_trait]
pub trait LeadMetricsRepository: Send + Sync {
    /// Adds `metric` onto the stored row for its `(date, workflow_id)`,
    /// inserting it when absent. Returns the row as stored.
    async fn accumulate_lead_metric(&self, metric: &LeadMetric) -> Result<LeadMetric, sqlx::Error>;

    /// Overwrites the row for `(date, workflow_id)` with `metric`.
    async fn replace_lead_metric(&self, metric: &LeadMetric) -> Result<(), sqlx::Error>;

    async fn list_lead_metrics(&self, since: NaiveDate) -> Result<Vec<LeadMetric>, sqlx::Error>;
}
