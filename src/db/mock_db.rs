use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::lead_metrics_repository::LeadMetricsRepository;
use crate::db::usage_repository::UsageRepository;
use crate::engine::lead_metrics::merge_lead_metric;
use crate::models::lead::LeadMetric;
use crate::models::usage::{ModelUsageSummary, StoredUsageRow};

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

#[derive(Default)]
pub struct MockUsageRepository {
    pub rows: Mutex<HashMap<String, StoredUsageRow>>,
    /// Size of every upsert call, failed ones included.
    pub batch_sizes: Mutex<Vec<usize>>,
    /// 1-based upsert calls that fail.
    pub fail_batches: Vec<usize>,
    pub fail_rpc: bool,
    pub should_fail: bool,
    pub rpc_calls: Mutex<Vec<&'static str>>,
    pub summary: Vec<ModelUsageSummary>,
    pub summary_calls: Mutex<usize>,
}

impl MockUsageRepository {
    pub fn stored_count(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or_default()
    }

    fn record_rpc(&self, name: &'static str) -> Result<(), sqlx::Error> {
        if let Ok(mut calls) = self.rpc_calls.lock() {
            calls.push(name);
        }
        if self.fail_rpc {
            return Err(mock_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl UsageRepository for MockUsageRepository {
    async fn upsert_usage_batch(&self, rows: &[StoredUsageRow]) -> Result<u64, sqlx::Error> {
        let call = {
            let mut sizes = self.batch_sizes.lock().map_err(|_| mock_failure())?;
            sizes.push(rows.len());
            sizes.len()
        };
        if self.should_fail || self.fail_batches.contains(&call) {
            return Err(mock_failure());
        }

        let mut stored = self.rows.lock().map_err(|_| mock_failure())?;
        for row in rows {
            stored.insert(row.request_id.clone(), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn refresh_daily_summary(&self) -> Result<(), sqlx::Error> {
        self.record_rpc("update_openai_daily_summary")
    }

    async fn refresh_recent_executions(&self) -> Result<(), sqlx::Error> {
        self.record_rpc("update_recent_agent_executions")
    }

    async fn usage_summary(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ModelUsageSummary>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        if let Ok(mut calls) = self.summary_calls.lock() {
            *calls += 1;
        }
        Ok(self.summary.clone())
    }
}

#[derive(Default)]
pub struct MockLeadMetricsRepository {
    pub metrics: Mutex<HashMap<(NaiveDate, String), LeadMetric>>,
    pub should_fail: bool,
    pub accumulate_calls: Mutex<usize>,
    pub replace_calls: Mutex<usize>,
}

impl MockLeadMetricsRepository {
    pub fn get(&self, date: NaiveDate, workflow_id: &str) -> Option<LeadMetric> {
        self.metrics
            .lock()
            .ok()?
            .get(&(date, workflow_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl LeadMetricsRepository for MockLeadMetricsRepository {
    async fn accumulate_lead_metric(&self, metric: &LeadMetric) -> Result<LeadMetric, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        if let Ok(mut calls) = self.accumulate_calls.lock() {
            *calls += 1;
        }
        let mut metrics = self.metrics.lock().map_err(|_| mock_failure())?;
        let key = (metric.date, metric.workflow_id.clone());
        let stored = match metrics.get(&key) {
            Some(existing) => merge_lead_metric(existing, metric),
            None => metric.clone(),
        };
        metrics.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace_lead_metric(&self, metric: &LeadMetric) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        if let Ok(mut calls) = self.replace_calls.lock() {
            *calls += 1;
        }
        let mut metrics = self.metrics.lock().map_err(|_| mock_failure())?;
        metrics.insert((metric.date, metric.workflow_id.clone()), metric.clone());
        Ok(())
    }

    async fn list_lead_metrics(&self, since: NaiveDate) -> Result<Vec<LeadMetric>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        let metrics = self.metrics.lock().map_err(|_| mock_failure())?;
        let mut listed: Vec<LeadMetric> = metrics
            .values()
            .filter(|m| m.date >= since)
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.workflow_id.cmp(&b.workflow_id)));
        Ok(listed)
    }
}
