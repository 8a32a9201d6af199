use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub workflows_processed: u32,
    pub executions_processed: u32,
    pub records_extracted: u32,
    pub records_saved: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub stats: SyncStats,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSyncStats {
    pub workflows_processed: u32,
    pub executions_processed: u32,
    pub leads_found: u32,
    pub metrics_saved: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSyncReport {
    pub success: bool,
    pub message: String,
    pub stats: LeadSyncStats,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: String,
}

/// Wall-clock duration formatted the way the dashboard expects (`"1.234s"`).
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let millis = (end - start).num_milliseconds().max(0);
    format!("{:.3}s", millis as f64 / 1000.0)
}
