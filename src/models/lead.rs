use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Captured,
    Qualified,
    Unqualified,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Captured => "captured",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Unqualified => "unqualified",
        }
    }
}

/// A contact recovered from an N8N payload, with its normalized phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedLead {
    pub remotejid: String,
    pub status: LeadStatus,
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub workflow_name: String,
    pub node_id: Option<String>,
    pub execution_id: Option<String>,
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub tags: Vec<String>,
    pub details: Value,
}

/// Row of the `lead_metrics` table, one per `(date, workflow_id)`.
/// `lead_details` holds `{phone, status, timestamp}` objects, newest last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LeadMetric {
    pub date: NaiveDate,
    pub workflow_id: String,
    pub workflow_name: String,
    pub agent_name: Option<String>,
    pub total_leads: i32,
    pub qualified_leads: i32,
    pub unqualified_leads: i32,
    pub conversion_rate: f64,
    pub tags: Vec<String>,
    pub lead_details: Value,
    pub hour: i32,
    pub weekday: i32,
    pub month: i32,
    pub year: i32,
    pub source: Option<String>,
    pub campaign: Option<String>,
}

/// `qualified / (qualified + unqualified)`, 0 when nothing was decided yet.
pub fn conversion_rate(qualified: i32, unqualified: i32) -> f64 {
    let decided = qualified + unqualified;
    if decided > 0 {
        f64::from(qualified) / f64::from(decided)
    } else {
        0.0
    }
}
