use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::de;

/// One run of an N8N workflow. Only the fields the pipeline reads are typed;
/// the node output tree stays as raw JSON because its shape varies per node
/// type and per endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub stopped_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Execution {
    /// `data.resultData.runData`, present only on finished executions whose
    /// data has not been pruned.
    pub fn run_data(&self) -> Option<&Value> {
        self.data
            .as_ref()?
            .get("resultData")?
            .get("runData")
            .filter(|v| !v.is_null())
    }

    pub fn run_data_map(&self) -> Option<&Map<String, Value>> {
        self.run_data()?.as_object()
    }

    pub fn has_run_data(&self) -> bool {
        self.run_data().is_some()
    }

    /// First parseable of `startedAt`, `stoppedAt`, `createdAt`.
    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        [&self.started_at, &self.stopped_at, &self.created_at]
            .into_iter()
            .flatten()
            .find_map(|raw| parse_timestamp(raw))
    }

    pub fn timestamp_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.reference_time().unwrap_or(now)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn reads_run_data_and_numeric_ids() {
        let exec: Execution = serde_json::from_value(json!({
            "id": 381,
            "workflowId": "wf-1",
            "startedAt": "2024-05-02T10:00:00.000Z",
            "data": { "resultData": { "runData": { "OpenAI": [] } } }
        }))
        .unwrap();

        assert_eq!(exec.id.as_deref(), Some("381"));
        assert!(exec.has_run_data());
        assert!(exec.run_data_map().unwrap().contains_key("OpenAI"));
    }

    #[test]
    fn pruned_execution_has_no_run_data() {
        let exec: Execution = serde_json::from_value(json!({
            "id": "1",
            "data": { "resultData": { "runData": null } }
        }))
        .unwrap();
        assert!(!exec.has_run_data());
        assert!(Execution::default().run_data().is_none());
    }

    #[test]
    fn reference_time_falls_back_through_timestamps() {
        let exec = Execution {
            started_at: Some("not a date".into()),
            stopped_at: None,
            created_at: Some("2024-05-01T08:30:00Z".into()),
            ..Default::default()
        };
        assert_eq!(
            exec.reference_time(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap())
        );

        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Execution::default().timestamp_or(now), now);
    }
}
