use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::models::usage::{StoredUsageRow, UsageRecord};
use crate::models::workflow::{WorkflowSummary, AGENT_TAG};

pub const N8N_TAG: &str = "n8n";
const REQUEST_ID_SUFFIX_LEN: usize = 5;

/// Shapes one extracted record into an `openai_usage` row. `source` ends up
/// in `metadata.source` as `n8n_sync_<source>`.
pub fn format_usage_row(
    record: &UsageRecord,
    workflow: &WorkflowSummary,
    source: &str,
    extracted_at: DateTime<Utc>,
) -> StoredUsageRow {
    StoredUsageRow {
        timestamp: record.timestamp,
        workflow_id: workflow.id.clone(),
        workflow_name: workflow.name.clone(),
        node_id: record.node_id.clone(),
        node_name: record.node_name.clone(),
        execution_id: record.execution_id.clone(),
        model: record.model.clone(),
        endpoint: endpoint_for_model(&record.model).to_string(),
        prompt_tokens: clamp_tokens(record.prompt_tokens),
        completion_tokens: clamp_tokens(record.completion_tokens),
        total_tokens: clamp_tokens(record.total_tokens),
        estimated_cost: record.cost,
        user_id: None,
        request_id: request_id(record, extracted_at),
        tags: row_tags(workflow),
        metadata: json!({
            "source": format!("n8n_sync_{source}"),
            "extracted_at": extracted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "original_model": record.raw_model,
            "execution_id": record.execution_id,
            "node_id": record.node_id,
            "node_name": record.node_name,
            "workflow_active": workflow.active,
        }),
    }
}

/// `n8n_<execution>_<node>_<suffix>`. The suffix is the first five hex
/// digits of `sha256("<execution>:<node>:<index>")`, so extracting the same
/// event twice gives the same id. Without an execution id the extraction
/// time in epoch millis stands in.
pub fn request_id(record: &UsageRecord, extracted_at: DateTime<Utc>) -> String {
    let execution = record
        .execution_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| extracted_at.timestamp_millis().to_string());
    let node = if record.node_id.is_empty() {
        "node"
    } else {
        record.node_id.as_str()
    };

    let digest = Sha256::digest(format!("{execution}:{node}:{}", record.extraction_index));
    let suffix = &hex::encode(digest)[..REQUEST_ID_SUFFIX_LEN];
    format!("n8n_{execution}_{node}_{suffix}")
}

pub fn endpoint_for_model(model: &str) -> &'static str {
    let m = model.to_lowercase();
    if m.contains("embedding") {
        "embeddings"
    } else if m.contains("dall-e") || m.contains("image") {
        "images"
    } else {
        "chat"
    }
}

/// `agent`, then the workflow's own tags, then `n8n`, each once.
pub fn row_tags(workflow: &WorkflowSummary) -> Vec<String> {
    let mut tags = vec![AGENT_TAG.to_string()];
    for name in workflow.tag_names() {
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            tags.push(name);
        }
    }
    if !tags.iter().any(|t| t == N8N_TAG) {
        tags.push(N8N_TAG.to_string());
    }
    tags
}

fn clamp_tokens(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::usage_extractor::extract_usage;
    use crate::models::execution::Execution;
    use serde_json::{json, Value};

    fn workflow(tags: Value) -> WorkflowSummary {
        serde_json::from_value(json!({
            "id": "wf-9",
            "name": "Sofia - Vendas",
            "active": true,
            "tags": tags
        }))
        .unwrap()
    }

    fn record(execution_id: Option<&str>, node: &str, index: usize) -> UsageRecord {
        UsageRecord {
            model: "gpt-4".into(),
            raw_model: "gpt-4-0613".into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost: 0.0006,
            timestamp: Utc::now(),
            execution_id: execution_id.map(str::to_string),
            node_id: node.into(),
            node_name: node.into(),
            extraction_index: index,
        }
    }

    #[test]
    fn scenario_row_matches_dashboard_schema() {
        let execution: Execution = serde_json::from_value(json!({
            "id": "1001",
            "startedAt": "2024-05-02T10:00:00Z",
            "data": { "resultData": { "runData": {
                "OpenAI Chat": [{ "data": { "json": {
                    "model": "gpt-4-1106-preview",
                    "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
                } } }]
            } } }
        }))
        .unwrap();
        let wf = workflow(json!(["agent", "client:acme"]));
        let records = extract_usage(&execution).unwrap();
        let row = format_usage_row(&records[0], &wf, "cron", Utc::now());

        assert_eq!(row.model, "gpt-4-turbo");
        assert_eq!(row.total_tokens, 150);
        assert_eq!(row.tags, vec!["agent", "client:acme", "n8n"]);
        assert!((row.estimated_cost - 0.0025).abs() < 1e-12);
        assert_eq!(row.endpoint, "chat");
        assert_eq!(row.user_id, None);
        assert_eq!(row.workflow_id, "wf-9");
        assert!(row.request_id.starts_with("n8n_1001_OpenAI Chat_"));
        assert_eq!(row.metadata["source"], "n8n_sync_cron");
        assert_eq!(row.metadata["original_model"], "gpt-4-1106-preview");
        assert_eq!(row.metadata["workflow_active"], true);
    }

    #[test]
    fn request_id_is_stable_per_event() {
        let now = Utc::now();
        let a = request_id(&record(Some("55"), "OpenAI", 0), now);
        let b = request_id(&record(Some("55"), "OpenAI", 0), now + chrono::Duration::hours(3));
        let c = request_id(&record(Some("55"), "OpenAI", 1), now);

        assert_eq!(a, b);
        assert_ne!(a, c);
        let suffix = a.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn request_id_without_execution_uses_extraction_time() {
        let now = chrono::TimeZone::timestamp_millis_opt(&Utc, 1_714_644_000_123).unwrap();
        let id = request_id(&record(None, "", 0), now);
        assert!(id.starts_with("n8n_1714644000123_node_"), "{id}");
    }

    #[test]
    fn tags_always_include_agent_and_n8n_once() {
        assert_eq!(row_tags(&workflow(json!([]))), vec!["agent", "n8n"]);
        assert_eq!(
            row_tags(&workflow(json!(["Agent", { "name": "n8n" }, { "id": 3, "text": "vip" }]))),
            vec!["agent", "n8n", "vip"]
        );
    }

    #[test]
    fn endpoint_follows_model_family() {
        assert_eq!(endpoint_for_model("text-embedding-3-small"), "embeddings");
        assert_eq!(endpoint_for_model("dall-e-3"), "images");
        assert_eq!(endpoint_for_model("gpt-image-1"), "images");
        assert_eq!(endpoint_for_model("gpt-4-turbo"), "chat");
    }
}
