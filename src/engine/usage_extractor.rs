use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::pricing::{calculate_cost, normalize_model};
use crate::models::execution::Execution;
use crate::models::usage::UsageRecord;

/// Nested fields of a node's `json` output that may hold a full API response
/// of their own.
const NESTED_RESPONSE_FIELDS: [&str; 3] = ["request", "response", "data"];

const COMPLETION_OBJECTS: [&str; 2] = ["chat.completion", "text_completion"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("execution runData is not an object")]
    MalformedRunData,
    #[error("run {index} of node `{node}` is not an object")]
    MalformedRun { node: String, index: usize },
    #[error("node `{node}` reports an invalid {field}: {value}")]
    InvalidTokenCount {
        node: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TokenCounts {
    prompt: u64,
    completion: u64,
    total: u64,
}

/// Usage records found in one execution, stamped with the current time when
/// the execution carries no timestamp of its own.
pub fn extract_usage(execution: &Execution) -> Result<Vec<UsageRecord>, ExtractionError> {
    extract_usage_at(execution, Utc::now())
}

/// Walks `data.resultData.runData` and returns one record per OpenAI-shaped
/// object found in a run's `data.json` or in its `request`, `response` and
/// `data` children.
///
/// A missing runData yields `Ok(vec![])`. A runData that is not an object is
/// the only hard error; a broken run is logged and dropped without affecting
/// its siblings.
pub fn extract_usage_at(
    execution: &Execution,
    now: DateTime<Utc>,
) -> Result<Vec<UsageRecord>, ExtractionError> {
    let Some(run_data) = execution.run_data() else {
        return Ok(Vec::new());
    };
    let run_data = run_data
        .as_object()
        .ok_or(ExtractionError::MalformedRunData)?;

    let timestamp = execution.timestamp_or(now);
    let mut records = Vec::new();

    for (node_name, runs) in run_data {
        let Some(runs) = runs.as_array() else {
            debug!(
                execution_id = execution.id.as_deref().unwrap_or("unknown"),
                node = %node_name,
                "skipping node whose runs are not a list"
            );
            continue;
        };

        for (index, run) in runs.iter().enumerate() {
            match usage_from_run(node_name, index, run) {
                Ok(found) => {
                    for (raw_model, tokens) in found {
                        let model = normalize_model(&raw_model);
                        let cost = calculate_cost(&model, tokens.prompt, tokens.completion);
                        records.push(UsageRecord {
                            model,
                            raw_model,
                            prompt_tokens: tokens.prompt,
                            completion_tokens: tokens.completion,
                            total_tokens: tokens.total,
                            cost,
                            timestamp,
                            execution_id: execution.id.clone(),
                            node_id: node_name.clone(),
                            node_name: node_name.clone(),
                            extraction_index: records.len(),
                        });
                    }
                }
                Err(err) => {
                    warn!(
                        execution_id = execution.id.as_deref().unwrap_or("unknown"),
                        node = %node_name,
                        run = index,
                        error = %err,
                        "discarding unreadable node run"
                    );
                }
            }
        }
    }

    Ok(records)
}

/// All usage candidates of one run. Either every candidate of the run is
/// returned or none is.
fn usage_from_run(
    node: &str,
    index: usize,
    run: &Value,
) -> Result<Vec<(String, TokenCounts)>, ExtractionError> {
    let run = run.as_object().ok_or_else(|| ExtractionError::MalformedRun {
        node: node.to_string(),
        index,
    })?;
    let Some(json) = run
        .get("data")
        .and_then(|d| d.get("json"))
        .and_then(Value::as_object)
    else {
        return Ok(Vec::new());
    };

    let mut found = Vec::new();
    if let Some(hit) = usage_from_object(node, json)? {
        found.push(hit);
    }
    for field in NESTED_RESPONSE_FIELDS {
        if let Some(nested) = json.get(field).and_then(Value::as_object) {
            if let Some(hit) = usage_from_object(node, nested)? {
                found.push(hit);
            }
        }
    }
    Ok(found)
}

fn usage_from_object(
    node: &str,
    obj: &Map<String, Value>,
) -> Result<Option<(String, TokenCounts)>, ExtractionError> {
    if !looks_like_usage(obj) {
        return Ok(None);
    }
    let raw_model = obj
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Some((raw_model, token_counts(node, obj)?)))
}

fn usage_block(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    obj.get("usage")
        .or_else(|| obj.get("tokenUsage"))
        .and_then(Value::as_object)
}

fn has_key(obj: &Map<String, Value>, snake: &str, camel: &str) -> bool {
    [snake, camel]
        .iter()
        .any(|k| obj.get(*k).is_some_and(|v| !v.is_null()))
}

/// `model` plus either a usage block or a completion `object` marker, or a
/// usage block that carries token counts even without a model.
fn looks_like_usage(obj: &Map<String, Value>) -> bool {
    let has_model = obj.get("model").is_some_and(|m| !m.is_null());
    let usage = usage_block(obj);
    let completion_marker = obj
        .get("object")
        .and_then(Value::as_str)
        .is_some_and(|o| COMPLETION_OBJECTS.contains(&o));

    if has_model && (usage.is_some() || completion_marker) {
        return true;
    }
    usage.is_some_and(|u| {
        has_key(u, "prompt_tokens", "promptTokens")
            || has_key(u, "completion_tokens", "completionTokens")
    })
}

fn token_counts(node: &str, obj: &Map<String, Value>) -> Result<TokenCounts, ExtractionError> {
    let usage = usage_block(obj);
    let read = |snake: &'static str, camel: &str| -> Result<Option<u64>, ExtractionError> {
        let raw = usage
            .and_then(|u| u.get(snake).or_else(|| u.get(camel)))
            .filter(|v| !v.is_null())
            .or_else(|| obj.get(snake).or_else(|| obj.get(camel)))
            .filter(|v| !v.is_null());
        match raw {
            None => Ok(None),
            Some(value) => parse_count(value).map(Some).ok_or_else(|| {
                ExtractionError::InvalidTokenCount {
                    node: node.to_string(),
                    field: snake,
                    value: value.to_string(),
                }
            }),
        }
    };

    let prompt = read("prompt_tokens", "promptTokens")?.unwrap_or(0);
    let completion = read("completion_tokens", "completionTokens")?.unwrap_or(0);
    let total = match read("total_tokens", "totalTokens")? {
        Some(total) if total > 0 => total,
        _ => prompt
            .checked_add(completion)
            .ok_or_else(|| ExtractionError::InvalidTokenCount {
                node: node.to_string(),
                field: "total_tokens",
                value: format!("{prompt} + {completion}"),
            })?,
    };
    Ok(TokenCounts {
        prompt,
        completion,
        total,
    })
}

/// Non-negative integers, integral floats and numeric strings.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
