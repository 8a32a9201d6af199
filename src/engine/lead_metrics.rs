use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Timelike, Utc};
use serde_json::{json, Value};

use crate::engine::lead_extractor::{
    classify_node_name, classify_payload_status, extract_contact, normalize_phone,
};
use crate::models::execution::{parse_timestamp, Execution};
use crate::models::lead::{conversion_rate, LeadMetric, LeadStatus, ProcessedLead};
use crate::models::workflow::WorkflowSummary;

pub const UNKNOWN_WORKFLOW_ID: &str = "unknown";
pub const UNKNOWN_WORKFLOW_NAME: &str = "Unknown Workflow";
/// Lead details kept per freshly aggregated group.
pub const LEAD_DETAILS_PER_GROUP: usize = 5;
/// Lead details kept on a stored row that keeps accumulating.
pub const STORED_LEAD_DETAILS_CAP: usize = 50;

/// Fields shared by webhook leads and leads found in execution items.
struct PayloadMeta {
    source: Option<String>,
    campaign: Option<String>,
    tags: Vec<String>,
}

/// Turns one webhook payload into a lead. `None` when no contact could be
/// recovered.
pub fn process_lead_payload(data: &Value, now: DateTime<Utc>) -> Option<ProcessedLead> {
    let contact = extract_contact(data)?;
    let remotejid = normalize_phone(&contact);
    if remotejid.is_empty() {
        return None;
    }

    let meta = describe_payload(data, &contact, declared_tags(data));
    Some(ProcessedLead {
        remotejid,
        status: classify_payload_status(data),
        timestamp: payload_timestamp(data).unwrap_or(now),
        workflow_id: first_text(data, &[&["workflowId"], &["workflow", "id"]])
            .unwrap_or_else(|| UNKNOWN_WORKFLOW_ID.to_string()),
        workflow_name: first_text(data, &[&["workflowName"], &["workflow", "name"]])
            .unwrap_or_else(|| UNKNOWN_WORKFLOW_NAME.to_string()),
        node_id: first_text(data, &[&["nodeId"], &["node", "id"]]),
        execution_id: first_text(data, &[&["executionId"], &["execution", "id"]]),
        source: meta.source,
        campaign: meta.campaign,
        tags: meta.tags,
        details: data.clone(),
    })
}

/// Leads found in the node items of one execution: each run's `data.json`
/// and every `data.main[][].json`. The status comes from the item's own
/// `status` field, then from the node name.
pub fn leads_from_execution(
    execution: &Execution,
    workflow: &WorkflowSummary,
    now: DateTime<Utc>,
) -> Vec<ProcessedLead> {
    let Some(run_data) = execution.run_data_map() else {
        return Vec::new();
    };
    let timestamp = execution.timestamp_or(now);
    let workflow_tags = workflow.tag_names();
    let mut leads = Vec::new();

    for (node_name, runs) in run_data {
        let Some(runs) = runs.as_array() else {
            continue;
        };
        for item in runs.iter().flat_map(run_items) {
            let Some(contact) = extract_contact(item) else {
                continue;
            };
            let remotejid = normalize_phone(&contact);
            if remotejid.is_empty() {
                continue;
            }

            let from_item = item
                .get("status")
                .is_some_and(|s| !s.is_null())
                .then(|| classify_payload_status(item))
                .filter(|s| *s != LeadStatus::Captured);
            let status = from_item
                .or_else(|| classify_node_name(node_name))
                .unwrap_or(LeadStatus::Captured);

            let meta = describe_payload(item, &contact, workflow_tags.clone());
            leads.push(ProcessedLead {
                remotejid,
                status,
                timestamp,
                workflow_id: workflow.id.clone(),
                workflow_name: workflow.name.clone(),
                node_id: Some(node_name.clone()),
                execution_id: execution.id.clone(),
                source: meta.source,
                campaign: meta.campaign,
                tags: meta.tags,
                details: item.clone(),
            });
        }
    }
    leads
}

fn run_items(run: &Value) -> Vec<&Value> {
    let Some(data) = run.get("data") else {
        return Vec::new();
    };
    let mut items: Vec<&Value> = data.get("json").filter(|j| j.is_object()).into_iter().collect();
    if let Some(outputs) = data.get("main").and_then(Value::as_array) {
        items.extend(
            outputs
                .iter()
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(|entry| entry.get("json"))
                .filter(|j| j.is_object()),
        );
    }
    items
}

/// One lead per `(contact, date, workflow)`. A decided status replaces an
/// earlier `captured` one; otherwise the first occurrence is kept.
pub fn dedupe_leads(leads: Vec<ProcessedLead>) -> Vec<ProcessedLead> {
    let mut index: HashMap<(String, NaiveDate, String), usize> = HashMap::new();
    let mut kept: Vec<ProcessedLead> = Vec::new();

    for lead in leads {
        let key = (
            lead.remotejid.clone(),
            lead.timestamp.date_naive(),
            lead.workflow_id.clone(),
        );
        match index.get(&key) {
            Some(&i) => {
                if kept[i].status == LeadStatus::Captured && lead.status != LeadStatus::Captured {
                    kept[i] = lead;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(lead);
            }
        }
    }
    kept
}

/// Groups leads by `(UTC date, workflow_id)` into one metric per group,
/// ordered by date then workflow.
pub fn aggregate_lead_metrics(leads: &[ProcessedLead]) -> Vec<LeadMetric> {
    let mut groups: BTreeMap<(NaiveDate, &str), Vec<&ProcessedLead>> = BTreeMap::new();
    for lead in leads {
        groups
            .entry((lead.timestamp.date_naive(), lead.workflow_id.as_str()))
            .or_default()
            .push(lead);
    }

    groups
        .into_iter()
        .map(|((date, workflow_id), group)| {
            let first = group[0];
            let count = |status: LeadStatus| group.iter().filter(|l| l.status == status).count() as i32;
            let qualified = count(LeadStatus::Qualified);
            let unqualified = count(LeadStatus::Unqualified);

            let mut tags: Vec<String> = Vec::new();
            for tag in group.iter().flat_map(|l| l.tags.iter()) {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }

            LeadMetric {
                date,
                workflow_id: workflow_id.to_string(),
                workflow_name: first.workflow_name.clone(),
                agent_name: agent_name(&first.workflow_name),
                total_leads: group.len() as i32,
                qualified_leads: qualified,
                unqualified_leads: unqualified,
                conversion_rate: conversion_rate(qualified, unqualified),
                tags,
                lead_details: Value::Array(
                    group
                        .iter()
                        .take(LEAD_DETAILS_PER_GROUP)
                        .map(|l| lead_detail(l))
                        .collect(),
                ),
                hour: first.timestamp.hour() as i32,
                weekday: first.timestamp.weekday().num_days_from_sunday() as i32,
                month: first.timestamp.month() as i32,
                year: first.timestamp.year(),
                source: predominant(group.iter().filter_map(|l| l.source.as_deref())),
                campaign: predominant(group.iter().filter_map(|l| l.campaign.as_deref())),
            }
        })
        .collect()
}

/// Folds a freshly aggregated metric into the stored row for the same
/// `(date, workflow_id)`. Counts add up, the rate is recomputed from the
/// sums and the detail list keeps its newest [`STORED_LEAD_DETAILS_CAP`]
/// entries.
///
/// The accumulate upsert in `db::postgres_lead_metrics_repository` performs
/// the same merge in SQL; this is its reference and what the in-memory
/// repository uses. Keep the two in step.
pub fn merge_lead_metric(existing: &LeadMetric, incoming: &LeadMetric) -> LeadMetric {
    let qualified = existing.qualified_leads + incoming.qualified_leads;
    let unqualified = existing.unqualified_leads + incoming.unqualified_leads;

    let mut tags = existing.tags.clone();
    for tag in &incoming.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    let mut details: Vec<Value> = [&existing.lead_details, &incoming.lead_details]
        .into_iter()
        .filter_map(Value::as_array)
        .flatten()
        .cloned()
        .collect();
    if details.len() > STORED_LEAD_DETAILS_CAP {
        details.drain(..details.len() - STORED_LEAD_DETAILS_CAP);
    }

    LeadMetric {
        total_leads: existing.total_leads + incoming.total_leads,
        qualified_leads: qualified,
        unqualified_leads: unqualified,
        conversion_rate: conversion_rate(qualified, unqualified),
        tags,
        lead_details: Value::Array(details),
        source: incoming.source.clone().or_else(|| existing.source.clone()),
        campaign: incoming.campaign.clone().or_else(|| existing.campaign.clone()),
        ..incoming.clone()
    }
}

/// Prefix of the workflow name before `" - "`, e.g. `"Sofia"` for
/// `"Sofia - Atendimento"`.
pub fn agent_name(workflow_name: &str) -> Option<String> {
    workflow_name
        .split(" - ")
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn lead_detail(lead: &ProcessedLead) -> Value {
    json!({
        "phone": lead.remotejid,
        "status": lead.status.as_str(),
        "timestamp": lead.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Most frequent value; the earliest one wins a tie.
fn predominant<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, max)| n > max) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v.to_string())
}

fn describe_payload(data: &Value, contact: &str, mut tags: Vec<String>) -> PayloadMeta {
    let explicit_source = first_text(data, &[&["source"], &["origem"], &["channel"]]);
    if let Some(source) = &explicit_source {
        if !tags.contains(source) {
            tags.push(source.clone());
        }
    }
    let source = explicit_source.or_else(|| infer_source(data, contact));
    let campaign = first_text(data, &[&["campaign"], &["campanha"], &["campaign_name"]]);
    PayloadMeta {
        source,
        campaign,
        tags,
    }
}

fn infer_source(data: &Value, contact: &str) -> Option<String> {
    let serialized = data.to_string().to_lowercase();
    let has = |needle: &str| serialized.contains(needle);
    let source = if contact.contains("@s.whatsapp.net") || has("whatsapp") {
        "whatsapp"
    } else if has("instagram") {
        "instagram"
    } else if has("facebook") || has("messenger") {
        "facebook"
    } else if has("website") || has("site") {
        "website"
    } else {
        return None;
    };
    Some(source.to_string())
}

/// `tags` as an array of strings or a comma-separated string.
fn declared_tags(data: &Value) -> Vec<String> {
    let raw: Vec<String> = match data.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.into_iter().map(|t| t.trim().to_string()) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn payload_timestamp(data: &Value) -> Option<DateTime<Utc>> {
    match data.get("timestamp")? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

fn first_text(data: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        let value = path.iter().try_fold(data, |current, key| current.get(key))?;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}
