use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::usage_repository::UsageRepository;
use crate::engine::formatter::format_usage_row;
use crate::engine::usage_extractor::extract_usage_at;
use crate::models::execution::Execution;
use crate::models::sync::{format_duration, SyncReport, SyncStats};
use crate::models::usage::StoredUsageRow;
use crate::models::workflow::WorkflowSummary;
use crate::services::n8n::{ExecutionQuery, N8nApi, N8nError};

pub const UPSERT_BATCH_SIZE: usize = 50;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_EXECUTION_LIMIT: u32 = 100;
/// Longest lookback a request may ask for.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub lookback_days: i64,
    /// Recorded as `n8n_sync_<source>` in each row's metadata.
    pub source: String,
    pub debug: bool,
    pub status: Option<String>,
    pub limit: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            source: "cron".to_string(),
            debug: false,
            status: None,
            limit: DEFAULT_EXECUTION_LIMIT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list n8n workflows: {0}")]
    ListWorkflows(#[source] N8nError),
}

/// Fetches executions of every agent-tagged workflow and refetches the ones
/// listed without runData. Failures on one workflow are counted and logged;
/// only the workflow listing itself is fatal. Shared by the usage and lead
/// syncs.
pub(crate) async fn collect_agent_executions(
    n8n: &dyn N8nApi,
    options: &SyncOptions,
    now: DateTime<Utc>,
    mut on_workflow: impl FnMut(&WorkflowSummary, Vec<Execution>),
) -> Result<u32, SyncError> {
    let workflows = n8n
        .list_workflows()
        .await
        .map_err(SyncError::ListWorkflows)?;
    // no cutoff when the window reaches past what chrono can represent
    let cutoff = Duration::try_days(options.lookback_days.max(0))
        .and_then(|window| now.checked_sub_signed(window));
    let mut errors = 0u32;

    let agents: Vec<&WorkflowSummary> = workflows.iter().filter(|w| w.has_agent_tag()).collect();
    info!(
        workflows = workflows.len(),
        agent_workflows = agents.len(),
        lookback_days = options.lookback_days,
        "collecting n8n executions"
    );

    for workflow in agents {
        let query = ExecutionQuery {
            workflow_id: workflow.id.clone(),
            status: options.status.clone(),
            limit: options.limit,
        };
        let listed = match n8n.list_executions(&query).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(
                    workflow_id = %workflow.id,
                    error = %err,
                    "failed to list executions for workflow"
                );
                errors += 1;
                on_workflow(workflow, Vec::new());
                continue;
            }
        };

        let mut executions = Vec::with_capacity(listed.len());
        for execution in listed {
            let too_old = cutoff
                .zip(execution.reference_time())
                .is_some_and(|(cutoff, ts)| ts < cutoff);
            if too_old {
                continue;
            }
            executions.push(with_run_data(n8n, execution).await);
        }
        on_workflow(workflow, executions);
    }

    Ok(errors)
}

async fn with_run_data(n8n: &dyn N8nApi, execution: Execution) -> Execution {
    if execution.has_run_data() {
        return execution;
    }
    let Some(id) = execution.id.clone() else {
        return execution;
    };
    match n8n.get_execution(&id).await {
        Ok(full) => Execution {
            workflow_id: full.workflow_id.clone().or(execution.workflow_id),
            started_at: full.started_at.clone().or(execution.started_at),
            stopped_at: full.stopped_at.clone().or(execution.stopped_at),
            created_at: full.created_at.clone().or(execution.created_at),
            ..full
        },
        Err(err) => {
            debug!(execution_id = %id, error = %err, "could not refetch execution data");
            execution
        }
    }
}

pub struct UsageSync<'a> {
    n8n: &'a dyn N8nApi,
    usage: &'a dyn UsageRepository,
}

impl<'a> UsageSync<'a> {
    pub fn new(n8n: &'a dyn N8nApi, usage: &'a dyn UsageRepository) -> Self {
        Self { n8n, usage }
    }

    pub async fn run(&self, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        self.run_at(options, Utc::now()).await
    }

    /// One full pass: extract usage from every recent execution of every
    /// agent workflow, upsert it in batches of [`UPSERT_BATCH_SIZE`] and
    /// refresh the store-side aggregates when anything was saved.
    pub async fn run_at(
        &self,
        options: &SyncOptions,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let start_time = Utc::now();
        let mut stats = SyncStats::default();
        let mut rows: Vec<StoredUsageRow> = Vec::new();

        let listing_errors = collect_agent_executions(self.n8n, options, now, |workflow, executions| {
            stats.workflows_processed += 1;
            for execution in executions {
                stats.executions_processed += 1;
                let records = match extract_usage_at(&execution, now) {
                    Ok(records) => records,
                    Err(err) => {
                        warn!(
                            workflow_id = %workflow.id,
                            execution_id = execution.id.as_deref().unwrap_or("unknown"),
                            error = %err,
                            "could not extract usage from execution"
                        );
                        Vec::new()
                    }
                };
                if options.debug {
                    debug!(
                        workflow_id = %workflow.id,
                        execution_id = execution.id.as_deref().unwrap_or("unknown"),
                        records = records.len(),
                        "extracted usage"
                    );
                }
                stats.records_extracted += records.len() as u32;
                rows.extend(
                    records
                        .iter()
                        .map(|record| format_usage_row(record, workflow, &options.source, now)),
                );
            }
        })
        .await?;
        stats.errors += listing_errors;

        for (index, batch) in rows.chunks(UPSERT_BATCH_SIZE).enumerate() {
            match self.usage.upsert_usage_batch(batch).await {
                Ok(written) => stats.records_saved += written as u32,
                Err(err) => {
                    warn!(
                        batch = index + 1,
                        size = batch.len(),
                        error = %err,
                        "failed to upsert usage batch"
                    );
                    stats.errors += 1;
                }
            }
        }

        if stats.records_saved > 0 {
            if let Err(err) = self.usage.refresh_daily_summary().await {
                warn!(error = %err, "could not refresh daily usage summary");
            }
            if let Err(err) = self.usage.refresh_recent_executions().await {
                warn!(error = %err, "could not refresh recent agent executions");
            }
        }

        let end_time = Utc::now();
        let duration = format_duration(start_time, end_time);
        info!(
            workflows = stats.workflows_processed,
            executions = stats.executions_processed,
            extracted = stats.records_extracted,
            saved = stats.records_saved,
            errors = stats.errors,
            %duration,
            "n8n usage sync finished"
        );

        Ok(SyncReport {
            success: true,
            message: format!(
                "Sync finished in {duration}: {} of {} records saved",
                stats.records_saved, stats.records_extracted
            ),
            stats,
            start_time,
            end_time,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockUsageRepository;
    use crate::services::mock_n8n::MockN8n;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn workflow(id: &str, tags: Value) -> WorkflowSummary {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Agent {id}"),
            "active": true,
            "tags": tags
        }))
        .unwrap()
    }

    fn usage_run(prompt: u64) -> Value {
        json!({ "data": { "json": {
            "model": "gpt-4-1106-preview",
            "usage": { "prompt_tokens": prompt, "completion_tokens": 50 }
        } } })
    }

    /// Execution with `nodes` OpenAI nodes, one run each.
    fn execution(id: &str, started_at: DateTime<Utc>, nodes: usize) -> Execution {
        let run_data: serde_json::Map<String, Value> = (0..nodes)
            .map(|n| (format!("OpenAI {n}"), json!([usage_run(100)])))
            .collect();
        serde_json::from_value(json!({
            "id": id,
            "startedAt": started_at.to_rfc3339(),
            "data": { "resultData": { "runData": run_data } }
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn only_agent_tagged_workflows_are_processed() {
        let n8n = MockN8n {
            workflows: vec![
                workflow("wf-agent", json!(["agent", "client:acme"])),
                workflow("wf-other", json!(["marketing"])),
            ],
            executions: HashMap::from([
                ("wf-agent".to_string(), vec![execution("1", now(), 1)]),
                ("wf-other".to_string(), vec![execution("2", now(), 1)]),
            ]),
            ..Default::default()
        };
        let repo = MockUsageRepository::default();

        let report = UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");

        assert!(report.success);
        assert_eq!(report.stats.workflows_processed, 1);
        assert_eq!(report.stats.executions_processed, 1);
        assert_eq!(report.stats.records_saved, 1);
        let queried: Vec<String> = n8n
            .execution_queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.workflow_id.clone())
            .collect();
        assert_eq!(queried, vec!["wf-agent"]);

        let rows = repo.rows.lock().unwrap();
        let row = rows.values().next().unwrap();
        assert_eq!(row.tags, vec!["agent", "client:acme", "n8n"]);
        assert_eq!(row.metadata["source"], "n8n_sync_cron");
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_later_batches() {
        // 120 records: 40 executions with 3 OpenAI nodes each.
        let executions: Vec<Execution> = (0..40)
            .map(|i| execution(&format!("exec-{i}"), now(), 3))
            .collect();
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([("wf".to_string(), executions)]),
            ..Default::default()
        };
        let repo = MockUsageRepository {
            fail_batches: vec![2],
            ..Default::default()
        };

        let report = UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");

        assert_eq!(*repo.batch_sizes.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(report.stats.records_extracted, 120);
        assert_eq!(report.stats.records_saved, 70);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(repo.stored_count(), 70);
        assert_eq!(
            *repo.rpc_calls.lock().unwrap(),
            vec!["update_openai_daily_summary", "update_recent_agent_executions"]
        );
    }

    #[tokio::test]
    async fn rerunning_the_sync_is_idempotent() {
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([(
                "wf".to_string(),
                vec![execution("1", now(), 2), execution("2", now(), 1)],
            )]),
            ..Default::default()
        };
        let repo = MockUsageRepository::default();
        let sync = UsageSync::new(&n8n, &repo);

        sync.run(&SyncOptions::default()).await.expect("first");
        sync.run(&SyncOptions::default()).await.expect("second");

        assert_eq!(repo.stored_count(), 3);
    }

    #[tokio::test]
    async fn listing_failures_are_counted_and_skipped() {
        let n8n = MockN8n {
            workflows: vec![
                workflow("wf-broken", json!(["agent"])),
                workflow("wf-ok", json!([{ "name": "Agent" }])),
            ],
            executions: HashMap::from([("wf-ok".to_string(), vec![execution("9", now(), 1)])]),
            fail_executions_for: vec!["wf-broken".into()],
            ..Default::default()
        };
        let repo = MockUsageRepository::default();

        let report = UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");

        assert_eq!(report.stats.workflows_processed, 2);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.stats.records_saved, 1);
    }

    #[tokio::test]
    async fn workflow_listing_failure_is_fatal() {
        let n8n = MockN8n {
            fail_workflows: true,
            ..Default::default()
        };
        let repo = MockUsageRepository::default();

        let result = UsageSync::new(&n8n, &repo).run(&SyncOptions::default()).await;
        assert!(matches!(result, Err(SyncError::ListWorkflows(_))));
    }

    #[tokio::test]
    async fn old_executions_are_skipped_and_missing_data_is_refetched() {
        let recent = now() - Duration::days(1);
        let mut listed = execution("fresh", recent, 1);
        listed.data = None;
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([(
                "wf".to_string(),
                vec![
                    listed,
                    execution("stale", now() - Duration::days(30), 1),
                    Execution {
                        id: Some("gone".into()),
                        ..Default::default()
                    },
                ],
            )]),
            full_executions: HashMap::from([("fresh".to_string(), execution("fresh", recent, 2))]),
            ..Default::default()
        };
        let repo = MockUsageRepository::default();

        let report = UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");

        assert_eq!(report.stats.executions_processed, 2);
        assert_eq!(report.stats.records_extracted, 2);
        assert_eq!(report.stats.errors, 0);
        assert_eq!(*n8n.fetched_executions.lock().unwrap(), vec!["fresh", "gone"]);
    }

    #[tokio::test]
    async fn unrepresentable_lookback_keeps_every_execution() {
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([(
                "wf".to_string(),
                vec![
                    execution("new", now(), 1),
                    execution("old", now() - Duration::days(4000), 1),
                ],
            )]),
            ..Default::default()
        };
        let repo = MockUsageRepository::default();

        for lookback_days in [1_000_000_000, i64::MAX] {
            let options = SyncOptions {
                lookback_days,
                ..SyncOptions::default()
            };
            let report = UsageSync::new(&n8n, &repo).run(&options).await.expect("sync");
            assert_eq!(report.stats.executions_processed, 2);
        }
    }

    #[tokio::test]
    async fn aggregation_is_skipped_without_saved_rows_and_rpc_errors_are_soft() {
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([("wf".to_string(), vec![execution("1", now(), 0)])]),
            ..Default::default()
        };
        let repo = MockUsageRepository::default();
        UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");
        assert!(repo.rpc_calls.lock().unwrap().is_empty());

        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            executions: HashMap::from([("wf".to_string(), vec![execution("1", now(), 1)])]),
            ..Default::default()
        };
        let repo = MockUsageRepository {
            fail_rpc: true,
            ..Default::default()
        };
        let report = UsageSync::new(&n8n, &repo)
            .run(&SyncOptions::default())
            .await
            .expect("sync");
        assert!(report.success);
        assert_eq!(report.stats.errors, 0);
        assert_eq!(repo.rpc_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn options_reach_the_execution_query() {
        let n8n = MockN8n {
            workflows: vec![workflow("wf", json!(["agent"]))],
            ..Default::default()
        };
        let repo = MockUsageRepository::default();
        let options = SyncOptions {
            status: Some("success".into()),
            limit: 20,
            source: "manual".into(),
            ..Default::default()
        };

        UsageSync::new(&n8n, &repo).run(&options).await.expect("sync");

        let queries = n8n.execution_queries.lock().unwrap();
        assert_eq!(queries[0].status.as_deref(), Some("success"));
        assert_eq!(queries[0].limit, 20);
    }
}
