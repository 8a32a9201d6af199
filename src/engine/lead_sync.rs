use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::lead_metrics_repository::LeadMetricsRepository;
use crate::engine::lead_metrics::{aggregate_lead_metrics, dedupe_leads, leads_from_execution};
use crate::engine::sync::{collect_agent_executions, SyncError, SyncOptions};
use crate::models::lead::ProcessedLead;
use crate::models::sync::{format_duration, LeadSyncReport, LeadSyncStats};
use crate::services::n8n::N8nApi;

/// Rebuilds `lead_metrics` rows from the executions of agent workflows.
/// Each `(date, workflow_id)` group found replaces the stored row.
pub struct LeadSync<'a> {
    n8n: &'a dyn N8nApi,
    leads: &'a dyn LeadMetricsRepository,
}

impl<'a> LeadSync<'a> {
    pub fn new(n8n: &'a dyn N8nApi, leads: &'a dyn LeadMetricsRepository) -> Self {
        Self { n8n, leads }
    }

    pub async fn run(&self, options: &SyncOptions) -> Result<LeadSyncReport, SyncError> {
        self.run_at(options, Utc::now()).await
    }

    pub async fn run_at(
        &self,
        options: &SyncOptions,
        now: DateTime<Utc>,
    ) -> Result<LeadSyncReport, SyncError> {
        let start_time = Utc::now();
        let mut stats = LeadSyncStats::default();
        let mut found: Vec<ProcessedLead> = Vec::new();

        let listing_errors =
            collect_agent_executions(self.n8n, options, now, |workflow, executions| {
                stats.workflows_processed += 1;
                for execution in &executions {
                    stats.executions_processed += 1;
                    found.extend(leads_from_execution(execution, workflow, now));
                }
            })
            .await?;
        stats.errors += listing_errors;

        let leads = dedupe_leads(found);
        stats.leads_found = leads.len() as u32;

        for metric in aggregate_lead_metrics(&leads) {
            match self.leads.replace_lead_metric(&metric).await {
                Ok(()) => stats.metrics_saved += 1,
                Err(err) => {
                    warn!(
                        date = %metric.date,
                        workflow_id = %metric.workflow_id,
                        error = %err,
                        "failed to save lead metric"
                    );
                    stats.errors += 1;
                }
            }
        }

        let end_time = Utc::now();
        let duration = format_duration(start_time, end_time);
        info!(
            leads = stats.leads_found,
            metrics = stats.metrics_saved,
            errors = stats.errors,
            %duration,
            "lead metrics recomputed"
        );

        Ok(LeadSyncReport {
            success: true,
            message: format!(
                "Lead metrics updated in {duration}: {} leads in {} daily rows",
                stats.leads_found, stats.metrics_saved
            ),
            stats,
            start_time,
            end_time,
            duration,
        })
    }
}
