use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::db::lead_metrics_repository::LeadMetricsRepository;
use crate::engine::lead_metrics::STORED_LEAD_DETAILS_CAP;
use crate::models::lead::LeadMetric;

pub struct PostgresLeadMetricsRepository {
    pub pool: PgPool,
}

const RETURNING_COLUMNS: &str = r#"
    date,
    workflow_id,
    workflow_name,
    agent_name,
    total_leads::int4 AS total_leads,
    qualified_leads::int4 AS qualified_leads,
    unqualified_leads::int4 AS unqualified_leads,
    conversion_rate::float8 AS conversion_rate,
    tags,
    lead_details,
    hour::int4 AS hour,
    weekday::int4 AS weekday,
    month::int4 AS month,
    year::int4 AS year,
    source,
    campaign
"#;

const INSERT_LEAD_METRIC: &str = r#"
    INSERT INTO lead_metrics AS lm (
        date, workflow_id, workflow_name, agent_name,
        total_leads, qualified_leads, unqualified_leads, conversion_rate,
        tags, lead_details, hour, weekday, month, year, source, campaign
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

fn bind_metric<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, LeadMetric, sqlx::postgres::PgArguments>,
    metric: &LeadMetric,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, LeadMetric, sqlx::postgres::PgArguments> {
    query
        .bind(metric.date)
        .bind(metric.workflow_id.clone())
        .bind(metric.workflow_name.clone())
        .bind(metric.agent_name.clone())
        .bind(metric.total_leads)
        .bind(metric.qualified_leads)
        .bind(metric.unqualified_leads)
        .bind(metric.conversion_rate)
        .bind(metric.tags.clone())
        .bind(metric.lead_details.clone())
        .bind(metric.hour)
        .bind(metric.weekday)
        .bind(metric.month)
        .bind(metric.year)
        .bind(metric.source.clone())
        .bind(metric.campaign.clone())
}

#[async_trait]
impl LeadMetricsRepository for PostgresLeadMetricsRepository {
    async fn accumulate_lead_metric(&self, metric: &LeadMetric) -> Result<LeadMetric, sqlx::Error> {
        let sql = format!(
            r#"{INSERT_LEAD_METRIC}
            ON CONFLICT (date, workflow_id) DO UPDATE SET
                workflow_name = EXCLUDED.workflow_name,
                agent_name = EXCLUDED.agent_name,
                total_leads = lm.total_leads + EXCLUDED.total_leads,
                qualified_leads = lm.qualified_leads + EXCLUDED.qualified_leads,
                unqualified_leads = lm.unqualified_leads + EXCLUDED.unqualified_leads,
                conversion_rate = CASE
                    WHEN lm.qualified_leads + EXCLUDED.qualified_leads
                       + lm.unqualified_leads + EXCLUDED.unqualified_leads > 0
                    THEN (lm.qualified_leads + EXCLUDED.qualified_leads)::float8
                       / (lm.qualified_leads + EXCLUDED.qualified_leads
                          + lm.unqualified_leads + EXCLUDED.unqualified_leads)
                    ELSE 0
                END,
                tags = ARRAY(
                    SELECT t
                    FROM unnest(COALESCE(lm.tags, '{{}}') || EXCLUDED.tags) WITH ORDINALITY AS u(t, ord)
                    GROUP BY t
                    ORDER BY MIN(ord)
                ),
                lead_details = (
                    SELECT COALESCE(jsonb_agg(kept.value ORDER BY kept.ord), '[]'::jsonb)
                    FROM (
                        SELECT e.value, e.ord
                        FROM jsonb_array_elements(
                            COALESCE(lm.lead_details, '[]'::jsonb) || EXCLUDED.lead_details
                        ) WITH ORDINALITY AS e(value, ord)
                        ORDER BY e.ord DESC
                        LIMIT $17
                    ) kept
                ),
                hour = EXCLUDED.hour,
                weekday = EXCLUDED.weekday,
                month = EXCLUDED.month,
                year = EXCLUDED.year,
                source = COALESCE(EXCLUDED.source, lm.source),
                campaign = COALESCE(EXCLUDED.campaign, lm.campaign)
            RETURNING {RETURNING_COLUMNS}"#
        );

        let stored = bind_metric(sqlx::query_as::<_, LeadMetric>(&sql), metric)
            .bind(STORED_LEAD_DETAILS_CAP as i64)
            .fetch_one(&self.pool)
            .await?;

        Ok(stored)
    }

    async fn replace_lead_metric(&self, metric: &LeadMetric) -> Result<(), sqlx::Error> {
        let sql = format!(
            r#"{INSERT_LEAD_METRIC}
            ON CONFLICT (date, workflow_id) DO UPDATE SET
                workflow_name = EXCLUDED.workflow_name,
                agent_name = EXCLUDED.agent_name,
                total_leads = EXCLUDED.total_leads,
                qualified_leads = EXCLUDED.qualified_leads,
                unqualified_leads = EXCLUDED.unqualified_leads,
                conversion_rate = EXCLUDED.conversion_rate,
                tags = EXCLUDED.tags,
                lead_details = EXCLUDED.lead_details,
                hour = EXCLUDED.hour,
                weekday = EXCLUDED.weekday,
                month = EXCLUDED.month,
                year = EXCLUDED.year,
                source = EXCLUDED.source,
                campaign = EXCLUDED.campaign
            RETURNING {RETURNING_COLUMNS}"#
        );

        bind_metric(sqlx::query_as::<_, LeadMetric>(&sql), metric)
            .fetch_one(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_lead_metrics(&self, since: NaiveDate) -> Result<Vec<LeadMetric>, sqlx::Error> {
        let sql = format!(
            r#"SELECT {RETURNING_COLUMNS}
            FROM lead_metrics
            WHERE date >= $1
            ORDER BY date DESC, workflow_id"#
        );
        let results = sqlx::query_as::<_, LeadMetric>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(results)
    }
}
