use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::usage_repository::UsageRepository;
use crate::models::usage::{ModelUsageSummary, StoredUsageRow};

pub struct PostgresUsageRepository {
    pub pool: PgPool,
}

/// Postgres rejects an `ON CONFLICT DO UPDATE` that touches the same row
/// twice, so repeated request ids inside one batch collapse to the last one.
fn last_per_request_id(rows: &[StoredUsageRow]) -> Vec<&StoredUsageRow> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&StoredUsageRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(row.request_id.as_str()) {
            Some(&i) => unique[i] = row,
            None => {
                position.insert(row.request_id.as_str(), unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    async fn upsert_usage_batch(&self, rows: &[StoredUsageRow]) -> Result<u64, sqlx::Error> {
        let unique = last_per_request_id(rows);
        if unique.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO openai_usage (
                timestamp, workflow_id, workflow_name, node_id, node_name, execution_id,
                model, endpoint, prompt_tokens, completion_tokens, total_tokens,
                estimated_cost, user_id, request_id, tags, metadata
            ) "#,
        );
        builder.push_values(unique, |mut b, row| {
            b.push_bind(row.timestamp)
                .push_bind(row.workflow_id.clone())
                .push_bind(row.workflow_name.clone())
                .push_bind(row.node_id.clone())
                .push_bind(row.node_name.clone())
                .push_bind(row.execution_id.clone())
                .push_bind(row.model.clone())
                .push_bind(row.endpoint.clone())
                .push_bind(row.prompt_tokens)
                .push_bind(row.completion_tokens)
                .push_bind(row.total_tokens)
                .push_bind(row.estimated_cost)
                .push_bind(row.user_id.clone())
                .push_bind(row.request_id.clone())
                .push_bind(row.tags.clone())
                .push_bind(row.metadata.clone());
        });
        builder.push(
            r#" ON CONFLICT (request_id) DO UPDATE SET
                timestamp = EXCLUDED.timestamp,
                workflow_id = EXCLUDED.workflow_id,
                workflow_name = EXCLUDED.workflow_name,
                node_id = EXCLUDED.node_id,
                node_name = EXCLUDED.node_name,
                execution_id = EXCLUDED.execution_id,
                model = EXCLUDED.model,
                endpoint = EXCLUDED.endpoint,
                prompt_tokens = EXCLUDED.prompt_tokens,
                completion_tokens = EXCLUDED.completion_tokens,
                total_tokens = EXCLUDED.total_tokens,
                estimated_cost = EXCLUDED.estimated_cost,
                user_id = EXCLUDED.user_id,
                tags = EXCLUDED.tags,
                metadata = EXCLUDED.metadata"#,
        );

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn refresh_daily_summary(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT update_openai_daily_summary()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn refresh_recent_executions(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT update_recent_agent_executions()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn usage_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ModelUsageSummary>, sqlx::Error> {
        let results = sqlx::query_as::<_, ModelUsageSummary>(
            r#"
            SELECT model,
                   COUNT(*)::int8 AS requests,
                   COALESCE(SUM(prompt_tokens), 0)::int8 AS prompt_tokens,
                   COALESCE(SUM(completion_tokens), 0)::int8 AS completion_tokens,
                   COALESCE(SUM(total_tokens), 0)::int8 AS total_tokens,
                   COALESCE(SUM(estimated_cost), 0)::float8 AS estimated_cost
            FROM openai_usage
            WHERE timestamp >= $1
            GROUP BY model
            ORDER BY estimated_cost DESC, model
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }
}
