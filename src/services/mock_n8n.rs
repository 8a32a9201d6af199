use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::StatusCode;

use super::n8n::{ExecutionQuery, N8nApi, N8nError};
use crate::models::execution::Execution;
use crate::models::workflow::WorkflowSummary;

fn api_error(message: &str) -> N8nError {
    N8nError::Api {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.to_string(),
    }
}

/// In-memory N8N. Executions are listed per workflow id; `full_executions`
/// answers `get_execution` for listings that came back without runData.
#[derive(Default)]
pub struct MockN8n {
    pub workflows: Vec<WorkflowSummary>,
    pub executions: HashMap<String, Vec<Execution>>,
    pub full_executions: HashMap<String, Execution>,
    pub fail_workflows: bool,
    pub fail_executions_for: Vec<String>,
    pub execution_queries: Mutex<Vec<ExecutionQuery>>,
    pub fetched_executions: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl N8nApi for MockN8n {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, N8nError> {
        if self.fail_workflows {
            return Err(api_error("workflows unavailable"));
        }
        Ok(self.workflows.clone())
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>, N8nError> {
        if let Ok(mut queries) = self.execution_queries.lock() {
            queries.push(query.clone());
        }
        if self.fail_executions_for.contains(&query.workflow_id) {
            return Err(api_error("executions unavailable"));
        }
        Ok(self
            .executions
            .get(&query.workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_execution(&self, id: &str) -> Result<Execution, N8nError> {
        if let Ok(mut fetched) = self.fetched_executions.lock() {
            fetched.push(id.to_string());
        }
        self.full_executions
            .get(id)
            .cloned()
            .ok_or_else(|| N8nError::Api {
                status: StatusCode::NOT_FOUND,
                message: format!("execution {id} not found"),
            })
    }
}
