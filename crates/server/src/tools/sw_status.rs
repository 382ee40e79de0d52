//! sw_status tool implementation.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_client::Registration;
use waypost_client::worker::WorkerStatus;
use waypost_core::{Error, Generation, WorkerState};

/// Input parameters for the sw_status tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SwStatusParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerInfo {
    pub version: String,
    pub state: WorkerState,
    pub controls_clients: bool,
    pub ready_to_activate: bool,
}

impl From<WorkerStatus> for WorkerInfo {
    fn from(status: WorkerStatus) -> Self {
        Self {
            version: status.version,
            state: status.state,
            controls_clients: status.controls_clients,
            ready_to_activate: status.ready_to_activate,
        }
    }
}

/// Output structure for the sw_status tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwStatusOutput {
    /// A version still precaching, if any.
    pub installing: Option<WorkerInfo>,
    pub active: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    /// Every generation in the cache database with its entry count.
    pub generations: Vec<Generation>,
}

/// Implementation of the sw_status tool.
pub async fn status_impl(registration: &Registration) -> Result<CallToolResult, McpError> {
    let status = registration.status().await;
    let generations = registration.cache().list_generations().await?;

    let output = SwStatusOutput {
        installing: status.installing.map(WorkerInfo::from),
        active: status.active.map(WorkerInfo::from),
        waiting: status.waiting.map(WorkerInfo::from),
        generations,
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize status: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{config, registration};

    fn output(result: CallToolResult) -> SwStatusOutput {
        let text = result.content[0].as_text().unwrap().text.clone();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_status_active_only() {
        let (_network, registration) = registration().await;
        let out = output(status_impl(&registration).await.unwrap());

        let active = out.active.unwrap();
        assert_eq!(active.version, "v1");
        assert_eq!(active.state, WorkerState::Activated);
        assert!(active.controls_clients);
        assert!(out.waiting.is_none());
        assert!(out.installing.is_none());
        assert_eq!(out.generations.len(), 1);
        assert_eq!(out.generations[0].entry_count, 3);
    }

    #[tokio::test]
    async fn test_status_with_waiting_version() {
        let (_network, registration) = registration().await;
        registration.register(config("v2")).await.unwrap();

        let out = output(status_impl(&registration).await.unwrap());
        let waiting = out.waiting.unwrap();
        assert_eq!(waiting.version, "v2");
        assert_eq!(waiting.state, WorkerState::Installed);
        let names: Vec<&str> = out.generations.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["v1", "v2"]);
    }
}
