//! sw_update tool implementation.
//!
//! Registers the version described by the current configuration.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_client::{RegisterOutcome, Registration};
use waypost_core::{AppConfig, Error};

/// Input parameters for the sw_update tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SwUpdateParams {}

/// Output structure for the sw_update tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwUpdateOutput {
    /// "unchanged", "activated" or "waiting".
    pub outcome: String,
    pub version: String,
    /// Manifest entries stored; absent when nothing was installed.
    pub precached: Option<usize>,
    /// Generations deleted by activation.
    pub deleted: Vec<String>,
}

impl From<RegisterOutcome> for SwUpdateOutput {
    fn from(outcome: RegisterOutcome) -> Self {
        match outcome {
            RegisterOutcome::Unchanged { version } => {
                Self { outcome: "unchanged".into(), version, precached: None, deleted: Vec::new() }
            }
            RegisterOutcome::Activated { install, activation } => Self {
                outcome: "activated".into(),
                version: install.version,
                precached: Some(install.precached),
                deleted: activation.deleted,
            },
            RegisterOutcome::Waiting { install } => Self {
                outcome: "waiting".into(),
                version: install.version,
                precached: Some(install.precached),
                deleted: Vec::new(),
            },
        }
    }
}

/// Implementation of the sw_update tool.
pub async fn update_impl(registration: &Registration, config: &AppConfig) -> Result<CallToolResult, McpError> {
    let worker = config
        .worker_config()
        .map_err(|e| Error::InvalidInput(e.to_string()))?;

    let outcome = registration.register(worker).await?;
    let output = SwUpdateOutput::from(outcome);
    tracing::info!(version = %output.version, outcome = %output.outcome, "update checked");

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
