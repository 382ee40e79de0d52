//! sw_message tool implementation.
//!
//! Posts a control message to the registration, as a page would.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_client::Registration;
use waypost_core::{ControlMessage, Error};

/// Input parameters for the sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageParams {
    /// Message type, e.g. "SKIP_WAITING".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Output structure for the sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageOutput {
    #[serde(rename = "type")]
    pub kind: String,
    /// False when the type is unknown; such messages are ignored.
    pub accepted: bool,
    /// Version activated as a result of the message.
    pub activated: Option<String>,
    /// Generations deleted by that activation.
    pub deleted: Vec<String>,
}

/// Implementation of the sw_message tool.
pub async fn message_impl(registration: &Registration, params: SwMessageParams) -> Result<CallToolResult, McpError> {
    let output = match ControlMessage::from_type(params.kind.trim()) {
        Some(message) => {
            let activation = registration.post_message(message).await?;
            SwMessageOutput {
                kind: params.kind,
                accepted: true,
                activated: activation.as_ref().map(|a| a.version.clone()),
                deleted: activation.map(|a| a.deleted).unwrap_or_default(),
            }
        }
        None => {
            tracing::debug!(kind = %params.kind, "ignoring unknown control message");
            SwMessageOutput { kind: params.kind, accepted: false, activated: None, deleted: Vec::new() }
        }
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
