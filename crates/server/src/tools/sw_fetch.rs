//! sw_fetch tool implementation.
//!
//! Issues a request as a controlled page would and reports which path served it.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use waypost_client::fetch::resolve;
use waypost_client::{FetchOutcome, Network, Registration};
use waypost_core::{Error, Request, RequestMode, ResponseType};

/// Input parameters for the sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchParams {
    /// Absolute URL, or a path resolved against the configured origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request mode: "navigate", "same-origin", "no-cors" or "cors" (default).
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_method() -> String {
    "GET".into()
}

fn default_mode() -> String {
    "cors".into()
}

/// Output structure for the sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchOutput {
    /// "network", "cache", "offline_fallback", "network_error" or "pass_through".
    pub source: String,
    pub status: u16,
    pub status_text: String,
    pub response_type: ResponseType,
    /// URL of the response; empty for network errors.
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8, lossily.
    pub body: String,
    pub body_bytes: usize,
}

/// Implementation of the sw_fetch tool.
pub async fn fetch_impl(
    registration: &Registration, origin: &Url, params: SwFetchParams,
) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(Error::InvalidInput("url cannot be empty".into()).into());
    }
    if params.method.trim().is_empty() {
        return Err(Error::InvalidInput("method cannot be empty".into()).into());
    }

    let url = resolve(origin, &params.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", params.url)))?;
    let mode: RequestMode = params.mode.parse()?;
    let request = Request::new(params.method.trim(), url, mode);

    let (response, source) = match registration.fetch(&request).await {
        FetchOutcome::Respond { response, source } => (response, source.as_str()),
        FetchOutcome::PassThrough => (registration.network().fetch(&request).await?, "pass_through"),
    };

    tracing::debug!(url = %request.url, source, status = response.status, "sw_fetch");

    let output = SwFetchOutput {
        source: source.to_string(),
        status: response.status,
        status_text: response.status_text.clone(),
        response_type: response.response_type,
        url: response.url.clone(),
        headers: response.headers.clone(),
        body: response.text().into_owned(),
        body_bytes: response.body.len(),
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize response: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
