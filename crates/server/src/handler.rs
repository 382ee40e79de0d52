//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::{
    SwFetchParams, SwMessageParams, SwStatusParams, SwUpdateParams, fetch_impl, message_impl, status_impl,
    update_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use url::Url;
use waypost_client::Registration;
use waypost_core::{AppConfig, Error};

/// The main MCP server handler for waypost.
#[derive(Clone)]
pub struct WaypostServer {
    tool_router: ToolRouter<Self>,
    registration: Arc<Registration>,
    origin: Url,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl WaypostServer {
    /// Create a new server handler over a registration serving `origin`.
    pub fn new(registration: Arc<Registration>, origin: Url) -> Self {
        Self { tool_router: Self::tool_router(), registration, origin }
    }

    #[tool(
        description = "Issue a request as a controlled page would. Returns the response and whether it came from the network, the cache, the offline fallback, or passed through."
    )]
    async fn sw_fetch(&self, params: Parameters<SwFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.registration, &self.origin, params.0).await
    }

    #[tool(description = "Post a control message (e.g. SKIP_WAITING) to the waiting or active cache version.")]
    async fn sw_message(&self, params: Parameters<SwMessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.registration, params.0).await
    }

    #[tool(description = "Show the active and waiting cache versions and every cache generation with its entry count.")]
    async fn sw_status(&self, _params: Parameters<SwStatusParams>) -> Result<CallToolResult, McpError> {
        status_impl(&self.registration).await
    }

    /// Reloads configuration so a bumped cache version is picked up.
    #[tool(description = "Reload configuration and register its cache version, installing it if it is new.")]
    async fn sw_update(&self, _params: Parameters<SwUpdateParams>) -> Result<CallToolResult, McpError> {
        let config = AppConfig::load().map_err(|e| Error::InvalidInput(e.to_string()))?;
        update_impl(&self.registration, &config).await
    }
}

impl ServerHandler for WaypostServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "waypost".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
