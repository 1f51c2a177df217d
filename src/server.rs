//! Inbound MCP server for the router, using rmcp.
//!
//! Terminates the router's own transport (stdio or streamable HTTP) and
//! feeds caller requests into the handler registry. The engine and handlers
//! are explicitly constructed and passed in; there is no ambient global
//! router instance.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
};

use crate::engine::RoutingEngine;
use crate::tools::{HandlerRegistry, ToolContext};

/// MCP server that exposes the router actions and delegates to the handlers.
#[derive(Clone)]
pub struct RouterServer {
    engine: Arc<RoutingEngine>,
    handlers: Arc<HandlerRegistry>,
    /// Server summary baked into the MCP `instructions` string so callers
    /// see which upstreams are routed without an extra round trip.
    instructions: String,
}

impl RouterServer {
    pub fn new(
        engine: Arc<RoutingEngine>,
        handlers: Arc<HandlerRegistry>,
        server_summary: String,
    ) -> Self {
        let instructions = format!(
            "MCP router aggregating the tool catalogs of the configured upstream servers.\n\
             Use router.list_tools to discover qualified tool ids, router.get_tool_schema \
             before executing, router.execute_tool for synchronous calls, and \
             router.spawn_tool_in_background + router.poll_tool_result for long-running tools.\n\n\
             Routed servers:\n{}",
            server_summary
        );

        Self {
            engine,
            handlers,
            instructions,
        }
    }

    pub fn engine(&self) -> &Arc<RoutingEngine> {
        &self.engine
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}

impl ServerHandler for RouterServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let result = ListToolsResult {
            tools: self.handlers.list_tools(),
            next_cursor: None,
            ..Default::default()
        };
        std::future::ready(Ok(result))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments.unwrap_or_default();
        let handlers = self.handlers.clone();

        async move {
            let ctx = ToolContext {
                request_context: context,
            };

            match handlers.call_tool(&tool_name, args, &ctx).await {
                Ok(result) => Ok(result),
                Err(e) => Err(McpError::internal_error(
                    format!("Tool execution failed: {}", e),
                    None,
                )),
            }
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(self.instructions.clone()),
        }
    }
}

/// Serve the router as an MCP streamable-HTTP server at `/mcp` on `bind`,
/// e.g. `127.0.0.1:3920` or `0.0.0.0:3920`.
pub async fn start_mcp_http(server: Arc<RouterServer>, bind: &str) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let server = server.clone();
            move || Ok(server.as_ref().clone())
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("MCP router HTTP server listening on http://{}/mcp", bind);

    axum::serve(listener, router).await?;

    Ok(())
}
