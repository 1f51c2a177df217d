//! Handler for the `router.list_tools` tool.
//!
//! Lists the qualified ids of every routed tool, optionally filtered to one
//! upstream server, along with any degraded servers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::engine::RoutingEngine;
use crate::tools::{ToolContext, ToolHandler, error_result, json_result};

pub struct ListToolsHandler {
    engine: Arc<RoutingEngine>,
}

impl ListToolsHandler {
    pub fn new(engine: Arc<RoutingEngine>) -> Self {
        Self { engine }
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "server".to_string(),
            json!({
                "type": "string",
                "description": "Optional server name; omit to list tools from every server."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema
    }
}

impl ToolHandler for ListToolsHandler {
    fn name(&self) -> &str {
        "router.list_tools"
    }

    fn title(&self) -> Option<&str> {
        Some("MCP Router: List Tools")
    }

    fn description(&self) -> &str {
        "List the qualified tool ids available through the router, optionally filtered by server. \
         Do not guess argument shapes from tool names; call router.get_tool_schema before executing."
    }

    fn input_schema(&self) -> JsonObject {
        self.input_schema()
    }

    fn execute(
        &self,
        args: JsonObject,
        _ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let engine = self.engine.clone();

        Box::pin(async move {
            let server = args
                .get("server")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let registry = engine.registry().await;
            let descriptors = match registry.list(server.as_deref()) {
                Ok(descriptors) => descriptors,
                Err(e) => return Ok(error_result(&e)),
            };

            let tools: Vec<_> = descriptors
                .iter()
                .map(|d| {
                    json!({
                        "tool": d.qualified_id,
                        "server": d.server,
                        "description": d.description,
                    })
                })
                .collect();

            let degraded: Vec<_> = registry
                .degraded()
                .iter()
                .map(|(server, reason)| json!({"server": server, "reason": reason}))
                .collect();

            Ok(json_result(json!({
                "status": "ok",
                "tools": tools,
                "degraded_servers": degraded,
            })))
        })
    }
}
