//! Handler for the `router.execute_tool` tool.
//!
//! Synchronous execution: resolves the qualified id, invokes the owning
//! upstream connection, and returns the upstream payload verbatim.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::engine::RoutingEngine;
use crate::tools::{ToolContext, ToolHandler, error_result, invalid_args, timeout_override};

pub struct ExecuteToolHandler {
    engine: Arc<RoutingEngine>,
}

impl ExecuteToolHandler {
    pub fn new(engine: Arc<RoutingEngine>) -> Self {
        Self { engine }
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "tool".to_string(),
            json!({
                "type": "string",
                "description": "Qualified tool id to execute (e.g. 'files:read_file')."
            }),
        );
        properties.insert(
            "args".to_string(),
            json!({
                "type": "object",
                "description": "Arguments for the underlying tool, shaped by its input schema.",
                "additionalProperties": true
            }),
        );
        properties.insert(
            "timeout_secs".to_string(),
            json!({
                "type": "number",
                "description": "Optional per-call timeout override in seconds; defaults to the server's configured timeout."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["tool"]));
        schema
    }
}

impl ToolHandler for ExecuteToolHandler {
    fn name(&self) -> &str {
        "router.execute_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("MCP Router: Execute Tool")
    }

    fn description(&self) -> &str {
        "Execute a routed tool synchronously by its qualified id and return its result. For \
         long-running tools prefer router.spawn_tool_in_background."
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
            let Some(tool_id) = args.get("tool").and_then(|v| v.as_str()).map(String::from) else {
                return Ok(invalid_args("router.execute_tool requires a `tool` string"));
            };

            let tool_args: JsonObject = args
                .get("args")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let timeout = match timeout_override(&args) {
                Ok(timeout) => timeout,
                Err(message) => return Ok(invalid_args(&message)),
            };

            match engine.execute_tool(&tool_id, tool_args, timeout).await {
                Ok(content) => Ok(CallToolResult {
                    content,
                    structured_content: None,
                    is_error: Some(false),
                    meta: None,
                }),
                Err(e) => Ok(error_result(&e)),
            }
        })
    }
}
