//! Handler for the `router.get_tool_schema` tool.
//!
//! Returns the cached descriptor (input/output schemas included) for one
//! qualified tool id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::engine::RoutingEngine;
use crate::tools::{ToolContext, ToolHandler, error_result, invalid_args, json_result};

pub struct GetToolSchemaHandler {
    engine: Arc<RoutingEngine>,
}

impl GetToolSchemaHandler {
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
                "description": "Qualified tool id to fetch the schema for (e.g. 'files:read_file')."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["tool"]));
        schema
    }
}

impl ToolHandler for GetToolSchemaHandler {
    fn name(&self) -> &str {
        "router.get_tool_schema"
    }

    fn title(&self) -> Option<&str> {
        Some("MCP Router: Get Tool Schema")
    }

    fn description(&self) -> &str {
        "Fetch the input/output schema of a routed tool by its qualified id. Call this before \
         router.execute_tool to avoid malformed requests."
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
            let Some(tool_id) = args.get("tool").and_then(|v| v.as_str()) else {
                return Ok(invalid_args(
                    "router.get_tool_schema requires a `tool` string",
                ));
            };

            match engine.tool_schema(tool_id).await {
                Ok(descriptor) => Ok(json_result(json!({
                    "status": "ok",
                    "tool": descriptor,
                }))),
                Err(e) => Ok(error_result(&e)),
            }
        })
    }
}
