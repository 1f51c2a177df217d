//! Handler for the `router.spawn_tool_in_background` tool.
//!
//! Fire-and-poll execution: resolves the tool, registers a background task,
//! and returns the task id without waiting for the invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::engine::RoutingEngine;
use crate::tools::{ToolContext, ToolHandler, error_result, invalid_args, json_result, timeout_override};

pub struct SpawnToolHandler {
    engine: Arc<RoutingEngine>,
}

impl SpawnToolHandler {
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
                "description": "Qualified tool id to run in the background (e.g. 'files:index_tree')."
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
                "description": "Optional deadline override in seconds; the task times out once it elapses."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["tool"]));
        schema
    }
}

impl ToolHandler for SpawnToolHandler {
    fn name(&self) -> &str {
        "router.spawn_tool_in_background"
    }

    fn title(&self) -> Option<&str> {
        Some("MCP Router: Spawn Tool In Background")
    }

    fn description(&self) -> &str {
        "Start a routed tool in the background and return a task id immediately. Retrieve the \
         result later with router.poll_tool_result."
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
                return Ok(invalid_args(
                    "router.spawn_tool_in_background requires a `tool` string",
                ));
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

            match engine.spawn_tool(&tool_id, tool_args, timeout).await {
                Ok(task_id) => Ok(json_result(json!({
                    "status": "ok",
                    "task_id": task_id.to_string(),
                    "state": "PENDING",
                    "note": "Poll with router.poll_tool_result using this task_id.",
                }))),
                Err(e) => Ok(error_result(&e)),
            }
        })
    }
}
