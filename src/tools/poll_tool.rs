//! Handler for the `router.poll_tool_result` tool.
//!
//! Reads the current state of a background task. Completed tasks return the
//! stored upstream payload verbatim; polling is idempotent, so the same
//! terminal result comes back on every subsequent poll.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::engine::RoutingEngine;
use crate::tasks::TaskState;
use crate::tools::{ToolContext, ToolHandler, error_result, invalid_args, json_result};

pub struct PollToolResultHandler {
    engine: Arc<RoutingEngine>,
}

impl PollToolResultHandler {
    pub fn new(engine: Arc<RoutingEngine>) -> Self {
        Self { engine }
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "task_id".to_string(),
            json!({
                "type": "string",
                "description": "Task id returned by router.spawn_tool_in_background."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["task_id"]));
        schema
    }
}

impl ToolHandler for PollToolResultHandler {
    fn name(&self) -> &str {
        "router.poll_tool_result"
    }

    fn title(&self) -> Option<&str> {
        Some("MCP Router: Poll Tool Result")
    }

    fn description(&self) -> &str {
        "Check a background task's state and fetch its result once it has completed. Safe to call \
         repeatedly; terminal results never change."
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
            let Some(task_id) = args.get("task_id").and_then(|v| v.as_str()) else {
                return Ok(invalid_args(
                    "router.poll_tool_result requires a `task_id` string",
                ));
            };

            let snapshot = match engine.poll_task(task_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => return Ok(error_result(&e)),
            };

            if snapshot.state == TaskState::Completed {
                return Ok(CallToolResult {
                    content: snapshot.result.unwrap_or_default(),
                    structured_content: None,
                    is_error: Some(false),
                    meta: None,
                });
            }

            Ok(json_result(json!({
                "status": "ok",
                "task_id": snapshot.task_id.to_string(),
                "tool": snapshot.tool_id,
                "state": snapshot.state.as_str(),
                "error_kind": snapshot.error_kind,
                "error": snapshot.error,
            })))
        })
    }
}
