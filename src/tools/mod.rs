//! The router's caller-facing MCP tools.
//!
//! Each of the five router actions is one `ToolHandler` registered in a
//! `HandlerRegistry`; the `ServerHandler` implementation in `server.rs`
//! dispatches inbound `tools/call` requests here.

mod registry;

pub use registry::{HandlerRegistry, ToolContext, ToolHandler};

// Router action handlers
mod execute_tool;
mod get_tool_schema;
mod list_tools;
mod poll_tool;
mod spawn_tool;

pub use execute_tool::ExecuteToolHandler;
pub use get_tool_schema::GetToolSchemaHandler;
pub use list_tools::ListToolsHandler;
pub use poll_tool::PollToolResultHandler;
pub use spawn_tool::SpawnToolHandler;

use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::json;
use std::time::Duration;

use crate::error::RouterError;

/// Successful JSON payload as a text content result.
pub(crate) fn json_result(value: serde_json::Value) -> CallToolResult {
    let text = serde_json::to_string(&value)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(false),
        meta: None,
    }
}

/// Router error as a structured error result. The `kind` tag lets callers
/// tell transport problems (retryable) from tool and input problems.
pub(crate) fn error_result(err: &RouterError) -> CallToolResult {
    let payload = json!({
        "status": "error",
        "kind": err.kind(),
        "retryable": err.is_retryable(),
        "reason": err.to_string(),
    });
    let text = serde_json::to_string(&payload)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

/// Malformed caller input (missing/mistyped argument).
pub(crate) fn invalid_args(message: &str) -> CallToolResult {
    let payload = json!({
        "status": "error",
        "kind": "invalid_arguments",
        "retryable": false,
        "reason": message,
    });
    let text = serde_json::to_string(&payload)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

/// Optional per-call timeout override from a `timeout_secs` argument.
/// The value is caller input, so anything not representable as a positive
/// finite duration is rejected rather than clamped.
pub(crate) fn timeout_override(args: &JsonObject) -> Result<Option<Duration>, String> {
    let Some(value) = args.get("timeout_secs") else {
        return Ok(None);
    };
    let secs = value
        .as_f64()
        .ok_or_else(|| "`timeout_secs` must be a number of seconds".to_string())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("`timeout_secs` must be a positive number, got {}", secs));
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| format!("`timeout_secs` {} is out of range", secs))
}
