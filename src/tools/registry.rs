//! Handler registry for the router's own MCP tools.
//!
//! Provides a `ToolHandler` trait for implementing the router actions and a
//! `HandlerRegistry` for registering and invoking them from the
//! `ServerHandler` implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use rmcp::RoleServer;
use rmcp::model::{CallToolResult, JsonObject, Tool as McpTool};
use rmcp::service::RequestContext;
use tracing::debug;

/// Context passed to tool handlers during execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Request context from rmcp (for session info, etc.)
    pub request_context: RequestContext<RoleServer>,
}

/// Trait for handling invocations of the router's MCP tools.
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's name (e.g., "router.execute_tool").
    fn name(&self) -> &str;

    /// Returns the tool's human-readable title.
    fn title(&self) -> Option<&str> {
        None
    }

    /// Returns the tool's description.
    fn description(&self) -> &str;

    /// Returns the input schema for this tool.
    fn input_schema(&self) -> JsonObject;

    /// Returns the output schema for this tool (optional).
    fn output_schema(&self) -> Option<JsonObject> {
        None
    }

    /// Executes the tool with the given arguments.
    fn execute(
        &self,
        args: JsonObject,
        ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + '_>>;

    /// Converts this handler to an `McpTool` for use in `list_tools`.
    fn to_mcp_tool(&self) -> McpTool {
        use std::borrow::Cow;

        McpTool {
            name: Cow::Owned(self.name().to_string()),
            title: self.title().map(|s| s.to_string()),
            description: Some(Cow::Owned(self.description().to_string())),
            input_schema: Arc::new(self.input_schema()),
            output_schema: self.output_schema().map(Arc::new),
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

/// Registry of the router's own tool handlers.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a tool handler.
    pub fn register_handler<T: ToolHandler + 'static>(mut self, handler: T) -> Self {
        self.handlers
            .insert(handler.name().to_string(), Arc::new(handler));
        self
    }

    /// Get a tool handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// All registered tools as `McpTool` instances for `list_tools`.
    pub fn list_tools(&self) -> Vec<McpTool> {
        let mut tools: Vec<McpTool> = self
            .handlers
            .values()
            .map(|handler| handler.to_mcp_tool())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Execute a tool by name with the given arguments.
    pub async fn call_tool(
        &self,
        name: &str,
        args: JsonObject,
        ctx: &ToolContext,
    ) -> Result<CallToolResult> {
        let handler = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Tool not found: {}", name))?;
        debug!(
            "Dispatching `{}` for request {}",
            name, ctx.request_context.id
        );
        handler.execute(args, ctx).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
