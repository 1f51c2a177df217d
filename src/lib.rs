// Core modules
mod config;
mod engine;
mod error;
mod registry;
mod tasks;
mod tools;
mod upstream;

pub mod server;

// Re-export key types and functions
pub use config::{RouterConfig, RouterOptions, ServerSpec, TransportSpec, load_config};
pub use engine::RoutingEngine;
pub use error::RouterError;
pub use registry::{ToolDescriptor, ToolRegistry, qualify};
pub use tasks::{TaskSnapshot, TaskState, TaskTable};
pub use tools::{HandlerRegistry, ToolContext, ToolHandler};
pub use upstream::{ConnectionState, UpstreamConnection};

use anyhow::Result;
use std::sync::Arc;
use tools::{
    ExecuteToolHandler, GetToolSchemaHandler, ListToolsHandler, PollToolResultHandler,
    SpawnToolHandler,
};

/// Convenience function to create a fully configured router server.
///
/// Connects the configured upstream servers, builds the tool registry,
/// registers the five router action handlers, and returns a `RouterServer`
/// that implements rmcp's `ServerHandler`.
pub async fn create_server(config: RouterConfig) -> Result<Arc<server::RouterServer>> {
    let engine = RoutingEngine::start(config.servers, config.options.clone()).await?;
    let engine = Arc::new(engine);

    if let Some(retention) = config.options.task_retention {
        engine::spawn_retention_sweeper(engine.clone(), retention);
    }

    let handlers = HandlerRegistry::new()
        .register_handler(ListToolsHandler::new(engine.clone()))
        .register_handler(GetToolSchemaHandler::new(engine.clone()))
        .register_handler(ExecuteToolHandler::new(engine.clone()))
        .register_handler(SpawnToolHandler::new(engine.clone()))
        .register_handler(PollToolResultHandler::new(engine.clone()));
    let handlers = Arc::new(handlers);

    let summary = engine.describe_servers().await;
    let server = server::RouterServer::new(engine, handlers, summary);

    Ok(Arc::new(server))
}
