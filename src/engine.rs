//! The routing engine: resolves qualified tool ids against the registry and
//! dispatches invocations to the owning upstream connection, inline or as a
//! background task.
//!
//! The engine exclusively owns the upstream connections. The registry lives
//! behind a `RwLock<Arc<_>>` so a rebuild swaps the whole mapping atomically
//! and readers always see a consistent snapshot.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{Content, JsonObject};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{RouterOptions, ServerSpec};
use crate::error::RouterError;
use crate::registry::{ServerCatalog, ToolDescriptor, ToolRegistry};
use crate::tasks::{TaskOutcome, TaskSnapshot, TaskTable};
use crate::upstream::{ConnectionState, UpstreamConnection};

/// Routing façade over the configured upstream connections.
pub struct RoutingEngine {
    /// Configuration order matters: the raw-name alias layer gives collisions
    /// to the first registered server.
    connections: Vec<Arc<UpstreamConnection>>,
    registry: RwLock<Arc<ToolRegistry>>,
    tasks: Arc<TaskTable>,
    options: RouterOptions,
}

impl RoutingEngine {
    /// Build an engine over the given server specs without connecting.
    pub fn new(servers: Vec<ServerSpec>, options: RouterOptions) -> Self {
        let connections = servers
            .into_iter()
            .map(|spec| Arc::new(UpstreamConnection::new(spec)))
            .collect();

        Self {
            connections,
            registry: RwLock::new(Arc::new(ToolRegistry::empty())),
            tasks: Arc::new(TaskTable::new()),
            options,
        }
    }

    /// Connect every configured server and build the initial registry.
    /// Individual server failures degrade that server rather than aborting,
    /// unless the options require all servers.
    pub async fn start(servers: Vec<ServerSpec>, options: RouterOptions) -> Result<Self, RouterError> {
        let engine = Self::new(servers, options);
        engine.rebuild_registry().await?;
        Ok(engine)
    }

    /// Query every connection's catalog and atomically replace the registry.
    /// Connections that are not `Ready` get one (re)connect attempt first.
    pub async fn rebuild_registry(&self) -> Result<(), RouterError> {
        let mut catalogs = Vec::new();
        let mut failures = Vec::new();

        for connection in &self.connections {
            if connection.state().await != ConnectionState::Ready {
                if let Err(e) = connection.connect().await {
                    error!("Failed to start MCP server `{}`: {}", connection.name(), e);
                    failures.push((connection.name().to_string(), e.to_string()));
                    continue;
                }
            }

            match connection.list_tools().await {
                Ok(tools) => {
                    info!(
                        "Server `{}` registered {} tools",
                        connection.name(),
                        tools.len()
                    );
                    catalogs.push(ServerCatalog {
                        connection: connection.clone(),
                        tools,
                    });
                }
                Err(e) => {
                    error!("Failed to list tools on `{}`: {}", connection.name(), e);
                    failures.push((connection.name().to_string(), e.to_string()));
                }
            }
        }

        let registry = ToolRegistry::from_catalogs(
            catalogs,
            failures,
            self.options.require_all_servers,
        )?;

        info!(
            "Registry built: {} tools across {} servers ({} degraded)",
            registry.len(),
            registry.servers().count(),
            registry.degraded().len()
        );

        *self.registry.write().await = Arc::new(registry);
        Ok(())
    }

    /// Current registry snapshot. Cheap to clone; stays consistent even if a
    /// rebuild replaces the registry mid-request.
    pub async fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.read().await.clone()
    }

    /// Tool descriptors for one server, or all servers if omitted.
    pub async fn list_tools(
        &self,
        server: Option<&str>,
    ) -> Result<Vec<ToolDescriptor>, RouterError> {
        let registry = self.registry().await;
        Ok(registry.list(server)?.into_iter().cloned().collect())
    }

    /// Cached descriptor (schemas included) for a qualified tool id.
    pub async fn tool_schema(&self, tool_id: &str) -> Result<ToolDescriptor, RouterError> {
        let registry = self.registry().await;
        registry.schema(tool_id).cloned()
    }

    /// Execute a tool synchronously on its owning connection and return the
    /// upstream payload. Transport, timeout, and upstream failures propagate
    /// verbatim as their distinct error categories.
    pub async fn execute_tool(
        &self,
        tool_id: &str,
        args: JsonObject,
        timeout: Option<Duration>,
    ) -> Result<Vec<Content>, RouterError> {
        let (connection, raw_name) = {
            let registry = self.registry().await;
            let entry = registry.resolve(tool_id)?;
            (entry.connection.clone(), entry.descriptor.name.clone())
        };

        connection.invoke(&raw_name, args, timeout).await
    }

    /// Spawn a background execution and return its task id immediately; the
    /// invocation runs on a dedicated worker task. The deadline is enforced
    /// here as well as in the upstream call, so a worker stuck queueing
    /// behind a busy connection still times out on schedule.
    pub async fn spawn_tool(
        &self,
        tool_id: &str,
        args: JsonObject,
        timeout: Option<Duration>,
    ) -> Result<Uuid, RouterError> {
        let (connection, raw_name, qualified_id) = {
            let registry = self.registry().await;
            let entry = registry.resolve(tool_id)?;
            (
                entry.connection.clone(),
                entry.descriptor.name.clone(),
                entry.descriptor.qualified_id.clone(),
            )
        };

        let effective = timeout.unwrap_or(connection.spec().timeout);
        let task_id = self.tasks.create(&qualified_id, effective).await;
        let tasks = self.tasks.clone();

        tokio::spawn(async move {
            tasks.mark_running(task_id).await;

            let invoked = tokio::time::timeout(
                effective,
                connection.invoke(&raw_name, args, Some(effective)),
            )
            .await;

            let outcome = match invoked {
                Ok(Ok(content)) => TaskOutcome::Completed(content),
                Ok(Err(RouterError::Timeout { secs, .. })) => TaskOutcome::TimedOut { secs },
                Ok(Err(err)) => {
                    warn!("Background task {} failed: {}", task_id, err);
                    TaskOutcome::Failed(err)
                }
                Err(_) => TaskOutcome::TimedOut {
                    secs: effective.as_secs_f64(),
                },
            };

            tasks.finish(task_id, outcome).await;
        });

        Ok(task_id)
    }

    /// Current state of a background task. Accepts the string form callers
    /// got back from spawn; an unparseable id is just an unknown task.
    pub async fn poll_task(&self, task_id: &str) -> Result<TaskSnapshot, RouterError> {
        let id = Uuid::parse_str(task_id)
            .map_err(|_| RouterError::UnknownTask(task_id.to_string()))?;
        self.tasks.poll(id).await
    }

    /// Tear down and re-establish one server's connection. The registry is
    /// not rebuilt automatically; call `rebuild_registry` to pick up catalog
    /// changes.
    pub async fn reconnect(&self, server: &str) -> Result<(), RouterError> {
        let connection = self
            .connections
            .iter()
            .find(|c| c.name() == server)
            .ok_or_else(|| RouterError::UnknownServer(server.to_string()))?;
        connection.reconnect().await
    }

    /// Close every upstream connection.
    pub async fn shutdown(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }

    pub fn tasks(&self) -> &Arc<TaskTable> {
        &self.tasks
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Human-readable summary of the configured servers for the router's own
    /// MCP `instructions` string.
    pub async fn describe_servers(&self) -> String {
        let registry = self.registry().await;
        let mut lines = Vec::new();

        for connection in &self.connections {
            let spec = connection.spec();
            let count = registry
                .servers()
                .find(|(name, _)| *name == spec.name)
                .map(|(_, count)| count);

            let line = match count {
                Some(count) => format!("- {}: {} ({} tools)", spec.name, spec.description, count),
                None => format!("- {}: {} (unavailable)", spec.name, spec.description),
            };
            lines.push(line);
        }

        lines.join("\n")
    }

    #[cfg(test)]
    pub(crate) async fn install_registry(&self, registry: ToolRegistry) {
        *self.registry.write().await = Arc::new(registry);
    }
}

/// Periodically evict terminal tasks older than the configured retention.
/// No-op (never spawned) when retention is unset.
pub fn spawn_retention_sweeper(engine: Arc<RoutingEngine>, retention: Duration) {
    tokio::spawn(async move {
        let interval = retention.min(Duration::from_secs(60)).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(interval).await;
            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(retention)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
            let evicted = engine.tasks().evict_finished_before(cutoff).await;
            if evicted > 0 {
                info!("Evicted {} finished background tasks", evicted);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSpec;
    use crate::registry::ServerCatalog;
    use crate::tasks::TaskState;
    use rmcp::model::Tool as McpTool;
    use std::borrow::Cow;
    use std::collections::BTreeMap;

    fn spec(name: &str) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            description: "test server".to_string(),
            timeout: Duration::from_secs(1),
            transport: TransportSpec::Stdio {
                command: "/nonexistent/mcp-server".to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        }
    }

    fn mcp_tool(name: &str) -> McpTool {
        let mut schema = rmcp::model::JsonObject::new();
        schema.insert("type".to_string(), serde_json::json!("object"));
        McpTool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: None,
            input_schema: Arc::new(schema),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }

    /// Engine with one registered tool whose connection was never
    /// established, so invocations fail fast with a connection error.
    async fn engine_with_dead_tool() -> RoutingEngine {
        let engine = RoutingEngine::new(vec![spec("alpha")], RouterOptions::default());
        let connection = engine.connections[0].clone();
        let registry = ToolRegistry::from_catalogs(
            vec![ServerCatalog {
                connection,
                tools: vec![mcp_tool("add")],
            }],
            Vec::new(),
            false,
        )
        .unwrap();
        engine.install_registry(registry).await;
        engine
    }

    #[tokio::test]
    async fn test_empty_engine_has_empty_registry() {
        let engine = RoutingEngine::start(Vec::new(), RouterOptions::default())
            .await
            .unwrap();
        assert!(engine.list_tools(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades_instead_of_aborting() {
        let engine = RoutingEngine::start(vec![spec("alpha")], RouterOptions::default())
            .await
            .unwrap();
        let registry = engine.registry().await;
        assert_eq!(registry.degraded().len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_aborts_in_strict_mode() {
        let options = RouterOptions {
            require_all_servers: true,
            ..Default::default()
        };
        let err = RoutingEngine::start(vec![spec("alpha")], options)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "registry_build_error");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let engine = engine_with_dead_tool().await;
        let err = engine
            .execute_tool("alpha:multiply", rmcp::model::JsonObject::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_tool");
    }

    #[tokio::test]
    async fn test_execute_on_dead_connection_fails_fast() {
        let engine = engine_with_dead_tool().await;
        let err = engine
            .execute_tool("alpha:add", rmcp::model::JsonObject::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection_error");
    }

    #[tokio::test]
    async fn test_spawn_returns_task_id_before_completion() {
        let engine = engine_with_dead_tool().await;
        let task_id = engine
            .spawn_tool("alpha:add", rmcp::model::JsonObject::new(), None)
            .await
            .unwrap();

        // Spawn must not wait for the worker; the task exists immediately.
        let snapshot = engine.poll_task(&task_id.to_string()).await.unwrap();
        assert!(matches!(
            snapshot.state,
            TaskState::Pending | TaskState::Running | TaskState::Failed
        ));

        // The dead connection fails the task quickly.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = engine.poll_task(&task_id.to_string()).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.error_kind.as_deref(), Some("connection_error"));
    }

    #[tokio::test]
    async fn test_spawn_on_busy_connection_times_out_on_deadline() {
        let engine = engine_with_dead_tool().await;
        let connection = engine.connections[0].clone();

        // Hold the client mutex so the worker's invocation queues behind a
        // busy connection instead of failing fast.
        let busy = connection.lock_client().await;

        let task_id = engine
            .spawn_tool(
                "alpha:add",
                rmcp::model::JsonObject::new(),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = engine.poll_task(&task_id.to_string()).await.unwrap();
        assert_eq!(snapshot.state, TaskState::TimedOut);
        assert_eq!(snapshot.error_kind.as_deref(), Some("timeout_error"));

        // Releasing the connection must not let a late outcome overwrite the
        // terminal state.
        drop(busy);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let again = engine.poll_task(&task_id.to_string()).await.unwrap();
        assert_eq!(again.state, TaskState::TimedOut);
    }

    #[tokio::test]
    async fn test_spawn_unknown_tool_fails_without_creating_task() {
        let engine = engine_with_dead_tool().await;
        let err = engine
            .spawn_tool("alpha:multiply", rmcp::model::JsonObject::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_tool");
        assert_eq!(engine.tasks().len().await, 0);
    }

    #[tokio::test]
    async fn test_poll_with_garbage_id_is_unknown_task() {
        let engine = engine_with_dead_tool().await;
        let err = engine.poll_task("not-a-uuid").await.unwrap_err();
        assert_eq!(err.kind(), "unknown_task");

        let err = engine
            .poll_task(&Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_task");
    }

    #[tokio::test]
    async fn test_reconnect_unknown_server() {
        let engine = engine_with_dead_tool().await;
        let err = engine.reconnect("gamma").await.unwrap_err();
        assert_eq!(err.kind(), "unknown_server");
    }

    #[tokio::test]
    async fn test_describe_servers_mentions_unavailable() {
        let engine = RoutingEngine::new(vec![spec("alpha")], RouterOptions::default());
        let description = engine.describe_servers().await;
        assert!(description.contains("alpha"));
        assert!(description.contains("unavailable"));
    }
}
