//! Upstream MCP connections backed by rmcp.
//!
//! Each configured server gets one `UpstreamConnection` that owns the live
//! rmcp client session (a spawned child process for stdio servers, a
//! streamable-HTTP client for network servers). The protocol does not promise
//! multiplexing, so requests are serialized: one in-flight call per
//! connection, later callers queue on the client mutex in submission order.

use std::borrow::Cow;
use std::time::Duration;

use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, Content, JsonObject, Tool as McpTool},
    service::{RoleClient, RunningService},
    transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess},
};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ServerSpec, TransportSpec};
use crate::error::RouterError;

/// Lifecycle of one upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

/// One live session to one upstream MCP server.
pub struct UpstreamConnection {
    spec: ServerSpec,
    state: RwLock<ConnectionState>,
    /// Single-in-flight discipline: the rmcp client is only reachable
    /// through this mutex, so concurrent callers queue in submission order.
    client: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl UpstreamConnection {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: RwLock::new(ConnectionState::Disconnected),
            client: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Establish the transport and run the MCP initialize handshake, bounded
    /// by the spec's timeout. A connection that fails here moves to `Failed`
    /// and every subsequent call fails fast until `reconnect`.
    pub async fn connect(&self) -> Result<(), RouterError> {
        self.set_state(ConnectionState::Connecting).await;

        let established = tokio::time::timeout(self.spec.timeout, self.establish()).await;
        match established {
            Ok(Ok(client)) => {
                *self.client.lock().await = Some(client);
                self.set_state(ConnectionState::Ready).await;
                info!("Connected to MCP server `{}`", self.spec.name);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Failed).await;
                Err(RouterError::Connection {
                    server: self.spec.name.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed).await;
                Err(RouterError::Connection {
                    server: self.spec.name.clone(),
                    message: format!(
                        "connect timed out after {}s",
                        self.spec.timeout.as_secs_f64()
                    ),
                })
            }
        }
    }

    async fn establish(&self) -> anyhow::Result<RunningService<RoleClient, ()>> {
        match &self.spec.transport {
            TransportSpec::Stdio { command, args, env } => {
                debug!(
                    "Spawning stdio MCP server `{}`: {} {:?}",
                    self.spec.name, command, args
                );

                let mut cmd = Command::new(command);
                if !args.is_empty() {
                    cmd.args(args.iter().cloned());
                }
                if !env.is_empty() {
                    cmd.envs(env.iter().map(|(k, v)| (k, v)));
                }

                let child = TokioChildProcess::new(cmd.configure(|_cmd| {
                    // extra configuration if needed
                }))?;

                Ok(().serve(child).await?)
            }
            TransportSpec::Http { .. } => {
                // endpoint() is Some for every Http transport
                let endpoint = self.spec.transport.endpoint().unwrap_or_default();
                debug!(
                    "Dialing HTTP MCP server `{}` at `{}`",
                    self.spec.name, endpoint
                );

                let transport = StreamableHttpClientTransport::from_uri(endpoint);
                Ok(().serve(transport).await?)
            }
        }
    }

    /// Tear down the session. Safe to call repeatedly.
    pub async fn close(&self) {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.cancel().await {
                debug!("Error while closing connection `{}`: {:?}", self.spec.name, e);
            }
        }
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Close and re-establish the session.
    pub async fn reconnect(&self) -> Result<(), RouterError> {
        self.close().await;
        self.connect().await
    }

    /// Fetch the server's tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, RouterError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(|| self.not_connected())?;

        let listed = tokio::time::timeout(self.spec.timeout, client.list_tools(Default::default()))
            .await
            .map_err(|_| RouterError::Timeout {
                server: self.spec.name.clone(),
                secs: self.spec.timeout.as_secs_f64(),
            })?;

        match listed {
            Ok(result) => {
                if result.tools.is_empty() {
                    warn!("Server `{}` reported no tools", self.spec.name);
                }
                Ok(result.tools)
            }
            Err(e) => Err(self.classify_service_error(e, &mut guard).await),
        }
    }

    /// Send one tool call and wait for the response or the effective
    /// deadline. A timeout leaves the connection usable; only transport-level
    /// failures mark it `Failed`.
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: JsonObject,
        timeout: Option<Duration>,
    ) -> Result<Vec<Content>, RouterError> {
        let effective = timeout.unwrap_or(self.spec.timeout);

        let mut guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(|| self.not_connected())?;

        let request = CallToolRequestParams {
            meta: None,
            name: Cow::from(tool_name.to_string()),
            arguments: Some(args),
            task: None,
        };

        let called = tokio::time::timeout(effective, client.call_tool(request))
            .await
            .map_err(|_| RouterError::Timeout {
                server: self.spec.name.clone(),
                secs: effective.as_secs_f64(),
            })?;

        let result = match called {
            Ok(result) => result,
            Err(e) => return Err(self.classify_service_error(e, &mut guard).await),
        };

        if result.is_error.unwrap_or(false) {
            return Err(RouterError::Upstream {
                server: self.spec.name.clone(),
                message: content_summary(&result.content),
            });
        }

        Ok(result.content)
    }

    fn not_connected(&self) -> RouterError {
        RouterError::Connection {
            server: self.spec.name.clone(),
            message: "not connected".to_string(),
        }
    }

    /// Map an rmcp service error into the router taxonomy. An MCP-level error
    /// response is the tool's own failure and a malformed response or rmcp
    /// request timeout leaves the connection usable; anything else means the
    /// transport is gone, so the client handle is dropped, the state moves to
    /// `Failed`, and the connection fails fast until reconnected.
    async fn classify_service_error(
        &self,
        error: rmcp::ServiceError,
        guard: &mut Option<RunningService<RoleClient, ()>>,
    ) -> RouterError {
        match error {
            rmcp::ServiceError::McpError(data) => RouterError::Upstream {
                server: self.spec.name.clone(),
                message: data.message.to_string(),
            },
            rmcp::ServiceError::UnexpectedResponse => RouterError::Protocol {
                server: self.spec.name.clone(),
                message: "unexpected response type".to_string(),
            },
            rmcp::ServiceError::Timeout { timeout } => RouterError::Timeout {
                server: self.spec.name.clone(),
                secs: timeout.as_secs_f64(),
            },
            other => {
                warn!(
                    "Transport failure on connection `{}`: {}",
                    self.spec.name, other
                );
                *guard = None;
                self.set_state(ConnectionState::Failed).await;
                RouterError::Connection {
                    server: self.spec.name.clone(),
                    message: other.to_string(),
                }
            }
        }
    }

    /// Test hook: take the client mutex so a concurrent invocation queues
    /// behind a held connection.
    #[cfg(test)]
    pub(crate) async fn lock_client(
        &self,
    ) -> tokio::sync::MutexGuard<'_, Option<RunningService<RoleClient, ()>>> {
        self.client.lock().await
    }
}

/// Flatten tool output content into a short human-readable summary, used when
/// an upstream reports a tool-level failure.
fn content_summary(content: &[Content]) -> String {
    if content.is_empty() {
        return "tool reported an error with no content".to_string();
    }
    serde_json::to_string(content).unwrap_or_else(|_| "unserializable tool output".to_string())
}
