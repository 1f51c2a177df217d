//! Unified tool registry across upstream servers.
//!
//! Tool names are only unique per server, so every registered tool gets a
//! qualified id `server:tool`. The registry is built once from the catalogs
//! fetched at startup and never mutated; reconfiguration builds a fresh
//! registry that the engine swaps in wholesale.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool as McpTool};
use serde::Serialize;
use tracing::warn;

use crate::error::RouterError;
use crate::upstream::UpstreamConnection;

/// Separator between server name and raw tool name in a qualified id.
pub const QUALIFIER: char = ':';

/// Qualified id for a tool owned by `server`.
pub fn qualify(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, QUALIFIER, tool)
}

/// Immutable description of one registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub qualified_id: String,
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: JsonObject,
    pub output_schema: Option<JsonObject>,
}

impl ToolDescriptor {
    fn from_mcp(server: &str, tool: &McpTool) -> Self {
        Self {
            qualified_id: qualify(server, &tool.name),
            server: server.to_string(),
            name: tool.name.to_string(),
            description: tool.description.as_ref().map(|d| d.to_string()),
            input_schema: (*tool.input_schema).clone(),
            output_schema: tool.output_schema.as_ref().map(|s| (**s).clone()),
        }
    }
}

/// The tool catalog one connection reported during the build.
pub struct ServerCatalog {
    pub connection: Arc<UpstreamConnection>,
    pub tools: Vec<McpTool>,
}

/// Registry entry: the descriptor plus the connection that owns the tool.
pub struct RegisteredTool {
    pub connection: Arc<UpstreamConnection>,
    pub descriptor: ToolDescriptor,
}

/// Immutable mapping from qualified tool id to owning connection and schema.
pub struct ToolRegistry {
    /// BTreeMap keeps `list` output in stable qualified-id order.
    tools: BTreeMap<String, RegisteredTool>,
    /// Raw tool name -> qualified id of the first server that registered it.
    /// Best-effort convenience only; qualified ids are the real keys.
    aliases: HashMap<String, String>,
    /// Server name -> number of tools it registered.
    servers: BTreeMap<String, usize>,
    /// Servers that could not be queried, with the failure message.
    degraded: Vec<(String, String)>,
}

impl ToolRegistry {
    /// Assemble a registry from per-server catalogs and the list of servers
    /// that failed to respond. The build is partial across servers: failures
    /// degrade those servers rather than aborting, unless `require_all` is
    /// set, in which case any failure is a `RegistryBuild` error.
    pub fn from_catalogs(
        catalogs: Vec<ServerCatalog>,
        failures: Vec<(String, String)>,
        require_all: bool,
    ) -> Result<Self, RouterError> {
        if require_all && !failures.is_empty() {
            return Err(RouterError::RegistryBuild(failures));
        }

        let mut tools: BTreeMap<String, RegisteredTool> = BTreeMap::new();
        let mut aliases: HashMap<String, String> = HashMap::new();
        let mut servers: BTreeMap<String, usize> = BTreeMap::new();

        for catalog in catalogs {
            let server = catalog.connection.name().to_string();
            let count = servers.entry(server.clone()).or_insert(0);

            for tool in &catalog.tools {
                let descriptor = ToolDescriptor::from_mcp(&server, tool);
                let qualified_id = descriptor.qualified_id.clone();

                if tools.contains_key(&qualified_id) {
                    warn!(
                        "Server `{}` listed tool `{}` more than once; keeping the last definition",
                        server, tool.name
                    );
                } else {
                    *count += 1;
                }

                match aliases.entry(tool.name.to_string()) {
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(qualified_id.clone());
                    }
                    std::collections::hash_map::Entry::Occupied(existing) => {
                        if existing.get() != &qualified_id {
                            warn!(
                                "Raw tool name `{}` collides across servers; alias stays with `{}`",
                                tool.name,
                                existing.get()
                            );
                        }
                    }
                }

                tools.insert(
                    qualified_id,
                    RegisteredTool {
                        connection: catalog.connection.clone(),
                        descriptor,
                    },
                );
            }
        }

        for (server, message) in &failures {
            warn!("Server `{}` is degraded: {}", server, message);
        }

        Ok(Self {
            tools,
            aliases,
            servers,
            degraded: failures,
        })
    }

    /// An empty registry, used before the first build completes.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
            aliases: HashMap::new(),
            servers: BTreeMap::new(),
            degraded: Vec::new(),
        }
    }

    /// Resolve a qualified tool id (or, as a fallback, a bare raw name via
    /// the first-wins alias map) to its registry entry.
    pub fn resolve(&self, tool_id: &str) -> Result<&RegisteredTool, RouterError> {
        if let Some(entry) = self.tools.get(tool_id) {
            return Ok(entry);
        }
        if let Some(qualified) = self.aliases.get(tool_id) {
            if let Some(entry) = self.tools.get(qualified) {
                return Ok(entry);
            }
        }
        Err(RouterError::UnknownTool(tool_id.to_string()))
    }

    /// Cached descriptor for a qualified tool id.
    pub fn schema(&self, tool_id: &str) -> Result<&ToolDescriptor, RouterError> {
        self.resolve(tool_id).map(|entry| &entry.descriptor)
    }

    /// Descriptors for one server's tools, or for every server when `server`
    /// is omitted. Ordered by qualified id.
    pub fn list(&self, server: Option<&str>) -> Result<Vec<&ToolDescriptor>, RouterError> {
        match server {
            None => Ok(self.tools.values().map(|t| &t.descriptor).collect()),
            Some(name) => {
                if !self.servers.contains_key(name)
                    && !self.degraded.iter().any(|(s, _)| s == name)
                {
                    return Err(RouterError::UnknownServer(name.to_string()));
                }
                Ok(self
                    .tools
                    .values()
                    .map(|t| &t.descriptor)
                    .filter(|d| d.server == name)
                    .collect())
            }
        }
    }

    /// Registered server names with their tool counts.
    pub fn servers(&self) -> impl Iterator<Item = (&str, usize)> {
        self.servers
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
    }

    /// Servers that failed to respond during the build.
    pub fn degraded(&self) -> &[(String, String)] {
        &self.degraded
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerSpec, TransportSpec};
    use std::borrow::Cow;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn connection(name: &str) -> Arc<UpstreamConnection> {
        Arc::new(UpstreamConnection::new(ServerSpec {
            name: name.to_string(),
            description: String::new(),
            timeout: Duration::from_secs(5),
            transport: TransportSpec::Stdio {
                command: "unused".to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        }))
    }

    fn mcp_tool(name: &str, description: &str) -> McpTool {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), serde_json::json!("object"));

        McpTool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: Some(Cow::Owned(description.to_string())),
            input_schema: Arc::new(schema),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }

    fn two_server_registry() -> ToolRegistry {
        let catalogs = vec![
            ServerCatalog {
                connection: connection("alpha"),
                tools: vec![mcp_tool("add", "adds numbers"), mcp_tool("sub", "subtracts")],
            },
            ServerCatalog {
                connection: connection("beta"),
                tools: vec![mcp_tool("add", "concatenates")],
            },
        ];
        ToolRegistry::from_catalogs(catalogs, Vec::new(), false).unwrap()
    }

    #[test]
    fn test_same_raw_name_gets_distinct_qualified_ids() {
        let registry = two_server_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.resolve("alpha:add").is_ok());
        assert!(registry.resolve("beta:add").is_ok());

        let alpha = registry.schema("alpha:add").unwrap();
        let beta = registry.schema("beta:add").unwrap();
        assert_eq!(alpha.server, "alpha");
        assert_eq!(beta.server, "beta");
        assert_ne!(alpha.description, beta.description);
    }

    #[test]
    fn test_alias_goes_to_first_registered_server() {
        let registry = two_server_registry();
        let entry = registry.resolve("add").unwrap();
        assert_eq!(entry.descriptor.qualified_id, "alpha:add");
    }

    #[test]
    fn test_unknown_tool() {
        let registry = two_server_registry();
        let err = registry.resolve("alpha:multiply").err().unwrap();
        assert_eq!(err.kind(), "unknown_tool");
    }

    #[test]
    fn test_list_all_is_ordered_and_complete() {
        let registry = two_server_registry();
        let ids: Vec<&str> = registry
            .list(None)
            .unwrap()
            .iter()
            .map(|d| d.qualified_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alpha:add", "alpha:sub", "beta:add"]);
    }

    #[test]
    fn test_list_by_server_and_unknown_server() {
        let registry = two_server_registry();
        let beta = registry.list(Some("beta")).unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].qualified_id, "beta:add");

        let err = registry.list(Some("gamma")).unwrap_err();
        assert_eq!(err.kind(), "unknown_server");
    }

    #[test]
    fn test_every_listed_tool_resolves_to_consistent_schema() {
        let registry = two_server_registry();
        for descriptor in registry.list(None).unwrap() {
            let schema = registry.schema(&descriptor.qualified_id).unwrap();
            assert_eq!(schema.qualified_id, descriptor.qualified_id);
            assert_eq!(schema.server, descriptor.server);
        }
    }

    #[test]
    fn test_degraded_server_is_reported_not_fatal() {
        let catalogs = vec![ServerCatalog {
            connection: connection("alpha"),
            tools: vec![mcp_tool("add", "adds numbers")],
        }];
        let failures = vec![("beta".to_string(), "connection refused".to_string())];

        let registry = ToolRegistry::from_catalogs(catalogs, failures, false).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.degraded().len(), 1);
        // A degraded server is still a known name; it just has no tools.
        assert!(registry.list(Some("beta")).unwrap().is_empty());
    }

    #[test]
    fn test_require_all_turns_failures_into_build_error() {
        let failures = vec![("beta".to_string(), "connection refused".to_string())];
        let err = ToolRegistry::from_catalogs(Vec::new(), failures, true)
            .err()
            .unwrap();
        assert_eq!(err.kind(), "registry_build_error");
    }
}
