//! Router configuration loading.
//!
//! The on-disk format is a JSON document with a `mcpServers` list. Each entry
//! names one upstream server and carries either a stdio startup block
//! (`command`/`args`/`env`) or an HTTP endpoint (`host`/`port`). Raw entries
//! are validated into `ServerSpec` values before the engine sees them.

use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::Path, time::Duration};

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Deserialize)]
pub struct RouterJsonConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: Vec<RawServerEntry>,

    #[serde(default)]
    pub router: RawRouterOptions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawServerEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Per-server request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    pub startup: RawStartup,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawStartup {
    // stdio server
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    // http server
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawRouterOptions {
    /// Fail startup if any configured server cannot be queried.
    #[serde(default, rename = "requireAllServers")]
    pub require_all_servers: bool,

    /// Evict terminal background tasks older than this many seconds.
    /// Absent means tasks are retained for the life of the process.
    #[serde(default, rename = "taskRetentionSecs")]
    pub task_retention_secs: Option<u64>,
}

/// Validated description of one upstream server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub description: String,
    pub timeout: Duration,
    pub transport: TransportSpec,
}

/// How to reach an upstream server.
#[derive(Debug, Clone)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Http {
        host: String,
        port: u16,
    },
}

impl TransportSpec {
    /// MCP streamable-HTTP endpoint for an HTTP upstream.
    pub fn endpoint(&self) -> Option<String> {
        match self {
            Self::Http { host, port } => Some(format!("http://{}:{}/mcp", host, port)),
            Self::Stdio { .. } => None,
        }
    }
}

impl ServerSpec {
    pub fn from_raw(entry: RawServerEntry) -> anyhow::Result<Self> {
        if entry.name.is_empty() {
            return Err(anyhow::anyhow!("Server entry is missing a name"));
        }

        let timeout_secs = entry.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(anyhow::anyhow!(
                "Server `{}` has non-positive timeout {}",
                entry.name,
                timeout_secs
            ));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs).map_err(|_| {
            anyhow::anyhow!(
                "Server `{}` has out-of-range timeout {}",
                entry.name,
                timeout_secs
            )
        })?;

        let startup = entry.startup;
        let transport = if let Some(command) = startup.command {
            TransportSpec::Stdio {
                command,
                args: startup.args,
                env: startup.env,
            }
        } else if let (Some(host), Some(port)) = (startup.host, startup.port) {
            TransportSpec::Http { host, port }
        } else {
            return Err(anyhow::anyhow!(
                "Server `{}` must have either `command` or `host`+`port` in its startup block",
                entry.name
            ));
        };

        Ok(Self {
            name: entry.name,
            description: entry.description,
            timeout,
            transport,
        })
    }
}

/// Router-level options validated from the raw config.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub require_all_servers: bool,
    pub task_retention: Option<Duration>,
}

impl RouterOptions {
    fn from_raw(raw: RawRouterOptions) -> Self {
        Self {
            require_all_servers: raw.require_all_servers,
            task_retention: raw.task_retention_secs.map(Duration::from_secs),
        }
    }
}

/// Fully loaded router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub servers: Vec<ServerSpec>,
    pub options: RouterOptions,
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_entry(entry: RawServerEntry) -> RawServerEntry {
    let mut entry = entry;

    if let Some(cmd) = entry.startup.command.as_mut() {
        *cmd = expand_env_vars(cmd);
    }
    entry.startup.args = entry
        .startup
        .args
        .into_iter()
        .map(|a| expand_env_vars(&a))
        .collect();
    for val in entry.startup.env.values_mut() {
        *val = expand_env_vars(val);
    }
    if let Some(host) = entry.startup.host.as_mut() {
        *host = expand_env_vars(host);
    }

    entry
}

/// Load and validate the router configuration from a JSON file.
pub fn load_config(path: &Path) -> anyhow::Result<RouterConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Could not read config `{}`: {}", path.display(), e))?;
    let cfg: RouterJsonConfig = serde_json::from_str(&raw)?;

    let mut servers = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for entry in cfg.mcp_servers {
        let expanded = expand_entry(entry);
        let spec = ServerSpec::from_raw(expanded)?;
        if !seen.insert(spec.name.clone()) {
            return Err(anyhow::anyhow!("Duplicate server name `{}`", spec.name));
        }
        servers.push(spec);
    }

    Ok(RouterConfig {
        servers,
        options: RouterOptions::from_raw(cfg.router),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_stdio_and_http_servers() {
        let file = write_config(
            r#"{
                "mcpServers": [
                    {
                        "name": "files",
                        "description": "filesystem tools",
                        "timeout": 10,
                        "startup": {"command": "mcp-files", "args": ["--root", "/tmp"]}
                    },
                    {
                        "name": "search",
                        "startup": {"host": "localhost", "port": 9200}
                    }
                ]
            }"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.servers.len(), 2);

        let files = &config.servers[0];
        assert_eq!(files.name, "files");
        assert_eq!(files.timeout, Duration::from_secs(10));
        assert!(matches!(files.transport, TransportSpec::Stdio { .. }));

        let search = &config.servers[1];
        assert_eq!(search.timeout, Duration::from_secs(30));
        assert_eq!(
            search.transport.endpoint().as_deref(),
            Some("http://localhost:9200/mcp")
        );
    }

    #[test]
    fn test_startup_without_command_or_host_is_rejected() {
        let file = write_config(r#"{"mcpServers": [{"name": "broken", "startup": {}}]}"#);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_out_of_range_timeout_is_rejected() {
        let file = write_config(
            r#"{
                "mcpServers": [
                    {"name": "slow", "timeout": 1e300, "startup": {"command": "x"}}
                ]
            }"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("slow"));

        let file = write_config(
            r#"{
                "mcpServers": [
                    {"name": "slow", "timeout": -5, "startup": {"command": "x"}}
                ]
            }"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_duplicate_server_names_are_rejected() {
        let file = write_config(
            r#"{
                "mcpServers": [
                    {"name": "a", "startup": {"command": "x"}},
                    {"name": "a", "startup": {"command": "y"}}
                ]
            }"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_router_options() {
        let file = write_config(
            r#"{
                "mcpServers": [],
                "router": {"requireAllServers": true, "taskRetentionSecs": 600}
            }"#,
        );
        let config = load_config(file.path()).unwrap();
        assert!(config.options.require_all_servers);
        assert_eq!(config.options.task_retention, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_env_var_expansion() {
        unsafe { env::set_var("MCP_ROUTER_TEST_ROOT", "/srv/data") };
        let file = write_config(
            r#"{
                "mcpServers": [
                    {
                        "name": "files",
                        "startup": {
                            "command": "mcp-files",
                            "args": ["--root", "${MCP_ROUTER_TEST_ROOT}"],
                            "env": {"UNSET": "${MCP_ROUTER_TEST_UNSET}"}
                        }
                    }
                ]
            }"#,
        );

        let config = load_config(file.path()).unwrap();
        match &config.servers[0].transport {
            TransportSpec::Stdio { args, env, .. } => {
                assert_eq!(args[1], "/srv/data");
                // Unset variables are left as-is rather than erased.
                assert_eq!(env["UNSET"], "${MCP_ROUTER_TEST_UNSET}");
            }
            TransportSpec::Http { .. } => panic!("expected stdio transport"),
        }
    }
}
