use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use mcp_router::{create_server, load_config};

// rmcp imports for MCP stdio server mode
use rmcp::service::ServiceExt;
use rmcp::transport::stdio;

#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(about = "Routing front-end for multiple MCP tool servers")]
struct Cli {
    /// Path to the router configuration file.
    #[arg(short, long, env = "MCP_ROUTER_CONFIG", default_value = "mcp-router.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in a client's mcp.json)
    Stdio,
    /// Run as an MCP streamable-HTTP server
    Http {
        /// Bind address, e.g. 0.0.0.0:3920
        #[arg(long, default_value = "127.0.0.1:3920")]
        bind: String,
    },
    /// Connect to the configured servers and print the unified tool catalog
    ListTools {
        /// Restrict to one server's tools
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mcp_router=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Stdio => {
            info!(
                "Starting MCP router stdio server with {} configured servers",
                config.servers.len()
            );

            let server = create_server(config).await?;

            // Run as an MCP stdio server. RouterServer implements ServerHandler.
            let service = server
                .as_ref()
                .clone()
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

            // Block until the MCP session ends.
            service.waiting().await?;
            info!("MCP stdio session ended");

            server.engine().shutdown().await;
        }
        Commands::Http { bind } => {
            info!(
                "Starting MCP router HTTP server on {} with {} configured servers",
                bind,
                config.servers.len()
            );

            let server = create_server(config).await?;
            mcp_router::server::start_mcp_http(server, &bind).await?;
        }
        Commands::ListTools { server } => {
            let router = create_server(config).await?;
            let engine = router.engine();

            let tools = engine.list_tools(server.as_deref()).await?;
            println!("{} tools routed:", tools.len());
            for tool in &tools {
                match &tool.description {
                    Some(description) => println!("  {} - {}", tool.qualified_id, description),
                    None => println!("  {}", tool.qualified_id),
                }
            }

            let registry = engine.registry().await;
            for (name, reason) in registry.degraded() {
                println!("  (degraded) {}: {}", name, reason);
            }

            engine.shutdown().await;
        }
    }

    Ok(())
}
