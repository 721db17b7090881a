//! db2i-mcp launcher.
//!
//! Loads the YAML tools configuration, wires the server state, and runs
//! the selected transport with graceful shutdown on SIGINT/SIGTERM.

use anyhow::{bail, Context, Result};
use clap::Parser;
use db2i_auth::spawn_reaper;
use db2i_db::driver::Db2Driver;
use db2i_db::testing::MemoryDriver;
use db2i_logging::LogConfig;
use db2i_mcp::tools::{DESCRIBE_OBJECT_NAME, EXECUTE_SQL_NAME};
use db2i_mcp::AppState;
use db2i_protocol::{Environment, ServerConfig, TransportKind};
use db2i_tools::{load_tools, ToolsetManager};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "db2i-mcp", version, about = "MCP server for IBM i Db2")]
struct Cli {
    /// Tools configuration: a YAML file, a directory of YAML files, or
    /// a comma-separated list of paths (default: $TOOLS_YAML_PATH)
    #[arg(long)]
    tools: Option<String>,

    /// Transport to run (default: $MCP_TRANSPORT_TYPE, else stdio)
    #[arg(long, value_parser = ["stdio", "http"])]
    transport: Option<String>,

    /// Only expose tools belonging to these toolsets
    #[arg(long, value_delimiter = ',')]
    toolsets: Vec<String>,

    /// Print the toolset catalog and exit
    #[arg(long)]
    list_toolsets: bool,

    /// Verbose console logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    install_panic_hook();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("db2i-mcp: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ServerConfig::from_env().context("invalid environment configuration")?;
    if let Some(transport) = &cli.transport {
        config.transport = TransportKind::parse(transport)?;
    }

    let stdio_mode = config.transport == TransportKind::Stdio;
    init_logging(&cli, &config, stdio_mode)?;

    let tools_spec = cli
        .tools
        .clone()
        .or_else(|| config.tools_path.clone())
        .context("no tools configuration: pass --tools or set TOOLS_YAML_PATH")?;

    let mut global_tools = vec![DESCRIBE_OBJECT_NAME];
    if config.enable_execute_sql {
        global_tools.push(EXECUTE_SQL_NAME);
    }

    let env = db2i_tools::interpolate::env_snapshot();
    let parsing = load_tools(&tools_spec, &env, &global_tools)?.into_result()?;

    if cli.list_toolsets {
        print_toolsets(&ToolsetManager::new(
            &parsing.config,
            global_tools.iter().map(|s| s.to_string()).collect(),
        ));
        return Ok(());
    }

    let driver = build_driver(&config)?;
    let toolset_filter = if cli.toolsets.is_empty() {
        None
    } else {
        Some(cli.toolsets.clone())
    };
    let state = AppState::build(config, driver, parsing, toolset_filter)?;

    let reaper = spawn_reaper(Arc::clone(&state.tokens), Arc::clone(&state.auth_pools));

    let transport = state.config.transport;
    info!(transport = transport.as_str(), "starting");
    let result = match transport {
        TransportKind::Stdio => db2i_mcp::stdio::run(Arc::clone(&state), shutdown_signal()).await,
        TransportKind::Http => db2i_mcp::http::serve(Arc::clone(&state), shutdown_signal()).await,
    };

    reaper.abort();
    result.map_err(Into::into)
}

fn init_logging(cli: &Cli, config: &ServerConfig, stdio_mode: bool) -> Result<()> {
    let file_logging_required =
        stdio_mode || config.environment == Environment::Production;
    if file_logging_required && config.logs_path.is_none() {
        bail!("LOGS_PATH is required for stdio transport and production deployments");
    }
    db2i_logging::init_logging(LogConfig {
        app_name: "db2i-mcp",
        logs_path: config.logs_path.as_deref(),
        level: if cli.verbose {
            Some("debug")
        } else {
            config.log_level.as_deref()
        },
        stdio_mode,
    })
}

fn build_driver(config: &ServerConfig) -> Result<Arc<dyn Db2Driver>> {
    // The wire-level driver is an external collaborator; this build
    // links the in-memory driver for development and smoke runs.
    match std::env::var("DB2i_DRIVER").as_deref() {
        Err(_) | Ok("memory") => {
            if config.environment == Environment::Production {
                tracing::warn!("memory driver selected in production environment");
            }
            Ok(Arc::new(MemoryDriver::new()))
        }
        Ok(other) => bail!("unknown driver: {other} (this build links: memory)"),
    }
}

fn print_toolsets(toolsets: &ToolsetManager) {
    let stats = toolsets.stats();
    println!("{} toolset(s)", stats.total_toolsets);
    for name in toolsets.toolset_names() {
        let Some(set) = toolsets.toolset(&name) else {
            continue;
        };
        let members = toolsets.tools_in_toolset(&name).unwrap_or_default();
        println!("\n{name} - {}", set.title);
        if let Some(description) = &set.description {
            println!("  {description}");
        }
        for tool in members {
            println!("  - {tool}");
        }
    }
}

fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("fatal panic: {info}");
        default(info);
    }));
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown requested");
}
