mod config;
mod error;
mod repl;

use std::io;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use runtime::{GeminiBackend, McpToolHost, Session, ToolHost};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::Result;

#[derive(Parser)]
#[command(name = "mcp-chatbot")]
#[command(about = "Chat with Gemini using tools from an MCP server", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./chatbot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::resolve(cli.config.as_deref())?;
    // Checked before the server is spawned.
    let api_key = config::api_key()?;

    let host = McpToolHost::connect(config.server_config())
        .await
        .map_err(runtime::Error::from)?;
    tracing::info!(server = host.server_name(), "tool server connected");

    let declarations = repl::configure_tools(host.descriptors(), &mut io::stdout())?;

    let mut builder =
        GeminiBackend::builder(api_key, &config.model.name).base_url(&config.model.base_url);
    if let Some(system) = &config.model.system {
        builder = builder.system(system);
    }
    let backend = builder.build();
    tracing::debug!(%backend, tools = declarations.len(), "backend ready");

    let mut session = Session::new(backend, host, declarations);
    let result = repl::run(&mut session, io::stdin().lock(), &mut io::stdout()).await;

    session.into_tool_host().shutdown().await;
    result?;
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
