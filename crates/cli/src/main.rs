mod config;
mod error;
mod logging;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use database::{Database, SqlTools};
use runtime::{AnthropicBackend, Backend, McpToolHost, OpenAiBackend, Session, ToolHost};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use config::{Config, Provider};
use error::Result;

#[derive(Parser)]
#[command(name = "sqlchat")]
#[command(about = "Chat with a SQLite database through an LLM and MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to sqlchat.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the SQLite tools over MCP
    Serve,
    /// Start an interactive chat session
    Chat,
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
    dotenv::dotenv().ok();
    let config = Config::from_env(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve) => cmd_serve(config).await,
        Some(Commands::Chat) | None => cmd_chat(config).await,
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    let log = logging::init(&config.logging, logging::SERVER_LOG)?;
    info!(log = %log.display(), "Initializing MCP server...");

    let server = &config.server;
    let listener = TcpListener::bind((server.host.as_str(), server.port))
        .await
        .inspect_err(|e| error!(error = %e, "Failed to start MCP server"))?;
    info!(
        "Starting MCP server on {}:{} with path {}",
        server.host, server.port, server.path
    );
    info!(database = %server.database.display(), "serving database");

    let tools = SqlTools::new(Database::new(&server.database));
    mcp::serve(listener, tools, &server.path, shutdown_signal()).await?;

    info!("MCP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn cmd_chat(config: Config) -> Result<()> {
    let log = logging::init(&config.logging, logging::CLIENT_LOG)?;
    debug!(log = %log.display(), "logging initialized");
    let api_key = config.api_key()?.to_string();
    let model = &config.model;

    let endpoint = config.client.endpoint();
    info!(%endpoint, "Connecting to MCP server...");
    let tools = McpToolHost::connect(endpoint).await?;

    println!("sqlchat v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: {} ({})", model.model_name(), model.provider);
    println!("Type 'quit' or Ctrl+D to exit.");

    match model.provider {
        Provider::OpenAi => {
            let mut builder = OpenAiBackend::builder(api_key, model.model_name())
                .max_tokens(model.max_tokens);
            if let Some(url) = &model.base_url {
                builder = builder.base_url(url);
            }
            chat_loop(session(builder.build(), tools, &config)).await
        }
        Provider::Anthropic => {
            let backend = AnthropicBackend::builder(api_key, model.model_name())
                .max_tokens(model.max_tokens)
                .build();
            chat_loop(session(backend, tools, &config)).await
        }
    }
}

fn session<B: Backend, H: ToolHost>(backend: B, tools: H, config: &Config) -> Session<B, H> {
    let session = Session::new(backend, tools).with_follow_up(config.client.follow_up);
    match &config.model.system_prompt {
        Some(system) => session.with_system(system),
        None => session,
    }
}

async fn chat_loop<B: Backend>(mut session: Session<B, McpToolHost>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("\nQuery: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        match session.process_query(input).await {
            Ok(summary) => {
                for reply in &summary.replies {
                    println!("\n{reply}");
                }
                if summary.failed > 0 {
                    eprintln!("({} tool call(s) failed; see log)", summary.failed);
                }
            }
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    if let Err(e) = session.tools().close().await {
        warn!(error = %e, "failed to close MCP session");
    }
    println!("\nSession ended.");
    Ok(())
}
