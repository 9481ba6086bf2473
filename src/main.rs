#![forbid(unsafe_code)]

//! `agentbox`: drive stream-json coding-agent sessions from the command line.
//!
//! Loads configuration, opens (or reconnects) a session in the configured
//! workspace root, and runs one-shot or interactive turns against the agent
//! CLI on the host.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agentbox::models::turn::TurnResult;
use agentbox::orchestrator::agent_box::{AgentBox, SessionOptions, TurnOptions};
use agentbox::orchestrator::session_manager;
use agentbox::persistence::dir_store::DirWorkspaceStore;
use agentbox::persistence::WorkspaceStore;
use agentbox::runtime::local::LocalRuntime;
use agentbox::runtime::Runtime;
use agentbox::stream::dispatcher::{ContentBlock, Frame};
use agentbox::{AppError, BoxConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agentbox", about = "Multi-turn coding-agent sessions", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single prompt on a fresh agent process.
    Run {
        /// Prompt text.
        #[arg(long)]
        prompt: String,
        /// Persistent session to use; omitted for an ephemeral session.
        #[arg(long)]
        session: Option<String>,
        /// Maximum number of agentic turns.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Tool the agent may use (repeatable).
        #[arg(long = "allowed-tool")]
        allowed_tools: Vec<String>,
        /// Tool the agent may not use (repeatable).
        #[arg(long = "disallowed-tool")]
        disallowed_tools: Vec<String>,
    },
    /// Interactive session: one prompt per line on stdin.
    Chat {
        /// Persistent session to use; omitted for an ephemeral session.
        #[arg(long)]
        session: Option<String>,
    },
    /// List stored sessions.
    List,
    /// Remove a stored session.
    Cleanup {
        /// Session identifier.
        id: String,
        /// Delete the workspace as well as closing the record.
        #[arg(long)]
        remove_data: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = BoxConfig::load_from_path(&args.config)?;
    info!(workspace_root = %config.workspace_root.display(), "configuration loaded");

    let store: Arc<dyn WorkspaceStore> = Arc::new(DirWorkspaceStore::new(&config.workspace_root));
    let runtime: Arc<dyn Runtime> = Arc::new(LocalRuntime::new());

    match args.command {
        Command::Run {
            prompt,
            session,
            max_turns,
            allowed_tools,
            disallowed_tools,
        } => {
            let options = TurnOptions {
                max_turns,
                allowed_tools,
                disallowed_tools,
            };
            run_once(runtime, store, config, session, &prompt, &options).await
        }
        Command::Chat { session } => chat(runtime, store, config, session).await,
        Command::List => {
            for record in session_manager::list_sessions(store.as_ref()).await? {
                println!(
                    "{}\t{:?}\t{:?}\t{}\t{}",
                    record.id,
                    record.persistence,
                    record.status,
                    record.conversation_id,
                    record.updated_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Cleanup { id, remove_data } => {
            session_manager::cleanup_session(store.as_ref(), &id, remove_data).await
        }
    }
}

async fn run_once(
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn WorkspaceStore>,
    config: BoxConfig,
    session: Option<String>,
    prompt: &str,
    options: &TurnOptions,
) -> Result<()> {
    let mut agent = AgentBox::open(runtime, store, config, session_options(session)).await?;
    let result = agent.code(prompt, options).await;
    let closed = agent.close().await;

    let result = result?;
    closed?;
    report(&result);

    if result.success {
        Ok(())
    } else {
        Err(AppError::Runtime(
            result.error.unwrap_or_else(|| "agent turn failed".into()),
        ))
    }
}

async fn chat(
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn WorkspaceStore>,
    config: BoxConfig,
    session: Option<String>,
) -> Result<()> {
    let mut agent = AgentBox::open(runtime, store, config, session_options(session)).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            () = shutdown_signal() => {
                info!("shutdown signal received");
                break;
            }
        };

        let prompt = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(%err, "failed to read prompt from stdin");
                break;
            }
        };

        let (tx, rx) = mpsc::channel(64);
        let (result, ()) = tokio::join!(agent.stream(&prompt, tx), print_frames(rx));
        match result {
            Ok(result) if !result.success => {
                warn!(error = result.error.as_deref().unwrap_or_default(), "turn failed");
            }
            Ok(_) => {}
            Err(err) => error!(%err, "turn aborted"),
        }
    }

    agent.close().await
}

async fn print_frames(mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Frame::Assistant { blocks, .. } = &frame {
            for block in blocks {
                if let ContentBlock::Text { text } = block {
                    println!("{text}");
                }
            }
        }
    }
}

fn session_options(session: Option<String>) -> SessionOptions {
    SessionOptions {
        session_id: session,
        ..SessionOptions::default()
    }
}

fn report(result: &TurnResult) {
    if !result.response.is_empty() {
        println!("{}", result.response);
    }
    info!(
        success = result.success,
        exit_code = ?result.exit_code,
        cost_usd = ?result.cost_usd,
        duration_ms = ?result.duration_ms,
        "turn finished"
    );
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
