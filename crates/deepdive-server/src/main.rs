//! DeepDive - research requests served by out-of-process workers.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deepdive_core::{RequestId, StreamEvent, TaskRequest, WorkerVariant};
use deepdive_runner::{ChannelSink, Orchestrator};
use deepdive_server::config::parse_variant;
use deepdive_server::{http, AppState, Config, WorkerArgs};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "deepdive=info,tower_http=info";

/// DeepDive - research server
#[derive(Parser)]
#[command(name = "deepdive")]
#[command(about = "Research requests served by out-of-process workers", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "DEEPDIVE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// HTTP bind address
        #[arg(long, env = "DEEPDIVE_BIND", default_value = "127.0.0.1:3000")]
        bind: String,

        /// Let workers finish after their client disconnects
        #[arg(long, env = "DEEPDIVE_DETACH_ON_DISCONNECT")]
        detach_on_disconnect: bool,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Run one request locally and print the result as JSON
    Run {
        /// The research query
        #[arg(short, long)]
        message: String,

        /// Worker variant: bing-grounding or deep-research
        #[arg(long, default_value = "deep-research", value_parser = parse_variant)]
        variant: WorkerVariant,

        /// Conversation id echoed in the result
        #[arg(long)]
        conversation_id: Option<String>,

        #[command(flatten)]
        worker: WorkerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve {
            bind,
            detach_on_disconnect,
            worker,
        } => {
            let config = Config {
                bind_addr: bind,
                detach_on_disconnect,
                runner: worker.runner_config(),
            };
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            message,
            variant,
            conversation_id,
            worker,
        } => run_once(message, variant, conversation_id, worker).await,
    }
}

/// Logs go to stderr so `run` keeps stdout for the result.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.bind_addr.parse()?;

    info!(
        addr = %addr,
        worker = %config.runner.program,
        temp_dir = %config.runner.temp_dir.display(),
        detach_on_disconnect = config.detach_on_disconnect,
        "Starting DeepDive server"
    );

    let router = http::create_router(AppState::new(&config));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("DeepDive server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_once(
    message: String,
    variant: WorkerVariant,
    conversation_id: Option<String>,
    worker: WorkerArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::new(worker.runner_config());
    let request = TaskRequest::new(
        RequestId::generate(),
        message,
        conversation_id,
        Vec::new(),
        variant,
    )?;

    let (sink, mut rx) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Progress(progress) = event {
                match progress.details {
                    Some(details) => {
                        eprintln!("[{:>3}%] {}: {}", progress.progress, progress.stage, details)
                    }
                    None => eprintln!("[{:>3}%] {}", progress.progress, progress.stage),
                }
            }
        }
    });

    // Ctrl-C stops the worker the same way a disconnecting client does.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = orchestrator.run(request, &sink, cancel).await;
    drop(sink);
    printer.await?;

    println!("{}", outcome.terminal.to_json()?);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
