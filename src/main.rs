use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, BufReader};

use execgate::internal::profile::{code_registry, noncode_registry};
use execgate::{
    load_config, termination_signal, write_outbound, ExecutionContext, Outbox, ProjectManager,
    Router, SubprocessBackend,
};

const WRITER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Executor {
    /// Kernel-backed endpoints: CodeEditor, DFManager, ModelManager, MagicCommandGen
    Code,
    /// File and project endpoints: FileManager, FileExplorer
    NonCode,
}

#[derive(Parser)]
#[command(name = "execgate")]
#[command(about = "Execution message gateway between a UI process and code kernels")]
#[command(version)]
struct Cli {
    #[arg(value_enum)]
    executor: Executor,

    /// Gateway config file (defaults to $GATEWAY_CONFIG, then config/gateway.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write outbound messages here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // stdout carries protocol traffic, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("execgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(Cli::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    // The blocking stdin reader would otherwise hold the runtime open.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref());
    tracing::info!(executor = ?cli.executor, "Execution gateway starting");

    let (outbox, queue) = Outbox::channel();
    let sink: Box<dyn AsyncWrite + Unpin + Send> = match &cli.output {
        Some(path) => Box::new(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open output {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let writer = tokio::spawn(write_outbound(queue, sink));

    let mut context = None;
    let registry = match cli.executor {
        Executor::Code => {
            let backend = SubprocessBackend::spawn(&config.kernel)
                .context("Failed to start kernel bridge")?;
            let shared = Arc::new(ExecutionContext::new(Box::new(backend)));
            context = Some(Arc::clone(&shared));
            code_registry(&outbox, shared)?
        }
        Executor::NonCode => {
            let projects = Arc::new(ProjectManager::from_config(&config.projects));
            noncode_registry(&outbox, projects)?
        }
    };

    let router = Router::new(registry, outbox);
    let outcome = router
        .run(BufReader::new(tokio::io::stdin()), termination_signal())
        .await;

    if let Some(context) = context {
        tokio::task::spawn_blocking(move || context.shutdown())
            .await
            .context("Execution context shutdown task failed")?;
    }

    // Dropping the router drops the last outbox handle held by the loop.
    drop(router);
    match tokio::time::timeout(WRITER_GRACE, writer).await {
        Ok(Ok(Ok(written))) => tracing::info!(written, "Outbound writer finished"),
        Ok(Ok(Err(e))) => tracing::warn!("Outbound writer failed: {}", e),
        Ok(Err(e)) => tracing::warn!("Outbound writer task failed: {}", e),
        Err(_) => tracing::warn!("Outbound writer did not finish in time"),
    }

    outcome.context("Router stopped")?;
    tracing::info!("Execution gateway stopped");
    Ok(())
}
