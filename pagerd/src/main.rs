mod command;
mod config;
mod pager;
mod server;
mod speech;
mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use config::Args;
use pager::Pager;
use server::Server;
use speech::{EspeakSpeaker, Speaker};
use workers::WorkerRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    let addr = args.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("pager daemon listening on {}", addr);

    let pager = Pager::new(
        args.pager_interval(),
        args.watchdog_timeout(),
        !args.disabled,
    );
    let speaker: Arc<dyn Speaker> = Arc::new(EspeakSpeaker::new(&args.speech_program));
    let server = Server::new(
        pager,
        WorkerRegistry::new(),
        speaker,
        &args.failure_msg,
        args.accept_timeout(),
    );
    server.run(listener).await
}

/// Initialize logging. `--log-level` wins over RUST_LOG; `--log-file`
/// redirects output through a non-blocking appender whose guard must live
/// for the rest of the process.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level {level:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            Ok(None)
        }
    }
}
