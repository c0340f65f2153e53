//! Command-line client for the pager daemon. Builds one command line from
//! the positional arguments, sends it over a fresh TCP connection and prints
//! the plain-text response.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "localhost";
const DEFAULT_PORT: u16 = 1027;
const DEFAULT_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_FAILURE_MSG: &str = "FAIL";
const RECV_BUFFER: usize = 4096;

const CMD_HELP: &str = "\
Command to execute. The following commands are most likely to be of interest:

  page <message>   trigger a page with the given message
  enable           enable the pager
  disable          disable the pager
  status           show running commands and pager state
  watchdog         send a heartbeat, resetting the watchdog timer
  log <message>    log a message on the server without triggering a page
  exit             shut the server down

Words after the verb are joined into a single quoted argument.";

/// Client for controlling the pager.
#[derive(Debug, Parser)]
#[command(name = "pagerctl")]
struct Args {
    /// Command words
    #[arg(required = true, help = CMD_HELP)]
    cmd: Vec<String>,

    /// Address of the server host
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Port the server is listening on
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the server
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: f64,

    /// Response the server sends for failed commands
    #[arg(long, default_value = DEFAULT_FAILURE_MSG)]
    failure_msg: String,
}

/// Join the command words into one line: the verb, then everything else as
/// a single double-quoted argument (quotes and backslashes escaped so the
/// server's tokenizer round-trips the message).
fn build_command(words: &[String]) -> String {
    match words {
        [verb] => verb.clone(),
        [verb, rest @ ..] => {
            let message = rest.join(" ").replace('\\', "\\\\").replace('"', "\\\"");
            format!("{verb} \"{message}\"")
        }
        [] => String::new(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
    let args = Args::parse();

    let line = build_command(&args.cmd);
    let addr = format!("{}:{}", args.server, args.port);
    let timeout = Duration::from_secs_f64(args.timeout);

    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("failed to connect to {addr}"))?;

    debug!("sending: {}", line);
    stream.write_all(line.as_bytes()).await?;

    let mut buf = vec![0u8; RECV_BUFFER];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .context("timed out waiting for a response")??;
    let response = String::from_utf8_lossy(&buf[..n]);

    if response == args.failure_msg {
        error!("command failed, check the server log");
        return Ok(ExitCode::FAILURE);
    }
    info!("{}", response);
    Ok(ExitCode::SUCCESS)
}
