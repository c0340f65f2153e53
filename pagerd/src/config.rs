use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default listen host
pub const DEFAULT_HOST: &str = "localhost";
/// Default listen port
pub const DEFAULT_PORT: u16 = 1027;
/// Seconds the main loop waits for a connection between watchdog checks
pub const DEFAULT_SERVER_TIMEOUT_SECS: f64 = 10.0;
/// Minimum seconds between two paging events
pub const DEFAULT_PAGER_INTERVAL_SECS: f64 = 30.0;
/// Seconds without a heartbeat before the watchdog alert fires
pub const DEFAULT_WATCHDOG_TIMEOUT_SECS: f64 = 15.0;
/// Response sent when a command fails
pub const DEFAULT_FAILURE_MSG: &str = "FAIL";
/// Speech program used to announce pages
pub const DEFAULT_SPEECH_PROGRAM: &str = "espeak";

/// Daemon for centralized pager control. Clients connect to issue commands,
/// which prevents annoying behavior e.g. many pages in a short period of time.
#[derive(Debug, Parser)]
#[command(name = "pagerd")]
pub struct Args {
    /// IP address or hostname to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds to wait for an incoming connection before checking the
    /// watchdog timer. Trades watchdog time resolution against time spent
    /// waiting for connections; 10-60 seconds should be fine.
    #[arg(long, default_value_t = DEFAULT_SERVER_TIMEOUT_SECS)]
    pub timeout: f64,

    /// Seconds that must pass between paging events. Page commands received
    /// before this amount of time are dropped, not queued.
    #[arg(long, default_value_t = DEFAULT_PAGER_INTERVAL_SECS)]
    pub pager_interval: f64,

    /// Seconds allowed to elapse without a heartbeat before the watchdog
    /// alert is triggered
    #[arg(long, default_value_t = DEFAULT_WATCHDOG_TIMEOUT_SECS)]
    pub watchdog_timeout: f64,

    /// Response sent to clients when a command fails
    #[arg(long, default_value = DEFAULT_FAILURE_MSG)]
    pub failure_msg: String,

    /// Start with paging disabled
    #[arg(long)]
    pub disabled: bool,

    /// Speech program used to announce pages; invoked with the page message
    /// as its single argument
    #[arg(long, default_value = DEFAULT_SPEECH_PROGRAM)]
    pub speech_program: String,

    /// Log level filter (overrides RUST_LOG), e.g. "debug" or "pagerd=trace"
    #[arg(long)]
    pub log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn pager_interval(&self) -> Duration {
        Duration::from_secs_f64(self.pager_interval)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_timeout)
    }
}
