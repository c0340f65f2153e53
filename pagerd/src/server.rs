//! The accept loop and per-connection handling. One command per TCP
//! connection: the loop reads the line, checks for `exit`, and spawns a
//! handler that dispatches it and writes back exactly one response. Between
//! connections (or whenever the poll interval elapses) the watchdog timer is
//! checked and finished workers are reaped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::command;
use crate::pager::Pager;
use crate::speech::Speaker;
use crate::workers::WorkerRegistry;

/// Largest command accepted on one connection.
const RECV_BUFFER: usize = 4096;
/// Message paged when the watchdog expires.
const WATCHDOG_PAGE_MSG: &str = "Watchdog timed out";

pub struct Server {
    pager: Pager,
    workers: WorkerRegistry,
    speaker: Arc<dyn Speaker>,
    failure_msg: String,
    poll_interval: Duration,
}

impl Server {
    pub fn new(
        pager: Pager,
        workers: WorkerRegistry,
        speaker: Arc<dyn Speaker>,
        failure_msg: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pager,
            workers,
            speaker,
            failure_msg: failure_msg.into(),
            poll_interval,
        }
    }

    /// The main loop of the server. Multiplexes over incoming connections
    /// and the watchdog poll interval; after either event, the watchdog
    /// timer is checked and finished workers are reaped. Returns once the
    /// bare `exit` command is received and all outstanding workers are done.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let exit = tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted.context("listening socket failed")?;
                    debug!("connection from {}", addr);
                    self.accept_one(stream).await
                }
                _ = poll.tick() => false,
            };
            self.check_watchdog().await;
            self.workers.reap().await;
            if exit {
                break;
            }
        }

        info!("exiting");
        drop(listener);
        self.drain().await;
        Ok(())
    }

    /// Read the single command from an accepted connection. Returns true if
    /// it was the `exit` command, which terminates the loop without a
    /// response. The read is bounded by the poll interval so a stalled
    /// client cannot hold up watchdog checks indefinitely.
    async fn accept_one(&self, mut stream: TcpStream) -> bool {
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = match tokio::time::timeout(self.poll_interval, stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("failed to read command: {}", e);
                return false;
            }
            Err(_) => {
                warn!("client sent no command within {:?}", self.poll_interval);
                return false;
            }
        };
        if n == 0 {
            debug!("client closed without sending a command");
            return false;
        }

        let raw = String::from_utf8_lossy(&buf[..n]).into_owned();
        debug!("received {:?}", raw.trim_end());
        if raw.trim() == "exit" {
            debug!("received exit");
            return true;
        }

        let label = raw.trim_end().to_owned();
        let pager = self.pager.clone();
        let workers = self.workers.clone();
        let speaker = Arc::clone(&self.speaker);
        let failure_msg = self.failure_msg.clone();
        let handle = tokio::spawn(async move {
            handle_connection(stream, raw, pager, workers, speaker, failure_msg).await;
        });
        self.workers.register(label, handle).await;
        false
    }

    /// Page if the heartbeat has gone stale. There is no latch: every poll
    /// cycle while stale attempts a page, and the rate limiter suppresses
    /// all but the first per interval. Only an explicit heartbeat command
    /// resets the watchdog clock.
    async fn check_watchdog(&self) {
        let age = self.pager.heartbeat_age().await;
        debug!("time since last heartbeat: {:.0}s", age.as_secs_f64());
        if !self.pager.watchdog_expired().await {
            return;
        }
        let pager = self.pager.clone();
        let speaker = Arc::clone(&self.speaker);
        let handle = tokio::spawn(async move {
            match pager.request_page(WATCHDOG_PAGE_MSG, speaker.as_ref()).await {
                Ok(outcome) => debug!("watchdog page: {}", outcome),
                Err(e) => error!("watchdog page failed: {:#}", e),
            }
        });
        self.workers.register(WATCHDOG_PAGE_MSG.to_owned(), handle).await;
    }

    /// Wait for outstanding workers before shutdown.
    async fn drain(&self) {
        let handles = self.workers.drain().await;
        if handles.is_empty() {
            return;
        }
        debug!("waiting for {} outstanding worker(s)", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task failed: {}", e);
            }
        }
    }
}

/// Dispatch one command and write back exactly one response: the action's
/// reply on success, the failure sentinel on any error. The connection
/// closes when the stream drops, regardless of path.
async fn handle_connection(
    mut stream: TcpStream,
    raw: String,
    pager: Pager,
    workers: WorkerRegistry,
    speaker: Arc<dyn Speaker>,
    failure_msg: String,
) {
    let response = match command::dispatch(&raw, &pager, &workers, speaker.as_ref()).await {
        Ok(reply) => {
            debug!("responding with {:?}", reply);
            reply
        }
        Err(e) => {
            error!("command {:?} failed: {}", raw.trim_end(), e);
            failure_msg
        }
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("failed to send response: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::speech::testing::RecordingSpeaker;

    const FAST_POLL: Duration = Duration::from_millis(25);

    async fn start_server(
        enabled: bool,
        pager_interval: Duration,
        watchdog_timeout: Duration,
        speaker: Arc<RecordingSpeaker>,
    ) -> (SocketAddr, JoinHandle<Result<()>>) {
        let pager = Pager::new(pager_interval, watchdog_timeout, enabled);
        let server = Server::new(
            pager,
            WorkerRegistry::new(),
            speaker as Arc<dyn Speaker>,
            "FAIL",
            FAST_POLL,
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { server.run(listener).await });
        (addr, handle)
    }

    /// Send one command line and return the response (empty if the server
    /// closed without responding).
    async fn send(addr: SocketAddr, line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = stream.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn page_end_to_end_with_rate_limit() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            speaker.clone(),
        )
        .await;

        let reply = send(addr, "page \"hello world\"").await;
        assert_eq!(reply, "SUCCESS");
        assert_eq!(speaker.spoken(), vec!["hello world"]);

        let reply = send(addr, "page anything").await;
        assert!(reply.starts_with("Not paging:"), "got {reply:?}");
        assert_eq!(speaker.spoken().len(), 1);

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn disable_and_enable_gate_paging() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            speaker.clone(),
        )
        .await;

        assert_eq!(send(addr, "disable").await, "SUCCESS");
        let reply = send(addr, "page x").await;
        assert_eq!(reply, "Not paging: pager is disabled.");
        assert!(speaker.spoken().is_empty());

        assert_eq!(send(addr, "enable").await, "SUCCESS");
        assert_eq!(send(addr, "page x").await, "SUCCESS");
        assert_eq!(speaker.spoken(), vec!["x"]);

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_verb_gets_the_failure_sentinel() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            speaker.clone(),
        )
        .await;

        assert_eq!(send(addr, "frobnicate").await, "FAIL");
        assert_eq!(send(addr, "page a b c").await, "FAIL");
        assert!(speaker.spoken().is_empty());

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_reflects_enabled_state() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            speaker.clone(),
        )
        .await;

        let status = send(addr, "status").await;
        assert!(status.starts_with("Running commands:"));
        assert!(status.contains("Pager is enabled"));

        send(addr, "disable").await;
        let status = send(addr, "status").await;
        assert!(status.contains("Pager is disabled"));

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn watchdog_expiry_pages_once_per_interval() {
        let speaker = RecordingSpeaker::new();
        // Watchdog goes stale almost immediately; generous pager interval so
        // repeated expiry detections are rate-limited down to one page.
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_millis(50),
            speaker.clone(),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(speaker.spoken(), vec!["Watchdog timed out"]);

        // Heartbeat makes the watchdog healthy again.
        assert_eq!(send(addr, "watchdog").await, "SUCCESS");

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exit_closes_without_a_response_and_stops_the_server() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            speaker.clone(),
        )
        .await;

        let reply = send(addr, "exit").await;
        assert_eq!(reply, "");

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop after exit");
        result.unwrap().unwrap();

        // The listener is gone.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn heartbeat_holds_the_watchdog_off() {
        let speaker = RecordingSpeaker::new();
        let (addr, server) = start_server(
            true,
            Duration::from_secs(60),
            Duration::from_millis(200),
            speaker.clone(),
        )
        .await;

        // Keep heartbeating faster than the watchdog timeout.
        for _ in 0..4 {
            assert_eq!(send(addr, "watchdog").await, "SUCCESS");
            tokio::time::sleep(Duration::from_millis(80)).await;
        }
        assert!(speaker.spoken().is_empty());

        send(addr, "exit").await;
        server.await.unwrap().unwrap();
    }
}
