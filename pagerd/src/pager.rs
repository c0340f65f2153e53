//! Shared pager state: the enable flag, the page rate limiter and the
//! watchdog timer. All three are read and written concurrently by command
//! handlers and by the main loop's watchdog check, so they live behind a
//! single mutex and every check-and-update happens in one critical section.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::command::SUCCESS;
use crate::speech::Speaker;

/// Handle to the pager state, cloned into every command handler.
#[derive(Debug, Clone)]
pub struct Pager {
    inner: Arc<Mutex<PagerInner>>,
    pager_interval: Duration,
    watchdog_timeout: Duration,
}

#[derive(Debug)]
struct PagerInner {
    enabled: bool,
    /// Time of the last page that actually fired; None until the first one.
    last_page: Option<Instant>,
    last_heartbeat: Instant,
}

/// Outcome of the rate-limit check, decided under the lock.
enum PageDecision {
    /// The interval window was claimed; the caller must speak.
    Fire,
    Suppressed { reason: String },
}

impl Pager {
    pub fn new(pager_interval: Duration, watchdog_timeout: Duration, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PagerInner {
                enabled,
                last_page: None,
                last_heartbeat: Instant::now(),
            })),
            pager_interval,
            watchdog_timeout,
        }
    }

    /// Enable paging. Only affects paging, all other functionality continues
    /// to operate normally.
    pub async fn enable(&self) {
        self.inner.lock().await.enabled = true;
    }

    /// Disable paging.
    pub async fn disable(&self) {
        self.inner.lock().await.enabled = false;
    }

    /// Reset the watchdog timer. This is what the heartbeat signal calls.
    pub async fn heartbeat(&self) {
        debug!("updating watchdog timer");
        self.inner.lock().await.last_heartbeat = Instant::now();
    }

    /// Whether the heartbeat has gone stale. Derived, not stored: the pager
    /// flips back to healthy the moment a heartbeat arrives.
    pub async fn watchdog_expired(&self) -> bool {
        self.heartbeat_age().await > self.watchdog_timeout
    }

    pub async fn heartbeat_age(&self) -> Duration {
        self.inner.lock().await.last_heartbeat.elapsed()
    }

    /// Trigger a page, subject to the rate limit. At most one page can claim
    /// each `pager_interval` window, no matter how many handlers race here.
    ///
    /// The window is claimed under the lock but the speech side effect runs
    /// after it is released, so a slow alert cannot wedge other commands. A
    /// claimed window stays consumed even if the speech program fails;
    /// dropped pages are not queued or replayed.
    pub async fn request_page(&self, message: &str, speaker: &dyn Speaker) -> Result<String> {
        let decision = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let elapsed = inner
                .last_page
                .map(|last| now.duration_since(last).as_secs_f64());
            let interval = self.pager_interval.as_secs_f64();
            if inner.enabled && elapsed.map_or(true, |e| e >= interval) {
                inner.last_page = Some(now);
                PageDecision::Fire
            } else {
                let reason = match elapsed {
                    Some(e) => format!(
                        "Not paging: {:.0} seconds since last page, waiting for {:.0} seconds.",
                        e,
                        interval - e
                    ),
                    None => "Not paging: pager is disabled.".to_owned(),
                };
                PageDecision::Suppressed { reason }
            }
        };

        match decision {
            PageDecision::Fire => {
                speaker.speak(message).await?;
                debug!("paging on: {}", message);
                Ok(SUCCESS.to_owned())
            }
            PageDecision::Suppressed { reason } => {
                debug!("{}", reason);
                Ok(reason)
            }
        }
    }

    /// Human-readable status text, sent back to the client that asked.
    /// `running` is the list of in-flight command labels.
    pub async fn status(&self, running: &[String]) -> String {
        let inner = self.inner.lock().await;
        let mut out = String::from("Running commands:");
        for label in running {
            out.push_str("\n\t");
            out.push_str(label);
        }
        out.push_str("\nPager is ");
        if inner.enabled {
            out.push_str("enabled");
            if let Some(last) = inner.last_page {
                let elapsed = last.elapsed();
                if elapsed <= self.pager_interval {
                    let remaining = (self.pager_interval - elapsed).as_secs_f64();
                    out.push_str(&format!(
                        ", but pager will not trigger for another {remaining:.0} seconds"
                    ));
                }
            }
        } else {
            out.push_str("disabled");
        }
        out
    }
}
