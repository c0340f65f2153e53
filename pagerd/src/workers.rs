//! Bookkeeping for in-flight command tasks. Purely observational: entries
//! exist so `status` can list what is running and so shutdown can wait for
//! stragglers, never for synchronization.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One spawned command execution.
#[derive(Debug)]
struct WorkerRecord {
    /// The raw command text the worker is running, for status output.
    label: String,
    handle: JoinHandle<()>,
}

/// Registry of live workers, shared between the main loop and handlers.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    // BTreeMap keeps snapshot output in registration order.
    workers: BTreeMap<u64, WorkerRecord>,
    next_id: u64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a spawned task under a human-readable label.
    pub async fn register(&self, label: String, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.workers.insert(id, WorkerRecord { label, handle });
    }

    /// Drop entries whose task has completed.
    pub async fn reap(&self) {
        let mut inner = self.inner.lock().await;
        inner.workers.retain(|_, record| !record.handle.is_finished());
    }

    /// Labels of the currently registered workers, oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .workers
            .values()
            .map(|record| record.label.clone())
            .collect()
    }

    /// Empty the registry, handing back every handle so the caller can wait
    /// for outstanding work during shutdown.
    pub async fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        std::mem::take(&mut inner.workers)
            .into_values()
            .map(|record| record.handle)
            .collect()
    }
}
