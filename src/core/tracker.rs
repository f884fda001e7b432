//! Run progress for polling and streaming
//!
//! Active runs publish [`RunRecord`] snapshots on a `watch` channel; finished
//! runs are read back from the control store.

use crate::adapters::database::ControlStore;
use crate::domain::{DeidError, Result, RunId, RunRecord};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Read side of run state
pub struct RunTracker {
    store: Arc<dyn ControlStore>,
    live: RwLock<HashMap<RunId, watch::Receiver<RunRecord>>>,
}

enum Phase {
    Start,
    Watching,
    Done,
}

impl RunTracker {
    /// Create a tracker backed by the control store
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self {
            store,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Starts publishing a run; the returned sender is owned by the run task
    pub async fn track(&self, record: RunRecord) -> watch::Sender<RunRecord> {
        let id = record.id;
        let (tx, rx) = watch::channel(record);
        self.live.write().await.insert(id, rx);
        tx
    }

    /// Stops serving live snapshots for a finished run
    pub async fn untrack(&self, id: &RunId) {
        self.live.write().await.remove(id);
    }

    /// Whether the run is executing in this process
    pub async fn is_live(&self, id: &RunId) -> bool {
        self.live.read().await.contains_key(id)
    }

    /// Current snapshot of a run
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown run id.
    pub async fn get(&self, id: &RunId) -> Result<RunRecord> {
        if let Some(rx) = self.live.read().await.get(id) {
            return Ok(rx.borrow().clone());
        }
        self.store
            .load_run(id)
            .await?
            .ok_or_else(|| DeidError::NotFound(format!("Run '{id}' not found")))
    }

    /// Most recent runs, newest first
    pub async fn list(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.list_runs(limit).await
    }

    /// Snapshots until the run reaches COMPLETED or FAILED
    ///
    /// The stream yields the current state first and ends after the terminal
    /// snapshot. A run that is not live yields its stored record once.
    pub async fn subscribe(&self, id: &RunId) -> Result<BoxStream<'static, RunRecord>> {
        let rx = self.live.read().await.get(id).cloned();

        let Some(rx) = rx else {
            let record = self.get(id).await?;
            return Ok(stream::once(async move { record }).boxed());
        };

        Ok(stream::unfold((rx, Phase::Start), |(mut rx, phase)| async move {
            let closed = match phase {
                Phase::Done => return None,
                Phase::Start => false,
                Phase::Watching => rx.changed().await.is_err(),
            };

            let snapshot = rx.borrow_and_update().clone();
            let next = if closed || snapshot.status.is_terminal() {
                Phase::Done
            } else {
                Phase::Watching
            };
            Some((snapshot, (rx, next)))
        })
        .boxed())
    }
}
