//! Fire-and-forget write-behind for store snapshots.
//!
//! Each mutation hands over a full serialized snapshot. A single writer
//! thread applies them in the order they were scheduled, so the last
//! scheduled snapshot is the one left in storage. Failed writes are logged
//! and dropped; nothing is retried.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::Context;
use tracing::{debug, trace, warn};

use crate::storage::KeyValueStore;

enum Job {
    Write { key: String, payload: String },
    Flush(Sender<()>),
}

/// Cloneable handle to the writer thread.
#[derive(Clone)]
pub struct WriteQueue {
    tx: Sender<Job>,
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}

impl WriteQueue {
    #[tracing::instrument(skip(store))]
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("checklet-writer".to_string())
            .spawn(move || drain(store, rx))
            .context("failed to spawn writer thread")?;
        debug!("writer thread started");
        Ok(Self { tx })
    }

    pub fn schedule(&self, key: &str, payload: String) {
        trace!(key, bytes = payload.len(), "scheduling write");
        let job = Job::Write {
            key: key.to_string(),
            payload,
        };
        if self.tx.send(job).is_err() {
            warn!(key, "writer thread gone; dropping write");
        }
    }

    /// Blocks until every write scheduled before this call has been attempted.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.tx.send(Job::Flush(done_tx)).is_err() {
            warn!("writer thread gone; nothing to flush");
            return;
        }
        let _ = done_rx.recv();
    }
}

fn drain(store: Arc<dyn KeyValueStore>, rx: Receiver<Job>) {
    for job in rx {
        match job {
            Job::Write { key, payload } => {
                if let Err(err) = store.set(&key, &payload) {
                    warn!(key = %key, error = %err, "persist failed; keeping in-memory state");
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("writer thread exiting");
}
