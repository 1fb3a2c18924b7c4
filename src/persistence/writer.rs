//! Background queue for best-effort remote cart writes.
//!
//! Writes are applied one at a time in dispatch order, each to the slot of the
//! address it was dispatched for. Each one is also tagged with the session
//! epoch current at dispatch. A write whose session has ended by the time it
//! completes still lands in its own wallet's slot, since it holds that
//! wallet's latest cart, but its completion is ignored by the active session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::model::{CartItem, WalletAddress};

use super::ports::RemoteStore;

enum Request {
    Save {
        address: WalletAddress,
        epoch: u64,
        items: Vec<CartItem>,
    },
    Flush(oneshot::Sender<()>),
}

/// Counters of what happened to dispatched remote writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    pub saved: usize,
    pub failed: usize,
    /// Writes that completed after their session had ended.
    pub stale: usize,
}

#[derive(Debug, Default)]
struct Counters {
    saved: AtomicUsize,
    failed: AtomicUsize,
    stale: AtomicUsize,
}

/// Handle to the writer task.
#[derive(Debug)]
pub(crate) struct RemoteWriter {
    sender: mpsc::UnboundedSender<Request>,
    epoch: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Save { address, epoch, items } => f
                .debug_struct("Save")
                .field("address", address)
                .field("epoch", epoch)
                .field("items", &items.len())
                .finish(),
            Request::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl RemoteWriter {
    /// Start the writer task; must be called from within a tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let counters = Arc::new(Counters::default());

        tokio::spawn(run(
            receiver,
            store,
            Arc::clone(&epoch),
            Arc::clone(&counters),
            timeout,
        ));

        Self {
            sender,
            epoch,
            counters,
        }
    }

    /// Start a new session epoch; queued writes become stale.
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Queue a write of `items` for `address` in the current epoch.
    pub(crate) fn enqueue(&self, address: WalletAddress, items: Vec<CartItem>) {
        let request = Request::Save {
            address,
            epoch: self.epoch(),
            items,
        };
        if let Err(e) = self.sender.send(request) {
            warn!(request = ?e.0, "remote writer stopped, write dropped");
        }
    }

    /// Wait until every write queued so far has been handled.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Request::Flush(done)).is_err() {
            return;
        }
        // a dropped sender means the task is gone, nothing left to wait for
        let _ = wait.await;
    }

    pub(crate) fn stats(&self) -> SyncStats {
        SyncStats {
            saved: self.counters.saved.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            stale: self.counters.stale.load(Ordering::SeqCst),
        }
    }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<Request>,
    store: Arc<dyn RemoteStore>,
    epoch: Arc<AtomicU64>,
    counters: Arc<Counters>,
    timeout: Duration,
) {
    while let Some(request) = receiver.recv().await {
        let (address, tagged, items) = match request {
            Request::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            Request::Save {
                address,
                epoch,
                items,
            } => (address, epoch, items),
        };

        match tokio::time::timeout(timeout, store.save_cart(&address, &items)).await {
            Ok(Ok(())) => {
                counters.saved.fetch_add(1, Ordering::SeqCst);
                if tagged == epoch.load(Ordering::SeqCst) {
                    debug!(address = %address, items = items.len(), "remote cart saved");
                } else {
                    counters.stale.fetch_add(1, Ordering::SeqCst);
                    debug!(address = %address, epoch = tagged, "remote save of a past session completed, ignored");
                }
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(address = %address, reason = %e, "remote cart save failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(address = %address, timeout = ?timeout, "remote cart save timed out");
            }
        }
    }
}
