//! Ordered background writer for the durable mirror.
//!
//! Callers enqueue and return immediately. A single task applies operations in
//! submission order, so a reindex's delete can never land after its put.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::durable::DurableStore;

#[derive(Debug)]
pub(crate) enum MirrorOp {
    Put {
        namespace: String,
        key: String,
        value: String,
    },
    Delete {
        namespace: String,
        key: String,
    },
    Clear {
        namespace: String,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) struct Mirror {
    tx: mpsc::UnboundedSender<MirrorOp>,
    healthy: Arc<AtomicBool>,
}

impl Mirror {
    /// Spawn the writer task. Must be called from within a tokio runtime.
    pub(crate) fn spawn(durable: Arc<dyn DurableStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let healthy = Arc::new(AtomicBool::new(true));
        tokio::spawn(run(durable, rx, Arc::clone(&healthy)));
        Self { tx, healthy }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Stop mirroring. Later writes are dropped; the in-memory index keeps working.
    pub(crate) fn degrade(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    pub(crate) fn send(&self, op: MirrorOp) {
        if !self.is_healthy() {
            return;
        }
        if self.tx.send(op).is_err() {
            tracing::warn!("durable mirror writer stopped; continuing memory-only");
            self.degrade();
        }
    }

    /// Wait until every operation enqueued before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(MirrorOp::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(
    durable: Arc<dyn DurableStore>,
    mut rx: mpsc::UnboundedReceiver<MirrorOp>,
    healthy: Arc<AtomicBool>,
) {
    while let Some(op) = rx.recv().await {
        if let MirrorOp::Flush(ack) = op {
            let _ = ack.send(());
            continue;
        }
        if !healthy.load(Ordering::Relaxed) {
            continue;
        }

        let result = match op {
            MirrorOp::Put {
                namespace,
                key,
                value,
            } => durable.put(&namespace, &key, value).await,
            MirrorOp::Delete { namespace, key } => durable.delete(&namespace, &key).await,
            MirrorOp::Clear { namespace } => durable.clear(&namespace).await,
            MirrorOp::Flush(_) => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "durable mirror write failed; continuing memory-only");
            healthy.store(false, Ordering::Relaxed);
        }
    }
    tracing::debug!("durable mirror writer exited");
}
