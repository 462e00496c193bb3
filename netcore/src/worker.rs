//! Fixed-size worker pool with deterministic per-connection routing.
//!
//! Every frame from a given connection is routed to the same worker via
//! `fd % worker_count`, so frames from one connection are always processed
//! in arrival order even though workers run concurrently with each other.

use crate::conn::ConnId;
use crate::handler::ServiceHandler;
use crate::message::MessageEnvelope;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A pool of bounded-queue worker tasks, each dispatching to a shared handler.
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::Sender<MessageEnvelope>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` worker tasks, each with a queue of `capacity`
    /// envelopes. Dropping the returned pool drops every sender, which lets
    /// each worker drain its queue and exit once no more sends are possible.
    pub(crate) fn spawn<H: ServiceHandler + 'static>(
        count: usize,
        capacity: usize,
        handler: Arc<H>,
    ) -> Self {
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for idx in 0..count {
            let (tx, mut rx) = mpsc::channel::<MessageEnvelope>(capacity);
            let handler = handler.clone();
            let handle = tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    let ctx = envelope.ctx.clone();
                    if let Err(err) = handler.on_data(&ctx, envelope.payload()).await {
                        tracing::error!(
                            fd = ctx.fd(),
                            worker = idx,
                            error = %err,
                            "on_data failed, closing connection"
                        );
                        ctx.close();
                    }
                }
                tracing::debug!(worker = idx, "worker queue drained, exiting");
            });
            senders.push(tx);
            handles.push(handle);
        }
        Self { senders, handles }
    }

    /// The worker queue responsible for `fd`.
    pub(crate) fn route(&self, fd: ConnId) -> &mpsc::Sender<MessageEnvelope> {
        let n = self.senders.len() as i64;
        let idx = (fd as i64).rem_euclid(n) as usize;
        &self.senders[idx]
    }

    /// Drops every sender so each worker's queue drains and its loop exits,
    /// then awaits every worker task to completion.
    pub(crate) async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
