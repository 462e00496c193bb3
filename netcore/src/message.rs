//! The carrier handed from a connection's read loop to a worker.

use crate::conn::ConnectionContext;
use crate::pool::Pool;
use std::sync::Arc;

/// One decoded frame, paired with the connection it arrived on.
///
/// The payload buffer is drawn from a shared pool at construction and
/// returned to it on drop, so steady-state dispatch does not allocate once
/// the pool has warmed up.
pub struct MessageEnvelope {
    /// The connection this frame arrived on.
    pub ctx: Arc<ConnectionContext>,
    payload: Vec<u8>,
    pool: Arc<Pool<Vec<u8>>>,
}

impl MessageEnvelope {
    pub(crate) fn take(pool: &Arc<Pool<Vec<u8>>>, ctx: Arc<ConnectionContext>, data: &[u8]) -> Self {
        let mut payload = pool.get();
        payload.clear();
        payload.extend_from_slice(data);
        Self {
            ctx,
            payload,
            pool: pool.clone(),
        }
    }

    /// The decoded frame payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl Drop for MessageEnvelope {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.payload);
        self.pool.put(buf);
    }
}
