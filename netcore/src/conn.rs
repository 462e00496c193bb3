//! Per-connection shared state.

use bytes::Bytes;
use serde::Serialize;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// The transport a connection arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    /// Raw length-prefixed TCP framing.
    Tcp,
    /// Binary WebSocket messages.
    WebSocket,
}

#[cfg(unix)]
/// Stable per-connection identity, also used as the worker-routing key.
pub type ConnId = std::os::fd::RawFd;

#[cfg(not(unix))]
/// Stable per-connection identity, also used as the worker-routing key.
pub type ConnId = i32;

#[cfg(unix)]
pub(crate) fn conn_id_of(stream: &tokio::net::TcpStream) -> ConnId {
    use std::os::fd::AsRawFd;
    stream.as_raw_fd()
}

#[cfg(not(unix))]
pub(crate) fn conn_id_of(_stream: &tokio::net::TcpStream) -> ConnId {
    use std::sync::atomic::AtomicI32;
    static NEXT: AtomicI32 = AtomicI32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A message queued to a connection's write loop.
pub(crate) enum Outbound {
    Data(Bytes),
    Close,
}

/// Shared, reference-counted state for one live connection.
///
/// Handed to [`crate::handler::ServiceHandler`] callbacks as an `Arc`; cheap
/// to clone, safe to hold past the callback that received it.
pub struct ConnectionContext {
    id: ConnId,
    protocol: Protocol,
    socket_addr: String,
    x_real_ip: Mutex<Option<String>>,
    x_forwarded_for: Mutex<Option<String>>,
    upgraded: AtomicBool,
    last_activity: AtomicI64,
    user_data: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_requested: AtomicBool,
    close_notify: tokio::sync::Notify,
}

impl ConnectionContext {
    pub(crate) fn new(
        id: ConnId,
        protocol: Protocol,
        socket_addr: String,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id,
            protocol,
            socket_addr,
            x_real_ip: Mutex::new(None),
            x_forwarded_for: Mutex::new(None),
            upgraded: AtomicBool::new(false),
            last_activity: AtomicI64::new(now_unix()),
            user_data: Mutex::new(None),
            outbound,
            close_requested: AtomicBool::new(false),
            close_notify: tokio::sync::Notify::new(),
        }
    }

    /// The connection's routing/identity key.
    pub fn fd(&self) -> ConnId {
        self.id
    }

    /// The transport this connection arrived over.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `true` once the connection is ready to carry application frames (for
    /// TCP this is immediate; for WebSocket it follows a completed upgrade).
    pub fn upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Relaxed)
    }

    pub(crate) fn set_upgraded(&self, v: bool) {
        self.upgraded.store(v, Ordering::Relaxed);
    }

    pub(crate) fn set_headers(&self, x_real_ip: Option<String>, x_forwarded_for: Option<String>) {
        *self.x_real_ip.lock().expect("mutex poisoned") = x_real_ip;
        *self.x_forwarded_for.lock().expect("mutex poisoned") = x_forwarded_for;
    }

    /// The best-effort client address: `X-Forwarded-For` (first hop), else
    /// `X-Real-IP`, else the raw socket peer address.
    pub fn remote_addr(&self) -> String {
        if let Some(xff) = self.x_forwarded_for.lock().expect("mutex poisoned").as_ref() {
            if let Some(first) = xff.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
        if let Some(ip) = self.x_real_ip.lock().expect("mutex poisoned").as_ref() {
            if !ip.is_empty() {
                return ip.clone();
            }
        }
        self.socket_addr.clone()
    }

    /// The raw socket peer address, ignoring any forwarding headers.
    pub fn socket_addr(&self) -> &str {
        &self.socket_addr
    }

    /// Unix timestamp (seconds) of the last inbound frame observed.
    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self) {
        self.last_activity.fetch_max(now_unix(), Ordering::Relaxed);
    }

    /// Stores an opaque, handler-owned value alongside the connection.
    pub fn set_user_data<T: Any + Send + Sync>(&self, data: T) {
        *self.user_data.lock().expect("mutex poisoned") = Some(Box::new(data));
    }

    /// Runs `f` against the stored user data, if any and if it downcasts to `T`.
    pub fn with_user_data<T: Any, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.user_data.lock().expect("mutex poisoned");
        f(guard.as_ref().and_then(|b| b.downcast_ref::<T>()))
    }

    /// Queues `payload` for delivery to the peer. The call never blocks; the
    /// write loop applies backpressure and framing independently.
    pub fn write(&self, payload: &[u8]) -> crate::error::Result<()> {
        if payload.is_empty() {
            return Err(crate::error::ServiceError::ZeroLengthFrame);
        }
        self.outbound
            .send(Outbound::Data(Bytes::copy_from_slice(payload)))
            .map_err(|_| {
                crate::error::ServiceError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection already closed",
                ))
            })
    }

    /// Requests that the connection be closed. Idempotent; safe to call
    /// concurrently from any task, including while the read loop is blocked
    /// waiting for more bytes.
    pub fn close(&self) {
        self.close_requested.store(true, Ordering::Relaxed);
        self.close_notify.notify_one();
        let _ = self.outbound.send(Outbound::Close);
    }

    /// `true` once [`ConnectionContext::close`] has been called.
    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Relaxed)
    }

    /// Resolves once [`ConnectionContext::close`] has been requested.
    pub(crate) async fn closed(&self) {
        if self.close_requested() {
            return;
        }
        self.close_notify.notified().await;
    }
}
