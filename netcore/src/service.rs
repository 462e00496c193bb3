//! Service lifecycle: construction, the run loop, and the connection table.

use crate::buffer::Buffer;
use crate::config::ServiceConfig;
use crate::conn::{ConnId, ConnectionContext};
use crate::error::{Result, ServiceError};
use crate::handler::ServiceHandler;
use crate::message::MessageEnvelope;
use crate::pool::Pool;
use crate::worker::WorkerPool;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The coarse lifecycle state of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ServiceState {
    /// No listener is bound; `run` has either never been called or has
    /// fully returned.
    Stopped = 0,
    /// Listeners are bound and accepting.
    Running = 1,
    /// `stop` has been called; listeners are being torn down and
    /// connections drained.
    Stopping = 2,
}

impl From<u8> for ServiceState {
    fn from(v: u8) -> Self {
        match v {
            1 => ServiceState::Running,
            2 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }
}

/// A point-in-time snapshot of a service's lifecycle and load.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Current lifecycle state.
    pub state: ServiceState,
    /// Connections currently registered in the connection table.
    pub curr_conn: usize,
    /// Configured connection cap (`0` = unlimited).
    pub max_conn: usize,
    /// Configured idle timeout in seconds (`<= 0` = disabled).
    pub idle_timeout_secs: i64,
    /// Configured TCP listen address, if any.
    pub tcp_host: Option<SocketAddr>,
    /// Configured WebSocket listen address, if any.
    pub ws_host: Option<SocketAddr>,
}

struct ConnTable {
    inner: RwLock<HashMap<ConnId, Arc<ConnectionContext>>>,
}

impl ConnTable {
    fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, ctx: Arc<ConnectionContext>) {
        self.inner
            .write()
            .expect("conn table lock poisoned")
            .insert(ctx.fd(), ctx);
    }

    fn remove(&self, id: ConnId) {
        self.inner.write().expect("conn table lock poisoned").remove(&id);
    }

    fn count(&self) -> usize {
        self.inner.read().expect("conn table lock poisoned").len()
    }

    fn snapshot(&self) -> Vec<Arc<ConnectionContext>> {
        self.inner
            .read()
            .expect("conn table lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// A running (or runnable) TCP + WebSocket service, generic over the
/// application-supplied handler.
pub struct Service<H: ServiceHandler + 'static> {
    state: AtomicU8,
    pub(crate) config: ServiceConfig,
    conns: ConnTable,
    curr_conn: AtomicUsize,
    pub(crate) handler: Arc<H>,
    workers: RwLock<Option<WorkerPool>>,
    cancel: RwLock<Option<CancellationToken>>,
    pub(crate) buffer_pool: Arc<Pool<Buffer>>,
    pub(crate) payload_pool: Arc<Pool<Vec<u8>>>,
    tcp_bound: tokio::sync::watch::Sender<Option<SocketAddr>>,
    ws_bound: tokio::sync::watch::Sender<Option<SocketAddr>>,
    conn_tasks: tokio_util::task::TaskTracker,
}

impl<H: ServiceHandler + 'static> Service<H> {
    /// Validates `config` and constructs a service around `handler`.
    ///
    /// # Panics
    ///
    /// Panics if `config.head_blend == 0` — a zero mask is a programmer
    /// error, not a runtime condition callers are expected to recover from.
    pub fn new(mut config: ServiceConfig, handler: H) -> Result<Arc<Self>> {
        if config.tcp_host.is_none() && config.ws_host.is_none() {
            return Err(ServiceError::NoListenAddress);
        }
        assert_ne!(config.head_blend, 0, "head_blend must be non-zero");

        if config.worker_count == 0 {
            config.worker_count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        if config.worker_queue_capacity == 0 {
            config.worker_queue_capacity = 1_000;
        }

        Ok(Arc::new(Self {
            state: AtomicU8::new(ServiceState::Stopped as u8),
            config,
            conns: ConnTable::new(),
            curr_conn: AtomicUsize::new(0),
            handler: Arc::new(handler),
            workers: RwLock::new(None),
            cancel: RwLock::new(None),
            buffer_pool: Arc::new(Pool::new(Buffer::new, Buffer::reset)),
            payload_pool: Arc::new(Pool::new(Vec::new, Vec::clear)),
            tcp_bound: tokio::sync::watch::channel(None).0,
            ws_bound: tokio::sync::watch::channel(None).0,
            conn_tasks: tokio_util::task::TaskTracker::new(),
        }))
    }

    pub(crate) fn conn_tasks(&self) -> &tokio_util::task::TaskTracker {
        &self.conn_tasks
    }

    pub(crate) fn set_tcp_bound(&self, addr: SocketAddr) {
        let _ = self.tcp_bound.send(Some(addr));
    }

    pub(crate) fn set_ws_bound(&self, addr: SocketAddr) {
        let _ = self.ws_bound.send(Some(addr));
    }

    /// Resolves once the TCP listener has bound, yielding its actual local
    /// address (useful when `tcp_host`'s port is `0`). Resolves to `None`
    /// immediately if no `tcp_host` was configured.
    pub async fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.config.tcp_host?;
        let mut rx = self.tcp_bound.subscribe();
        loop {
            if let Some(addr) = *rx.borrow() {
                return Some(addr);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Resolves once the WebSocket listener has bound, yielding its actual
    /// local address. Resolves to `None` immediately if no `ws_host` was
    /// configured.
    pub async fn ws_local_addr(&self) -> Option<SocketAddr> {
        self.config.ws_host?;
        let mut rx = self.ws_bound.subscribe();
        loop {
            if let Some(addr) = *rx.borrow() {
                return Some(addr);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        ServiceState::from(self.state.load(Ordering::SeqCst))
    }

    /// A snapshot of lifecycle and load.
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            state: self.state(),
            curr_conn: self.curr_conn.load(Ordering::Relaxed),
            max_conn: self.config.max_conn,
            idle_timeout_secs: self.config.idle_timeout_secs,
            tcp_host: self.config.tcp_host,
            ws_host: self.config.ws_host,
        }
    }

    pub(crate) fn admit(&self) -> bool {
        self.config.max_conn == 0 || self.conns.count() < self.config.max_conn
    }

    pub(crate) fn register(&self, ctx: Arc<ConnectionContext>) {
        self.conns.insert(ctx);
        self.curr_conn.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unregister(&self, id: ConnId) {
        self.conns.remove(id);
        self.curr_conn.fetch_sub(1, Ordering::Relaxed);
    }

    /// Queues `envelope` to the worker responsible for its connection,
    /// applying backpressure if that worker's queue is full. A no-op once
    /// workers have been torn down (i.e. the service is not `Running`).
    pub(crate) async fn push_message(&self, envelope: MessageEnvelope) {
        let sender = {
            let workers = self.workers.read().expect("workers lock poisoned");
            match workers.as_ref() {
                Some(pool) => pool.route(envelope.ctx.fd()).clone(),
                None => return,
            }
        };
        let _ = sender.send(envelope).await;
    }

    /// Starts listeners and runs until every listener task and the idle
    /// sweep have exited. A no-op if the service is not currently `Stopped`.
    /// Returns the first error reported by any listener task, if any.
    ///
    /// Takes `Arc<Self>` by value, since it hands clones of itself to every
    /// listener and worker task it spawns; call it on a clone (`service
    /// .clone().run().await`) to keep the original handle for `stop`.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                ServiceState::Stopped as u8,
                ServiceState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel.write().expect("cancel lock poisoned") = Some(cancel.clone());

        let workers = WorkerPool::spawn(
            self.config.worker_count,
            self.config.worker_queue_capacity,
            self.handler.clone(),
        );
        *self.workers.write().expect("workers lock poisoned") = Some(workers);

        if let Err(err) = self.handler.on_init(&self).await {
            let pool = self.workers.write().expect("workers lock poisoned").take();
            if let Some(pool) = pool {
                pool.shutdown().await;
            }
            self.state.store(ServiceState::Stopped as u8, Ordering::SeqCst);
            return Err(ServiceError::Handler(err));
        }

        let mut join_set = tokio::task::JoinSet::new();

        if let Some(addr) = self.config.tcp_host {
            let svc = self.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move { crate::tcp_server::run(svc, addr, cancel).await });
        }
        if let Some(addr) = self.config.ws_host {
            let svc = self.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move { crate::ws_server::run(svc, addr, cancel).await });
        }
        {
            let svc = self.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move { idle_sweep(svc, cancel).await });
        }

        let mut first_err = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "listener task exited with an error");
                    cancel.cancel();
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "listener task panicked");
                    cancel.cancel();
                }
            }
        }

        self.conn_tasks.close();
        self.conn_tasks.wait().await;

        let pool = self.workers.write().expect("workers lock poisoned").take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
        self.handler.on_stopped(&self).await;
        self.state.store(ServiceState::Stopped as u8, Ordering::SeqCst);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Requests an orderly shutdown: listeners stop accepting, the idle
    /// sweep exits, and worker queues are closed so they drain and exit on
    /// their own. A no-op if the service is not currently `Running`.
    /// Returns once the request has been issued, not once `run` returns.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                ServiceState::Running as u8,
                ServiceState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Some(token) = self.cancel.read().expect("cancel lock poisoned").clone() {
            token.cancel();
        }

        for ctx in self.conns.snapshot() {
            ctx.close();
        }
    }
}

async fn idle_sweep<H: ServiceHandler + 'static>(
    svc: Arc<Service<H>>,
    cancel: CancellationToken,
) -> Result<()> {
    if svc.config.idle_timeout_secs <= 0 {
        cancel.cancelled().await;
        return Ok(());
    }

    let sweep_interval = Duration::from_secs((svc.config.idle_timeout_secs as u64).clamp(1, 15));
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let now = crate::conn::now_unix();
                for ctx in svc.conns.snapshot() {
                    if now - ctx.last_activity() > svc.config.idle_timeout_secs {
                        tracing::debug!(fd = ctx.fd(), "closing idle connection");
                        ctx.close();
                    }
                }
            }
        }
    }
}
