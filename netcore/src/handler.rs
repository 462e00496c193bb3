//! The callback surface application code implements.

use crate::conn::ConnectionContext;
use crate::service::Service;
use std::error::Error;
use std::sync::Arc;

/// Boxed error type returned by handler callbacks.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Lifecycle callbacks invoked by a running [`Service`].
///
/// Implementations are shared across every connection and worker via `Arc`,
/// so methods take `&self`; interior mutability is the implementor's
/// responsibility. Uses native `async fn` in traits rather than pulling in
/// an `async-trait` dependency this crate otherwise has no use for.
pub trait ServiceHandler: Send + Sync {
    /// Runs once, after workers are spawned but before any listener accepts
    /// a connection. A returned error aborts startup before binding.
    fn on_init(
        &self,
        _service: &Arc<Service<Self>>,
    ) -> impl std::future::Future<Output = Result<(), HandlerError>> + Send
    where
        Self: Sized + 'static,
    {
        async { Ok(()) }
    }

    /// Runs after admission control accepts a new socket but before it is
    /// registered in the connection table. A returned error closes the
    /// socket immediately without registering it.
    fn on_connected(
        &self,
        ctx: &Arc<ConnectionContext>,
    ) -> impl std::future::Future<Output = Result<(), HandlerError>> + Send;

    /// Runs once a connection leaves the table, for any reason (peer close,
    /// protocol error, idle timeout, or shutdown drain).
    fn on_disconnected(&self, ctx: &Arc<ConnectionContext>) -> impl std::future::Future<Output = ()> + Send;

    /// Runs on a worker task for each decoded frame. A returned error closes
    /// the connection after this call returns.
    fn on_data(
        &self,
        ctx: &Arc<ConnectionContext>,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<(), HandlerError>> + Send;

    /// Runs once every listener and the idle sweep have exited, just before
    /// the service returns to the `Stopped` state.
    fn on_stopped(
        &self,
        _service: &Arc<Service<Self>>,
    ) -> impl std::future::Future<Output = ()> + Send
    where
        Self: Sized + 'static,
    {
        async {}
    }
}
