//! Event-driven TCP/WebSocket service core.
//!
//! A [`service::Service`] multiplexes a raw, length-prefixed TCP listener
//! and a binary WebSocket listener behind one connection table and one
//! bounded worker pool, so application code implements a single
//! [`handler::ServiceHandler`] regardless of which transport a client used.

mod buffer;
mod conn;
mod config;
mod error;
mod framing;
mod handler;
mod message;
mod pool;
mod service;
mod tcp_server;
mod worker;
mod ws_server;

pub use conn::{ConnId, ConnectionContext, Protocol};
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use handler::{HandlerError, ServiceHandler};
pub use message::MessageEnvelope;
pub use service::{Service, ServiceInfo, ServiceState};

pub mod framing_limits {
    //! Re-exported wire-format constants application code may want to
    //! reference (e.g. to size its own buffers).
    pub use crate::framing::tcp::MAX_FRAME_LEN;
}
