//! Error taxonomy for service construction, startup, and per-connection framing.

/// Errors surfaced by [`crate::service::Service`] construction, its listener
/// tasks, and the framing codecs.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Neither `tcp_host` nor `ws_host` was configured.
    #[error("at least one of tcp_host or ws_host must be set")]
    NoListenAddress,

    /// I/O failure during listener bind, accept, or connection read/write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A decoded or outbound TCP frame length was zero or exceeded the
    /// configured maximum.
    #[error("frame length {len} exceeds the {max} byte limit")]
    FrameTooLarge {
        /// the offending length
        len: u32,
        /// the configured limit
        max: u32,
    },

    /// An outbound or inbound TCP frame declared a length of zero.
    #[error("zero-length frame")]
    ZeroLengthFrame,

    /// WebSocket handshake or frame decode failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The user-supplied handler returned an error from a lifecycle callback.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
