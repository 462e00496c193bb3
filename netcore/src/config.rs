//! Service configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Construction-time and runtime tuning knobs for a [`crate::service::Service`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address to bind the raw TCP listener on. At least one of `tcp_host`
    /// / `ws_host` must be set.
    pub tcp_host: Option<SocketAddr>,
    /// Address to bind the WebSocket listener on.
    pub ws_host: Option<SocketAddr>,
    /// Maximum concurrently tracked connections across both listeners.
    /// `0` means unlimited.
    pub max_conn: usize,
    /// XOR mask applied to the 4-byte TCP frame length header. Must be
    /// non-zero.
    pub head_blend: u32,
    /// Connections idle longer than this are closed by the idle sweep.
    /// `<= 0` disables the sweep.
    pub idle_timeout_secs: i64,
    /// Number of worker tasks. `0` selects `available_parallelism()`.
    pub worker_count: usize,
    /// Bounded queue capacity per worker. `0` selects a default of 1000.
    pub worker_queue_capacity: usize,
    /// Optional transform applied to outbound payloads before framing.
    #[serde(skip)]
    pub on_encrypt: Option<fn(&[u8]) -> Vec<u8>>,
    /// Optional transform applied to inbound payloads after framing.
    #[serde(skip)]
    pub on_decrypt: Option<fn(&[u8]) -> Vec<u8>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tcp_host: None,
            ws_host: None,
            max_conn: 0,
            head_blend: 0,
            idle_timeout_secs: 0,
            worker_count: 0,
            worker_queue_capacity: 1_000,
            on_encrypt: None,
            on_decrypt: None,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from environment variables, falling back to
    /// [`ServiceConfig::default`] for anything unset. Reads a `.env` file in
    /// the working directory first, if one exists.
    ///
    /// Recognized variables: `NETCORE_TCP_HOST`, `NETCORE_WS_HOST`,
    /// `NETCORE_MAX_CONN`, `NETCORE_HEAD_BLEND`, `NETCORE_IDLE_TIMEOUT_SECS`,
    /// `NETCORE_WORKER_COUNT`, `NETCORE_WORKER_QUEUE_CAPACITY`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("NETCORE_TCP_HOST") {
            cfg.tcp_host = v.parse().ok();
        }
        if let Ok(v) = std::env::var("NETCORE_WS_HOST") {
            cfg.ws_host = v.parse().ok();
        }
        if let Ok(v) = std::env::var("NETCORE_MAX_CONN") {
            if let Ok(n) = v.parse() {
                cfg.max_conn = n;
            }
        }
        if let Ok(v) = std::env::var("NETCORE_HEAD_BLEND") {
            if let Ok(n) = v.parse() {
                cfg.head_blend = n;
            }
        }
        if let Ok(v) = std::env::var("NETCORE_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("NETCORE_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("NETCORE_WORKER_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.worker_queue_capacity = n;
            }
        }

        cfg
    }
}
