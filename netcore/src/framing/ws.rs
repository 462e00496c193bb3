//! WebSocket upgrade and binary-frame adapter over `tokio-tungstenite`.
//!
//! Only the binary-message path is in scope here; text frames, and anything
//! beyond the automatic handshake and a binary send/receive, are left to the
//! underlying library's defaults.

use crate::error::Result;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Forwarding headers captured during the upgrade handshake.
pub(crate) struct CapturedHeaders {
    pub x_real_ip: Option<String>,
    pub x_forwarded_for: Option<String>,
}

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Performs the WebSocket handshake on an already-accepted TCP stream,
/// capturing `X-Real-IP` / `X-Forwarded-For` along the way.
pub(crate) async fn upgrade(
    stream: TcpStream,
) -> Result<(WebSocketStream<TcpStream>, CapturedHeaders)> {
    let mut x_real_ip = None;
    let mut x_forwarded_for = None;

    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        x_real_ip = header_value(req, "X-Real-IP");
        x_forwarded_for = header_value(req, "X-Forwarded-For");
        Ok(resp)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    Ok((
        ws,
        CapturedHeaders {
            x_real_ip,
            x_forwarded_for,
        },
    ))
}

/// Wraps `payload` as a binary WebSocket message.
pub(crate) fn encode_binary(payload: &[u8]) -> Message {
    Message::Binary(payload.to_vec().into())
}
