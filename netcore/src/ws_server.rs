//! WebSocket listener: accept loop, admission control, handshake, and the
//! per-connection read/write tasks.

use crate::conn::{conn_id_of, ConnectionContext, Outbound, Protocol};
use crate::error::Result;
use crate::handler::ServiceHandler;
use crate::message::MessageEnvelope;
use crate::service::Service;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run<H: ServiceHandler + 'static>(
    svc: Arc<Service<H>>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    svc.set_ws_bound(local_addr);
    tracing::info!(%local_addr, "websocket listener bound");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if !svc.admit() {
                            tracing::warn!(%peer, "websocket connection rejected: max_conn reached");
                            continue;
                        }
                        let spawned = svc.clone();
                        svc.conn_tasks().spawn(async move {
                            if let Err(err) = handle_connection(spawned, stream, peer).await {
                                tracing::error!(%peer, error = %err, "websocket connection ended with an error");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "websocket accept error"),
                }
            }
        }
    }

    tracing::info!(%addr, "websocket listener stopped");
    Ok(())
}

async fn handle_connection<H: ServiceHandler + 'static>(
    svc: Arc<Service<H>>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let fd = conn_id_of(&stream);
    let (ws_stream, headers) = match crate::framing::ws::upgrade(stream).await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "websocket handshake failed");
            return Ok(());
        }
    };
    let (mut sink, mut incoming) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let ctx = Arc::new(ConnectionContext::new(
        fd,
        Protocol::WebSocket,
        peer.to_string(),
        outbound_tx,
    ));
    ctx.set_headers(headers.x_real_ip, headers.x_forwarded_for);
    ctx.set_upgraded(true);

    if let Err(err) = svc.handler.on_connected(&ctx).await {
        tracing::warn!(fd, error = %err, "on_connected rejected websocket connection");
        return Ok(());
    }
    svc.register(ctx.clone());

    let write_task = {
        let on_encrypt = svc.config.on_encrypt;
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                match msg {
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Outbound::Data(payload) => {
                        let payload = match on_encrypt {
                            Some(f) => f(&payload),
                            None => payload.to_vec(),
                        };
                        if sink
                            .send(crate::framing::ws::encode_binary(&payload))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        })
    };

    let result: Result<()> = loop {
        if ctx.close_requested() {
            break Ok(());
        }
        tokio::select! {
            _ = ctx.closed() => break Ok(()),
            msg = incoming.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        ctx.touch();
                        let decoded: Vec<u8> = match svc.config.on_decrypt {
                            Some(f) => f(&data),
                            None => data.to_vec(),
                        };
                        let envelope = MessageEnvelope::take(&svc.payload_pool, ctx.clone(), &decoded);
                        svc.push_message(envelope).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(fd, ?frame, "websocket clean close");
                        break Ok(());
                    }
                    Some(Ok(_)) => {
                        // ping/pong/text: outside the binary-only scope of this core.
                    }
                    Some(Err(err)) => {
                        tracing::warn!(fd, error = %err, "websocket read error, closing connection");
                        break Ok(());
                    }
                    None => {
                        tracing::debug!(fd, "websocket stream ended");
                        break Ok(());
                    }
                }
            }
        }
    };

    ctx.close();
    write_task.abort();
    svc.unregister(fd);
    svc.handler.on_disconnected(&ctx).await;

    result
}
