//! Raw TCP listener: accept loop, admission control, and the per-connection
//! read/write tasks.

use crate::conn::{conn_id_of, ConnectionContext, Outbound, Protocol};
use crate::error::Result;
use crate::handler::ServiceHandler;
use crate::message::MessageEnvelope;
use crate::service::Service;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run<H: ServiceHandler + 'static>(
    svc: Arc<Service<H>>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    svc.set_tcp_bound(local_addr);
    tracing::info!(%local_addr, "tcp listener bound");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if !svc.admit() {
                            tracing::warn!(%peer, "tcp connection rejected: max_conn reached");
                            continue;
                        }
                        let spawned = svc.clone();
                        svc.conn_tasks().spawn(async move {
                            if let Err(err) = handle_connection(spawned, stream, peer).await {
                                tracing::error!(%peer, error = %err, "tcp connection ended with an error");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "tcp accept error"),
                }
            }
        }
    }

    tracing::info!(%addr, "tcp listener stopped");
    Ok(())
}

async fn handle_connection<H: ServiceHandler + 'static>(
    svc: Arc<Service<H>>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let fd = conn_id_of(&stream);
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let ctx = Arc::new(ConnectionContext::new(
        fd,
        Protocol::Tcp,
        peer.to_string(),
        outbound_tx,
    ));
    ctx.set_upgraded(true);

    if let Err(err) = svc.handler.on_connected(&ctx).await {
        tracing::warn!(fd, error = %err, "on_connected rejected tcp connection");
        return Ok(());
    }
    svc.register(ctx.clone());

    let write_task = {
        let buffer_pool = svc.buffer_pool.clone();
        let head_blend = svc.config.head_blend;
        let on_encrypt = svc.config.on_encrypt;
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                match msg {
                    Outbound::Close => break,
                    Outbound::Data(payload) => {
                        let payload = match on_encrypt {
                            Some(f) => f(&payload),
                            None => payload.to_vec(),
                        };
                        let mut buf = buffer_pool.get();
                        buf.reset();
                        if let Err(err) =
                            crate::framing::tcp::encode_into(&mut buf, &payload, head_blend)
                        {
                            tracing::error!(error = %err, "dropping unencodable outbound tcp frame");
                            buffer_pool.put(buf);
                            continue;
                        }
                        let write_res = write_half.write_all(buf.bytes()).await;
                        buffer_pool.put(buf);
                        if let Err(err) = write_res {
                            tracing::debug!(error = %err, "tcp write failed, closing");
                            break;
                        }
                    }
                }
            }
        })
    };

    let mut acc = BytesMut::with_capacity(4096);
    let mut read_buf = [0u8; 8192];
    let mut frames = Vec::new();

    let result: Result<()> = loop {
        if ctx.close_requested() {
            break Ok(());
        }
        tokio::select! {
            _ = ctx.closed() => break Ok(()),
            read_res = read_half.read(&mut read_buf) => {
                match read_res {
                    Ok(0) => {
                        tracing::debug!(fd, "tcp peer closed");
                        break Ok(());
                    }
                    Ok(n) => {
                        acc.extend_from_slice(&read_buf[..n]);
                        frames.clear();
                        if let Err(err) = crate::framing::tcp::decode_frames(&mut acc, svc.config.head_blend, &mut frames) {
                            tracing::warn!(fd, error = %err, "bad tcp frame, closing connection");
                            break Err(err);
                        }
                        for payload in frames.drain(..) {
                            ctx.touch();
                            let decoded = match svc.config.on_decrypt {
                                Some(f) => f(&payload),
                                None => payload.to_vec(),
                            };
                            let envelope = MessageEnvelope::take(&svc.payload_pool, ctx.clone(), &decoded);
                            svc.push_message(envelope).await;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(fd, error = %err, "tcp read error, closing connection");
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
