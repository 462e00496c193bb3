//! End-to-end tests against a real loopback `Service`.

use netcore::{ConnectionContext, HandlerError, Service, ServiceConfig, ServiceState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct EchoHandler {
    connected: Arc<AtomicUsize>,
    disconnected: Arc<AtomicUsize>,
}

impl netcore::ServiceHandler for EchoHandler {
    async fn on_connected(&self, _ctx: &Arc<ConnectionContext>) -> Result<(), HandlerError> {
        self.connected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disconnected(&self, _ctx: &Arc<ConnectionContext>) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_data(&self, ctx: &Arc<ConnectionContext>, payload: &[u8]) -> Result<(), HandlerError> {
        ctx.write(payload).map_err(|e| Box::new(e) as HandlerError)
    }
}

fn base_config() -> ServiceConfig {
    ServiceConfig {
        tcp_host: Some("127.0.0.1:0".parse().unwrap()),
        ws_host: None,
        head_blend: 0x1234_5678,
        ..ServiceConfig::default()
    }
}

fn write_frame(head_blend: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&((payload.len() as u32) ^ head_blend).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

async fn read_frame(stream: &mut TcpStream, head_blend: u32) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = (u32::from_be_bytes(header) ^ head_blend) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn echoes_a_single_tcp_frame_round_trip() {
    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let service = Service::new(
        base_config(),
        EchoHandler {
            connected: connected.clone(),
            disconnected: disconnected.clone(),
        },
    )
    .unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&write_frame(0x1234_5678, b"hello"))
        .await
        .unwrap();
    let echoed = read_frame(&mut stream, 0x1234_5678).await;
    assert_eq!(echoed, b"hello");

    drop(stream);
    service.stop();
    run_handle.await.unwrap().unwrap();

    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn preserves_per_connection_ordering_under_many_frames() {
    let service = Service::new(
        base_config(),
        EchoHandler {
            connected: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        },
    )
    .unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    const N: u32 = 2000;
    for i in 0..N {
        stream
            .write_all(&write_frame(0x1234_5678, &i.to_be_bytes()))
            .await
            .unwrap();
        let echoed = read_frame(&mut stream, 0x1234_5678).await;
        assert_eq!(u32::from_be_bytes(echoed.try_into().unwrap()), i);
    }

    drop(stream);
    service.stop();
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejects_connections_once_max_conn_is_reached() {
    let mut config = base_config();
    config.max_conn = 1;
    let service = Service::new(
        config,
        EchoHandler {
            connected: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        },
    )
    .unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();

    let _first = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read_result = second.read(&mut buf).await;
    assert!(matches!(read_result, Ok(0)) || read_result.is_err());

    service.stop();
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn closes_the_connection_on_a_malformed_frame() {
    let service = Service::new(
        base_config(),
        EchoHandler {
            connected: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        },
    )
    .unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // A declared length of zero is invalid regardless of mask.
    stream.write_all(&0u32.to_be_bytes()).await.unwrap();

    let mut buf = [0u8; 1];
    let read_result = stream.read(&mut buf).await;
    assert!(matches!(read_result, Ok(0)) || read_result.is_err());

    service.stop();
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn run_and_stop_are_idempotent() {
    let service = Service::new(
        base_config(),
        EchoHandler {
            connected: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        },
    )
    .unwrap();

    assert_eq!(service.state(), ServiceState::Stopped);

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let _ = service.tcp_local_addr().await.unwrap();

    // A second concurrent run() call must be a no-op, not a second listener.
    let second_run = service.clone().run().await;
    assert!(second_run.is_ok());

    service.stop();
    service.stop(); // idempotent
    run_handle.await.unwrap().unwrap();

    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn unlimited_max_conn_accepts_many_clients() {
    let service = Service::new(
        base_config(),
        EchoHandler {
            connected: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        },
    )
    .unwrap();
    assert_eq!(service.info().max_conn, 0);

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();

    let mut streams = Vec::new();
    for _ in 0..32 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.info().curr_conn, 32);

    drop(streams);
    service.stop();
    run_handle.await.unwrap().unwrap();
}
