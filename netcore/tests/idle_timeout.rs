//! Idle-sweep behavior on a scaled-down timeout.

use netcore::{ConnectionContext, HandlerError, Service, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

struct NoopHandler;

impl netcore::ServiceHandler for NoopHandler {
    async fn on_connected(&self, _ctx: &Arc<ConnectionContext>) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_disconnected(&self, _ctx: &Arc<ConnectionContext>) {}

    async fn on_data(&self, _ctx: &Arc<ConnectionContext>, _payload: &[u8]) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[tokio::test]
async fn idle_connections_are_closed_after_the_configured_timeout() {
    // The sweep interval tracks idle_timeout_secs (clamped to [1, 15]), so a
    // 1s timeout sweeps on a roughly 1s cadence.
    let config = ServiceConfig {
        tcp_host: Some("127.0.0.1:0".parse().unwrap()),
        ws_host: None,
        head_blend: 0xDEAD_BEEF,
        idle_timeout_secs: 1,
        ..ServiceConfig::default()
    };
    let service = Service::new(config, NoopHandler).unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.info().curr_conn, 1);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 1];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "idle connection was not closed in time");

    service.stop();
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn a_nonpositive_timeout_disables_the_sweep() {
    let config = ServiceConfig {
        tcp_host: Some("127.0.0.1:0".parse().unwrap()),
        ws_host: None,
        head_blend: 0xDEAD_BEEF,
        idle_timeout_secs: 0,
        ..ServiceConfig::default()
    };
    let service = Service::new(config, NoopHandler).unwrap();

    let run_handle = {
        let svc = service.clone();
        tokio::spawn(async move { svc.run().await })
    };
    let addr = service.tcp_local_addr().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.info().curr_conn, 1, "sweep must not run when disabled");

    drop(stream);
    service.stop();
    run_handle.await.unwrap().unwrap();
}
