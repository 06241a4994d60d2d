// tests/relay_accounting.rs
//! End-to-end: listener → relay → accounting → SQLite

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use traffic_gateway::interception::{
    ConnectFuture, DestinationResolver, OutboundConnector, StaticResolver, TcpConnector,
};
use traffic_gateway::recording::{ConnectionStatus, UNRESOLVED_MAC};
use traffic_gateway::{AccountingSink, GatewayConfig, GatewayError, TrafficStore, TransparentListener};

struct AbsentOption;

impl DestinationResolver for AbsentOption {
    fn resolve(&self, _stream: &TcpStream) -> traffic_gateway::Result<SocketAddr> {
        Err(GatewayError::Resolution("SO_ORIGINAL_DST unavailable".to_string()))
    }
}

/// Outbound connect that never completes; `guard` lives as long as it does
struct StalledConnector {
    guard: Arc<()>,
}

impl OutboundConnector for StalledConnector {
    fn connect(&self, _destination: SocketAddr) -> ConnectFuture<'_> {
        let guard = Arc::clone(&self.guard);
        Box::pin(async move {
            let _held = guard;
            std::future::pending::<std::io::Result<TcpStream>>().await
        })
    }
}

struct Gateway {
    addr: SocketAddr,
    store: TrafficStore,
    stop: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl Gateway {
    async fn start(resolver: Arc<dyn DestinationResolver>, connect_timeout_secs: u64) -> Self {
        Self::start_with(resolver, Arc::new(TcpConnector), connect_timeout_secs).await
    }

    async fn start_with(
        resolver: Arc<dyn DestinationResolver>,
        connector: Arc<dyn OutboundConnector>,
        connect_timeout_secs: u64,
    ) -> Self {
        let config = GatewayConfig {
            port: 0,
            bind_addr: "127.0.0.1".parse().unwrap(),
            transparent: false,
            connect_timeout_secs,
            ..Default::default()
        };
        let store = TrafficStore::open_in_memory().await.unwrap();
        let listener =
            TransparentListener::bind_with(&config, resolver, AccountingSink::new(store.clone()))
                .unwrap()
                .with_connector(connector);
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run_until(async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            store,
            stop: Some(stop_tx),
            server,
        }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.server.await.unwrap();
    }
}

async fn wait_for_connections(store: &TrafficStore, expected: u64) {
    for _ in 0..250 {
        if store.connection_count().await.unwrap() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {} connection records", expected);
}

/// Echo-style destination: reads everything, then answers with `reply_len` bytes
async fn spawn_destination(reply_len: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                stream.read_to_end(&mut request).await.unwrap();
                stream.write_all(&vec![0x5A; reply_len]).await.unwrap();
                stream.shutdown().await.unwrap();
            });
        }
    });

    addr
}

async fn exchange(proxy: SocketAddr, payload_len: usize) -> usize {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&vec![0xA5; payload_len]).await.unwrap();
    client.shutdown().await.unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    reply.len()
}

#[tokio::test]
async fn test_single_session_is_recorded() {
    let destination = spawn_destination(2048).await;
    let gateway = Gateway::start(Arc::new(StaticResolver(destination)), 10).await;

    assert_eq!(exchange(gateway.addr, 1024).await, 2048);
    wait_for_connections(&gateway.store, 1).await;

    let records = gateway.store.recent_connections(10).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.bytes_sent, 1024);
    assert_eq!(record.bytes_received, 2048);
    assert_eq!(record.status, ConnectionStatus::Closed);
    assert_eq!(record.dst_ip, destination.ip());
    assert_eq!(record.dst_port, destination.port());
    assert!(record.duration_seconds >= 0.0);

    let device = gateway
        .store
        .device_by_ip(record.src_ip)
        .await
        .unwrap()
        .expect("device created for source");
    assert_eq!(device.mac_address, UNRESOLVED_MAC);
    assert_eq!(device.connection_count, 1);
    assert_eq!(device.total_bytes_sent, 1024);
    assert_eq!(device.total_bytes_received, 2048);

    gateway.stop().await;
}

#[tokio::test]
async fn test_concurrent_sessions_keep_device_totals_consistent() {
    const SESSIONS: usize = 12;

    let destination = spawn_destination(300).await;
    let gateway = Gateway::start(Arc::new(StaticResolver(destination)), 10).await;

    let clients: Vec<_> = (0..SESSIONS)
        .map(|i| {
            let proxy = gateway.addr;
            tokio::spawn(async move { exchange(proxy, 100 + i).await })
        })
        .collect();
    for client in clients {
        assert_eq!(client.await.unwrap(), 300);
    }

    wait_for_connections(&gateway.store, SESSIONS as u64).await;

    let source = "127.0.0.1".parse().unwrap();
    let totals = gateway.store.source_totals(source).await.unwrap();
    let device = gateway.store.device_by_ip(source).await.unwrap().unwrap();

    let expected_sent: u64 = (0..SESSIONS).map(|i| (100 + i) as u64).sum();
    assert_eq!(totals.connections, SESSIONS as u64);
    assert_eq!(totals.bytes_sent, expected_sent);
    assert_eq!(device.connection_count, totals.connections);
    assert_eq!(device.total_bytes_sent, totals.bytes_sent);
    assert_eq!(device.total_bytes_received, totals.bytes_received);
    assert_eq!(device.total_bytes_received, 300 * SESSIONS as u64);

    gateway.stop().await;
}

#[tokio::test]
async fn test_resolution_failure_records_nothing() {
    let gateway = Gateway::start(Arc::new(AbsentOption), 10).await;

    let mut client = TcpStream::connect(gateway.addr).await.unwrap();
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .expect("client socket closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.store.connection_count().await.unwrap(), 0);
    assert!(gateway.store.devices().await.unwrap().is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn test_connect_timeout_records_nothing() {
    let guard = Arc::new(());
    let connector = Arc::new(StalledConnector {
        guard: Arc::clone(&guard),
    });
    let destination: SocketAddr = "93.184.216.34:443".parse().unwrap();
    let gateway = Gateway::start_with(Arc::new(StaticResolver(destination)), connector, 1).await;

    let mut client = TcpStream::connect(gateway.addr).await.unwrap();
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .expect("client socket closed after connect timeout")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // The pending outbound connect was dropped with the session; only this
    // test and the listener's connector still hold the guard
    for _ in 0..50 {
        if Arc::strong_count(&guard) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(Arc::strong_count(&guard), 2);

    assert_eq!(gateway.store.connection_count().await.unwrap(), 0);
    assert!(gateway.store.devices().await.unwrap().is_empty());

    gateway.stop().await;
}
