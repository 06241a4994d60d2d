// src/interception/relay.rs
//! Relay session: one accepted connection end to end
//!
//! # Lifecycle
//!
//! ```text
//! Resolving ──fail──► Aborted (client closed, nothing recorded)
//!     │
//!     ▼
//! Connecting ──fail/timeout──► Aborted
//!     │
//!     ▼
//! Relaying   client→destination ┐ run concurrently until
//!            destination→client ┘ both have ended
//!     │
//!     ▼
//! Closing ──► Closed (FinishedSession handed to accounting)
//! ```
//!
//! Each direction owns its byte counter. A direction ends on end-of-stream
//! or on its own I/O error; the other direction keeps running, so half-closed
//! connections drain fully.

use crate::interception::original_dst::DestinationResolver;
use crate::interception::registry::{ActiveSession, SessionRegistry};
use crate::recording::records::{ConnectionRecord, ConnectionStatus};
use crate::utils::config::GatewayConfig;
use crate::utils::errors::{Direction, GatewayError, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use ulid::Ulid;

/// Per-session relay settings
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Chunk size for each read
    pub buffer_size: usize,

    /// Bound on the outbound connect
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&GatewayConfig> for RelayConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Pending outbound connection
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<TcpStream>> + Send + 'a>>;

/// Opens the outbound leg of a session
pub trait OutboundConnector: Send + Sync + 'static {
    fn connect(&self, destination: SocketAddr) -> ConnectFuture<'_>;
}

/// Plain `TcpStream::connect`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl OutboundConnector for TcpConnector {
    fn connect(&self, destination: SocketAddr) -> ConnectFuture<'_> {
        Box::pin(TcpStream::connect(destination))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Connecting,
    Relaying,
    Closing,
    Closed,
    Aborted,
}

/// Totals of a session that reached `Closed`
#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub id: Ulid,
    pub source: SocketAddr,
    pub destination: SocketAddr,

    /// Wall-clock time the outbound connect began
    pub started_at: DateTime<Utc>,

    /// From the start of Connecting until both directions ended, so the
    /// outbound connect latency is included
    pub duration: Duration,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub status: ConnectionStatus,
}

impl FinishedSession {
    pub fn to_record(&self) -> ConnectionRecord {
        ConnectionRecord {
            timestamp: self.started_at,
            src_ip: self.source.ip(),
            src_port: self.source.port(),
            dst_ip: self.destination.ip(),
            dst_port: self.destination.port(),
            dst_domain: None,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            duration_seconds: self.duration.as_secs_f64(),
            status: self.status,
        }
    }
}

/// How one relay direction ended
#[derive(Debug, Default)]
pub struct DirectionOutcome {
    /// Bytes accepted by the writer
    pub bytes: u64,

    /// `None` on orderly end-of-stream
    pub error: Option<std::io::Error>,
}

/// Copy `reader` into `writer` until end-of-stream or error.
///
/// The count advances only by what each `write` call accepted, so a failed
/// partial write is never over-counted. On exit the writer is shut down so
/// the peer sees the half-close.
pub async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> DirectionOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut outcome = DirectionOutcome::default();

    'relay: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        };

        let mut written = 0;
        while written < n {
            match writer.write(&buf[written..n]).await {
                Ok(0) => {
                    outcome.error = Some(ErrorKind::WriteZero.into());
                    break 'relay;
                }
                Ok(w) => {
                    written += w;
                    outcome.bytes += w as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome.error = Some(e);
                    break 'relay;
                }
            }
        }
    }

    // Best-effort; a peer that already went away sees a reset instead.
    let _ = writer.shutdown().await;
    outcome
}

/// Terminal status from both direction outcomes
pub fn classify(upstream: &DirectionOutcome, downstream: &DirectionOutcome) -> ConnectionStatus {
    let mut status = ConnectionStatus::Closed;

    for error in [&upstream.error, &downstream.error].into_iter().flatten() {
        match error.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => {}
            ErrorKind::TimedOut => return ConnectionStatus::Timeout,
            _ => status = ConnectionStatus::Error,
        }
    }

    status
}

/// One accepted connection and, once connected, its outbound peer
pub struct RelaySession {
    id: Ulid,
    source: SocketAddr,
    client: Option<TcpStream>,
    upstream: Option<TcpStream>,
    state: SessionState,
    config: RelayConfig,
    connector: Arc<dyn OutboundConnector>,
}

impl RelaySession {
    pub fn new(client: TcpStream, source: SocketAddr, config: RelayConfig) -> Self {
        Self {
            id: Ulid::new(),
            source,
            client: Some(client),
            upstream: None,
            state: SessionState::Resolving,
            config,
            connector: Arc::new(TcpConnector),
        }
    }

    /// Replace how the outbound leg is opened
    pub fn with_connector(mut self, connector: Arc<dyn OutboundConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to `Closed`, or to `Aborted` on resolution or
    /// connect failure. Both sockets are closed on every exit path.
    pub async fn run(
        mut self,
        resolver: &dyn DestinationResolver,
        registry: &SessionRegistry,
    ) -> Result<FinishedSession> {
        let resolved = match &self.client {
            Some(client) => resolver.resolve(client),
            None => Err(GatewayError::Resolution("client socket already closed".to_string())),
        };
        let destination = match resolved {
            Ok(destination) => destination,
            Err(e) => return Err(self.abort(e)),
        };

        self.state = SessionState::Connecting;
        let started = Instant::now();
        let started_at = Utc::now();

        let connecting = connect(
            self.connector.as_ref(),
            destination,
            self.config.connect_timeout,
        )
        .await;
        let upstream = match connecting {
            Ok(stream) => stream,
            Err(e) => return Err(self.abort(e)),
        };
        self.upstream = Some(upstream);

        info!("Connection {} -> {}", self.source, destination);

        let _registration = registry.register(ActiveSession {
            id: self.id,
            source: self.source,
            destination,
            started_at,
        });

        self.state = SessionState::Relaying;
        let (upstream, downstream) = self.relay().await;

        self.state = SessionState::Closing;
        self.close();

        let finished = FinishedSession {
            id: self.id,
            source: self.source,
            destination,
            started_at,
            duration: started.elapsed(),
            bytes_sent: upstream.bytes,
            bytes_received: downstream.bytes,
            status: classify(&upstream, &downstream),
        };
        self.state = SessionState::Closed;

        for (direction, error) in [
            (Direction::Upstream, upstream.error),
            (Direction::Downstream, downstream.error),
        ] {
            if let Some(source) = error {
                let error = GatewayError::RelayIo { direction, source };
                debug!(error = %error, "Relay direction ended early");
            }
        }

        counter!("gateway_bytes_sent_total").increment(finished.bytes_sent);
        counter!("gateway_bytes_received_total").increment(finished.bytes_received);
        counter!("gateway_sessions_completed_total", "status" => finished.status.as_str())
            .increment(1);

        Ok(finished)
    }

    async fn relay(&mut self) -> (DirectionOutcome, DirectionOutcome) {
        let buffer_size = self.config.buffer_size;
        let (Some(client), Some(upstream)) = (self.client.as_mut(), self.upstream.as_mut()) else {
            return (DirectionOutcome::default(), DirectionOutcome::default());
        };

        let (mut client_read, mut client_write) = client.split();
        let (mut upstream_read, mut upstream_write) = upstream.split();

        tokio::join!(
            pump(&mut client_read, &mut upstream_write, buffer_size),
            pump(&mut upstream_read, &mut client_write, buffer_size),
        )
    }

    fn abort(&mut self, error: GatewayError) -> GatewayError {
        self.close();
        self.state = SessionState::Aborted;
        error
    }

    /// Close both sockets. Returns `false` if nothing was left open.
    pub fn close(&mut self) -> bool {
        let client = self.client.take().is_some();
        let upstream = self.upstream.take().is_some();
        client || upstream
    }
}

async fn connect(
    connector: &dyn OutboundConnector,
    destination: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, connector.connect(destination)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(GatewayError::OutboundConnect {
            addr: destination,
            source: e,
        }),
        // Dropping the pending connect closes its socket.
        Err(_) => Err(GatewayError::OutboundConnect {
            addr: destination,
            source: std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
        }),
    }
}
