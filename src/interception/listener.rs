// src/interception/listener.rs
//! Transparent listener
//!
//! Owns the listening socket, accepts redirected connections and spawns one
//! relay session per connection. Accept never waits on relay progress.

use crate::interception::original_dst::{DestinationResolver, OriginalDstResolver};
use crate::interception::registry::SessionRegistry;
use crate::interception::relay::{OutboundConnector, RelayConfig, RelaySession, TcpConnector};
use crate::recording::accounting::AccountingSink;
use crate::utils::config::GatewayConfig;
use crate::utils::errors::{GatewayError, Result};
use metrics::counter;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Accept loop for transparently redirected connections
pub struct TransparentListener {
    listener: TcpListener,
    resolver: Arc<dyn DestinationResolver>,
    sink: AccountingSink,
    connector: Arc<dyn OutboundConnector>,
    registry: SessionRegistry,
    relay_config: RelayConfig,
}

impl TransparentListener {
    /// Bind using `SO_ORIGINAL_DST` for destination recovery.
    ///
    /// The resolver is told the bound address so it can refuse connections
    /// aimed at the listener itself.
    pub fn bind(config: &GatewayConfig, sink: AccountingSink) -> Result<Self> {
        let listener = bind_socket(config)?;
        let listen_addr = listener_addr(&listener)?;
        Ok(Self::assemble(
            config,
            listener,
            Arc::new(OriginalDstResolver::new(listen_addr)),
            sink,
        ))
    }

    /// Bind with an explicit destination resolver
    pub fn bind_with(
        config: &GatewayConfig,
        resolver: Arc<dyn DestinationResolver>,
        sink: AccountingSink,
    ) -> Result<Self> {
        let listener = bind_socket(config)?;
        Ok(Self::assemble(config, listener, resolver, sink))
    }

    fn assemble(
        config: &GatewayConfig,
        listener: TcpListener,
        resolver: Arc<dyn DestinationResolver>,
        sink: AccountingSink,
    ) -> Self {
        Self {
            listener,
            resolver,
            sink,
            connector: Arc::new(TcpConnector),
            registry: SessionRegistry::new(),
            relay_config: RelayConfig::from(config),
        }
    }

    /// Replace how sessions open their outbound leg
    pub fn with_connector(mut self, connector: Arc<dyn OutboundConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        listener_addr(&self.listener)
    }

    /// Sessions currently relaying
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept until the process is torn down
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept until `shutdown` resolves, then abandon in-flight sessions
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!("Transparent proxy listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, source)) => self.dispatch(&mut sessions, stream, source),
                    Err(e) => warn!(error = %e, "TCP accept error"),
                },

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "Relay session panicked");
                        }
                    }
                }
            }
        }

        info!(
            active = self.registry.len(),
            "Shutting down, abandoning in-flight sessions"
        );
        sessions.shutdown().await;
    }

    fn dispatch(&self, sessions: &mut JoinSet<()>, stream: TcpStream, source: SocketAddr) {
        counter!("gateway_sessions_accepted_total").increment(1);

        let session = RelaySession::new(stream, source, self.relay_config)
            .with_connector(Arc::clone(&self.connector));
        let span = info_span!("session", id = %session.id(), src = %source);
        let resolver = Arc::clone(&self.resolver);
        let registry = self.registry.clone();
        let sink = self.sink.clone();

        sessions.spawn(
            async move {
                match session.run(resolver.as_ref(), &registry).await {
                    Ok(finished) => sink.settle(&finished).await,
                    Err(e) => {
                        counter!("gateway_sessions_aborted_total", "reason" => e.kind())
                            .increment(1);
                        warn!(error = %e, "Session aborted");
                    }
                }
                debug!("Session ended");
            }
            .instrument(span),
        );
    }
}

fn listener_addr(listener: &TcpListener) -> Result<SocketAddr> {
    listener
        .local_addr()
        .map_err(|e| GatewayError::Internal(format!("listener has no local address: {}", e)))
}

/// Create the listening socket: SO_REUSEADDR, optional IP_TRANSPARENT,
/// bind, then listen with the configured backlog.
fn bind_socket(config: &GatewayConfig) -> Result<TcpListener> {
    let addr = config.listen_addr();
    let bind_err = move |source: std::io::Error| GatewayError::Bind { addr, source };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    if config.transparent {
        set_transparent(&socket).map_err(bind_err)?;
    }
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(config.listen_backlog).map_err(bind_err)
}

#[cfg(target_os = "linux")]
fn set_transparent(socket: &TcpSocket) -> std::io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt::IpTransparent};

    setsockopt(socket, IpTransparent, &true).map_err(std::io::Error::from)
}

#[cfg(not(target_os = "linux"))]
fn set_transparent(_socket: &TcpSocket) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "IP_TRANSPARENT is only available on Linux",
    ))
}
