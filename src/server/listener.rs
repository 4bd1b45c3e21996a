//! Streaming server
//!
//! Handles the TCP accept loop, spawns one session task per connection and
//! fans published samples out to the connections that subscribed them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};

use super::admission::ClientAdmission;
use super::config::ServerConfig;
use super::connection::{ConnectionDelegate, PublishReport, ServerConnection};
use crate::error::{Error, Result};
use crate::session::{run_session, SessionContext, SessionHandle};
use crate::signal::Signal;
use crate::stats::ServerStats;

/// State shared by the server and its connection tasks
pub(super) struct ServerShared {
    pub config: ServerConfig,
    pub admission: ClientAdmission,
    /// Published signals, in publication order
    pub signals: Mutex<Vec<Arc<dyn Signal>>>,
    /// Admitted connections
    pub connections: Mutex<HashMap<u64, Arc<ServerConnection>>>,
    pub stats: Mutex<ServerStats>,
}

/// Signal streaming server
pub struct StreamingServer {
    shared: Arc<ServerShared>,
    next_session_id: AtomicU64,
}

impl StreamingServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                admission: ClientAdmission::new(config.max_connections),
                config,
                signals: Mutex::new(Vec::new()),
                connections: Mutex::new(HashMap::new()),
                stats: Mutex::new(ServerStats::new()),
            }),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Publish a signal and announce it to every admitted client
    pub fn add_signal(&self, signal: Arc<dyn Signal>) -> Result<()> {
        let global_id = signal.global_id();
        if global_id.is_empty() {
            return Err(Error::ArgumentNull("global_id"));
        }

        let mut signals = self.shared.signals.lock();
        if signals.iter().any(|s| s.global_id() == global_id) {
            return Err(Error::DuplicateItem(global_id));
        }

        for connection in self.shared.connections.lock().values() {
            if let Err(e) = connection.registry().register_signal(signal.as_ref()) {
                tracing::warn!(
                    session_id = connection.id(),
                    signal = %global_id,
                    error = %e,
                    "Failed to announce signal"
                );
            }
        }
        signals.push(signal);
        self.shared.stats.lock().published_signals = signals.len() as u64;

        tracing::info!(signal = %global_id, "Signal published");
        Ok(())
    }

    /// Withdraw a signal from every client
    pub fn remove_signal(&self, global_id: &str) -> Result<()> {
        let mut signals = self.shared.signals.lock();
        let index = signals
            .iter()
            .position(|s| s.global_id() == global_id)
            .ok_or_else(|| Error::NotFound(global_id.to_string()))?;
        signals.remove(index);

        for connection in self.shared.connections.lock().values() {
            if let Err(e) = connection.registry().unregister_signal(global_id) {
                tracing::warn!(
                    session_id = connection.id(),
                    signal = %global_id,
                    error = %e,
                    "Failed to withdraw signal"
                );
            }
        }
        self.shared.stats.lock().published_signals = signals.len() as u64;

        tracing::info!(signal = %global_id, "Signal withdrawn");
        Ok(())
    }

    /// Global ids of published signals, in publication order
    pub fn signals(&self) -> Vec<String> {
        self.shared
            .signals
            .lock()
            .iter()
            .map(|s| s.global_id())
            .collect()
    }

    /// Send samples of a signal to every client subscribed to it.
    ///
    /// `data` must hold whole samples of `stride` bytes. Packets are
    /// allocated from each connection's pool and may be split when the pool
    /// is fragmented; `timestamp` starts the send-latency clock.
    pub fn publish(
        &self,
        global_id: &str,
        data: &[u8],
        stride: usize,
        timestamp: Instant,
    ) -> Result<PublishReport> {
        if stride == 0 || data.len() % stride != 0 {
            return Err(Error::InvalidParameter(format!(
                "{} bytes is not a whole number of {}-byte samples",
                data.len(),
                stride
            )));
        }
        if !self.shared.signals.lock().iter().any(|s| s.global_id() == global_id) {
            return Err(Error::NotFound(global_id.to_string()));
        }

        let targets: Vec<_> = self.shared.connections.lock().values().cloned().collect();
        let mut report = PublishReport::default();
        if data.is_empty() {
            return Ok(report);
        }

        for connection in targets {
            let Some(numeric_id) = connection.registry().peer_subscription(global_id) else {
                continue;
            };
            report.connections += 1;
            connection.send_samples(numeric_id, data, stride, timestamp, &mut report);
        }

        let mut stats = self.shared.stats.lock();
        stats.packets_published += report.packets as u64;
        stats.degraded_packets += report.degraded_packets as u64;
        stats.dropped_samples += report.dropped_samples as u64;
        Ok(report)
    }

    /// Snapshots of the admitted connections, by session id
    pub fn connections(&self) -> Vec<SessionContext> {
        let mut contexts: Vec<_> = self
            .shared
            .connections
            .lock()
            .values()
            .map(|c| c.context())
            .collect();
        contexts.sort_by_key(|c| c.session_id);
        contexts
    }

    pub fn stats(&self) -> ServerStats {
        self.shared.stats.lock().clone()
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                self.close_all();
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Streaming server listening");
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Close every admitted connection
    pub fn close_all(&self) {
        for connection in self.shared.connections.lock().values() {
            connection.session().close("server shutting down");
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        {
            let mut stats = self.shared.stats.lock();
            stats.total_connections += 1;
            stats.active_connections += 1;
        }

        let config = &self.shared.config;
        let session = SessionHandle::new(session_id, config.session.clone());
        let connection = Arc::new(ServerConnection::new(
            session_id,
            peer_addr,
            session.clone(),
            config.pool_capacity,
        ));
        let delegate = ConnectionDelegate {
            shared: Arc::clone(&self.shared),
            connection: Arc::clone(&connection),
        };

        // Drop clients that never finish the handshake
        let init_timeout = config.init_timeout;
        let watched = Arc::clone(&connection);
        tokio::spawn(async move {
            tokio::time::sleep(init_timeout).await;
            if watched.client_type().is_none() && !watched.session().is_closed() {
                tracing::warn!(session_id = watched.id(), "Handshake timed out");
                watched.session().close("handshake timed out");
            }
        });

        tokio::spawn(async move {
            if let Err(e) = run_session(socket, session, &delegate).await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.shared.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.shared.config.bind_addr
    }
}

impl std::fmt::Debug for StreamingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingServer")
            .field("bind_addr", &self.shared.config.bind_addr)
            .field("signals", &self.signals())
            .finish()
    }
}
