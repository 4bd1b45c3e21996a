//! Connection establishment and reconnection
//!
//! ```text
//!   connect() ──► TCP ──► INIT_REQUEST ──► ... ──► INIT_DONE ──► Connected
//!                                                      │
//!        ┌──────────── session lost ◄──────────────────┘
//!        ▼
//!   Reconnecting ──► sleep ──► TCP ──► INIT_REQUEST ──► (announcements
//!        │  ▲                            go to the shadow set)
//!        │  └── failed attempt                 │
//!        ▼                                     ▼
//!   Unrecoverable                 INIT_DONE ──► Restored
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::oneshot;

use super::config::ClientConfig;
use super::streaming::{ReconnectionStatus, StreamingClient, StreamingHandler};
use crate::error::{Error, Result};
use crate::protocol::message::Message;
use crate::registry::CommandSink;
use crate::session::{run_session, SessionHandle};

impl StreamingClient {
    /// Connect to a server and complete the handshake.
    ///
    /// The connection is driven by a spawned task that reconnects on loss
    /// according to the config.
    pub async fn connect(
        config: ClientConfig,
        handler: Arc<dyn StreamingHandler>,
    ) -> Result<Arc<Self>> {
        let client = Arc::new(Self::new(config, handler));

        let (tx, rx) = oneshot::channel();
        *client.init_waiter.lock() = Some(tx);

        let stream = client.open().await?;
        let session = client.new_session();
        client.begin(&session, false)?;
        tokio::spawn(Arc::clone(&client).drive(stream, session));

        let outcome = match tokio::time::timeout(client.config.connect_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed("handshake aborted".into())),
            Err(_) => Err(Error::ConnectionClosed("handshake timed out".into())),
        };
        match outcome {
            Ok(()) => Ok(client),
            Err(e) => {
                client.close();
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<TcpStream> {
        let addr = &self.config.addr;
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| Error::ConnectionClosed(format!("connect to {} timed out", addr)))??;
        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        tracing::debug!(addr = %addr, "TCP connected");
        Ok(stream)
    }

    fn new_session(&self) -> SessionHandle {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        SessionHandle::new(id, self.config.session.clone())
    }

    /// Bind the registry to a fresh session and request the handshake
    fn begin(&self, session: &SessionHandle, reconnecting: bool) -> Result<()> {
        let sink: Arc<dyn CommandSink> = Arc::new(session.clone());
        if reconnecting {
            self.registry.start_reconnection(sink);
        } else {
            self.registry.attach(sink);
        }
        *self.session.lock() = Some(session.clone());

        session.send(Message::ProtocolInitRequest {
            client_type: self.config.client_type,
        })
    }

    async fn drive(self: Arc<Self>, mut stream: TcpStream, mut session: SessionHandle) {
        loop {
            let _ = run_session(stream, session, self.as_ref()).await;

            // Never reconnect before the first handshake or after close()
            if self.is_closing() || self.status().is_none() {
                if self.status() == Some(ReconnectionStatus::Reconnecting) {
                    self.set_status(ReconnectionStatus::Unrecoverable);
                }
                break;
            }

            self.set_status(ReconnectionStatus::Reconnecting);
            match self.reconnect().await {
                Some((next_stream, next_session)) => {
                    stream = next_stream;
                    session = next_session;
                }
                None => {
                    self.set_status(ReconnectionStatus::Unrecoverable);
                    break;
                }
            }
        }
        tracing::debug!(connection = %self.config.addr, "Connection task finished");
    }

    async fn reconnect(&self) -> Option<(TcpStream, SessionHandle)> {
        let max_attempts = self.config.max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.config.reconnect_interval).await;
            if self.is_closing() {
                return None;
            }

            let stream = match self.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    continue;
                }
            };

            let session = self.new_session();
            if let Err(e) = self.begin(&session, true) {
                tracing::warn!(attempt = attempt, error = %e, "Failed to start handshake");
                continue;
            }
            tracing::info!(attempt = attempt, addr = %self.config.addr, "Reconnected");
            return Some((stream, session));
        }
        None
    }
}
