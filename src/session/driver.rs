//! Tokio binding for a session
//!
//! Drives one [`SessionHandle`] over any `AsyncRead + AsyncWrite` stream.
//! Three loops share the connection:
//!
//! ```text
//!   socket ──read──► feed() ──messages──► SessionDelegate
//!   socket ◄─write── next_write() ◄─notify── send()/send_packet()
//!   interval ──────► check_deadline()
//! ```
//!
//! The first loop to finish ends the session.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::shared::SessionHandle;
use crate::error::{Error, Result};
use crate::protocol::message::Message;

/// Receives decoded messages and the close notification of a session.
///
/// Callbacks run on the connection's task; implementations that need
/// delivery elsewhere must redispatch themselves.
pub trait SessionDelegate: Send + Sync {
    /// A message arrived from the peer
    fn on_message(&self, session: &SessionHandle, message: Message);

    /// The session closed; `reason` is human-readable
    fn on_closed(&self, _session: &SessionHandle, _reason: &str) {}
}

/// Run a session until it closes.
///
/// Returns `Ok(())` when the peer hung up or the session was closed
/// locally, and the fatal error otherwise. The delegate's `on_closed` is
/// always invoked before returning.
pub async fn run_session<S, D>(stream: S, session: SessionHandle, delegate: &D) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send,
    D: SessionDelegate + ?Sized,
{
    let config = session.lock().config().clone();
    let (reader, writer) = tokio::io::split(stream);

    let result = tokio::select! {
        r = read_loop(reader, &session, delegate, config.read_buffer_size) => r,
        r = write_loop(writer, &session) => r,
        r = deadline_loop(&session, config.max_send_latency.map(|_| config.deadline_check_interval)) => r,
    };

    let reason = match &result {
        Ok(()) => "connection closed".to_string(),
        Err(e) => e.to_string(),
    };
    session.close(reason);

    let reason = session
        .lock()
        .close_reason()
        .unwrap_or("connection closed")
        .to_string();
    match &result {
        Err(e) if !matches!(e, Error::ConnectionClosed(_)) => {
            tracing::error!(session_id = session.id(), error = %e, "Session failed")
        }
        _ => tracing::debug!(session_id = session.id(), reason = %reason, "Session ended"),
    }
    delegate.on_closed(&session, &reason);
    result
}

async fn read_loop<S, D>(
    mut reader: ReadHalf<S>,
    session: &SessionHandle,
    delegate: &D,
    buffer_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
    D: SessionDelegate + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            session.close("peer closed the connection");
            return Ok(());
        }

        let mut messages = Vec::new();
        let fed = session.lock().feed(&buf[..n], &mut messages);
        for message in messages {
            delegate.on_message(session, message);
        }
        fed?;
    }
}

async fn write_loop<S>(mut writer: WriteHalf<S>, session: &SessionHandle) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        // One task at a time so the batch deadline keeps covering the rest
        let mut wrote = false;
        while let Some(task) = session.next_write() {
            writer.write_all(task.head()).await?;
            if let Some(body) = task.body() {
                writer.write_all(&body).await?;
            }
            drop(task);
            session.write_completed();
            wrote = true;
        }
        if wrote {
            writer.flush().await?;
        }

        if session.lock().finish_if_flushed() {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        session.wait_for_writes().await;
    }
}

async fn deadline_loop(
    session: &SessionHandle,
    interval: Option<std::time::Duration>,
) -> Result<()> {
    let Some(period) = interval else {
        return std::future::pending().await;
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        session.lock().check_deadline(Instant::now())?;
    }
}
