//! Statistics for streaming sessions

use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session was created
    pub started_at: Instant,
    /// Total bytes fed into the read side
    pub bytes_received: u64,
    /// Total bytes handed out to the writer
    pub bytes_sent: u64,
    /// Frames decoded successfully
    pub frames_received: u64,
    /// Frames queued for writing
    pub frames_sent: u64,
    /// Streaming packets received
    pub packets_received: u64,
    /// Streaming packets queued
    pub packets_sent: u64,
    /// Payloads skipped because they were oversized, unknown or malformed
    pub discarded_payloads: u64,
    /// Bytes skipped while discarding payloads
    pub discarded_bytes: u64,
    /// Write batches dropped because the send deadline passed
    pub expired_batches: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_received: 0,
            bytes_sent: 0,
            frames_received: 0,
            frames_sent: 0,
            packets_received: 0,
            packets_sent: 0,
            discarded_payloads: 0,
            discarded_bytes: 0,
            expired_batches: 0,
        }
    }

    /// Time since the session was created
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Receive bitrate in bits per second
    pub fn receive_bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connections currently open
    pub active_connections: u64,
    /// Connections refused during admission
    pub rejected_connections: u64,
    /// Signals currently published
    pub published_signals: u64,
    /// Packets queued by `publish`
    pub packets_published: u64,
    /// Packets cut short because the pool had too little contiguous room
    pub degraded_packets: u64,
    /// Samples not sent because a connection's pool was saturated
    pub dropped_samples: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.frames_received, 0);
        assert_eq!(stats.discarded_payloads, 0);
        assert_eq!(stats.expired_batches, 0);
    }

    #[test]
    fn test_receive_bitrate_zero_duration() {
        let mut stats = SessionStats::new();
        stats.bytes_received = 1_000_000;

        // Less than a second has passed
        assert_eq!(stats.receive_bitrate(), 0);
    }

    #[test]
    fn test_receive_bitrate() {
        let mut stats = SessionStats::new();
        stats.started_at = Instant::now() - Duration::from_secs(10);
        stats.bytes_received = 1_000_000;

        assert_eq!(stats.receive_bitrate(), 800_000);
    }

    #[test]
    fn test_server_stats_new() {
        let stats = ServerStats::new();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.rejected_connections, 0);
    }
}
