//! Streaming source abstraction

use crate::error::Result;

/// A connection able to deliver packets for mirrored signals
pub trait StreamingSource: Send + Sync {
    /// Identifies the connection among a signal's sources
    fn connection_id(&self) -> String;

    /// Take a subscription reference on a remote signal
    fn subscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()>;

    /// Drop a subscription reference on a remote signal
    fn unsubscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()>;
}
