//! Read-side state machine
//!
//! Each read completion is handed to the current [`ReadTask`]; the task
//! either asks for more bytes or yields the next task. Framing depth never
//! leaks to the caller.
//!
//! ```text
//!   ┌──────────┐ header ok  ┌───────────┐ payload done ┌──────────┐
//!   │  Header  ├───────────►│  Payload  ├─────────────►│  Header  │ ...
//!   └────┬─────┘            └─────┬─────┘              └──────────┘
//!        │ oversized / unknown    │ fatal framing error
//!        ▼                        ▼
//!   ┌──────────┐             ┌──────────┐
//!   │ Discard  │────────────►│  Closed  │ (also on I/O error or close())
//!   └──────────┘  (resumes   └──────────┘
//!                  at Header)
//! ```

use crate::protocol::frame::PayloadType;

/// Externally visible phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the next transport header
    AwaitingHeader,
    /// Header parsed, collecting (or skipping) the payload
    AwaitingPayload,
    /// Session closed; no more reads or writes
    Closed,
}

/// Next unit of work for the read side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadTask {
    /// Read a transport header
    Header,
    /// Read `len` payload bytes of a known type
    Payload { kind: PayloadType, len: usize },
    /// Skip `remaining` bytes of a payload we won't decode
    Discard { remaining: usize },
    /// Stop reading
    Stop,
}

impl ReadTask {
    pub(crate) fn phase(&self) -> SessionPhase {
        match self {
            ReadTask::Header => SessionPhase::AwaitingHeader,
            ReadTask::Payload { .. } | ReadTask::Discard { .. } => SessionPhase::AwaitingPayload,
            ReadTask::Stop => SessionPhase::Closed,
        }
    }
}
