//! Session events for callers who want timings or lifecycle visibility.
//!
//! The client never prints. Every stage is logged through `tracing`, and
//! an optional [`SessionObserver`] injected through the builder receives
//! the same milestones as typed [`SessionEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use clamd_client::{Clamd, SessionEvent};
//!
//! let clamd = Clamd::builder()
//!     .address("tcp://127.0.0.1:3310")
//!     .observer(|event: &SessionEvent| {
//!         if let SessionEvent::ConnectionClosed { command, elapsed } = event {
//!             eprintln!("{} took {:?}", command, elapsed);
//!         }
//!     })
//!     .build()?;
//! ```

use std::fmt;
use std::time::Duration;

/// Lifecycle of a streaming scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Connecting,
    /// Sending INSTREAM chunks.
    Uploading,
    /// Terminator sent, no record decoded yet.
    AwaitingVerdict,
    /// Decoder is reading the reply.
    Draining,
    /// Connection released. Terminal.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Connecting => "connecting",
            StreamState::Uploading => "uploading",
            StreamState::AwaitingVerdict => "awaiting-verdict",
            StreamState::Draining => "draining",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Milestones of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Command line written; `elapsed` includes connection setup.
    CommandSent { command: String, elapsed: Duration },
    /// One INSTREAM chunk written.
    ChunkSent { len: usize },
    /// Streaming scan moved to a new state.
    StateChanged { state: StreamState },
    /// Connection closed after the reply was drained.
    ConnectionClosed { command: String, elapsed: Duration },
    /// Closing failed; the operation's result was not affected.
    CloseFailed { command: String, error: String },
}

/// Receiver of [`SessionEvent`]s.
///
/// Called inline from client tasks, so implementations should return quickly.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}
