//! The high-level events `Server::accept` produces (spec.md §3).

/// One item in the totally-ordered stream `accept()` drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A handshake just completed for this client id.
    Connected(u64),
    /// The peer closed, errored, or was evicted.
    Disconnected(u64),
    /// A complete text frame arrived from this client id.
    Message(u64, String),
    /// A recoverable condition worth surfacing; the loop continues.
    Error(String),
    /// The server is no longer running.
    Shutdown,
}
