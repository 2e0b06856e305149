//! Core types for the sans-io vold session.

use super::protocol::ResponseCode;
use std::fmt;

/// Connection state of a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Nothing has been started yet
    #[default]
    Uninitialized,
    /// Connecting, or connected and waiting for the initial volume list
    Connecting,
    /// The initial volume list has been received
    Ready,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "Uninitialized",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of scanning a byte buffer for one delimited record.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// A complete record was found
    Complete {
        /// The record bytes (without delimiter)
        message: Vec<u8>,
        /// Number of bytes consumed from input (including delimiter)
        consumed: usize,
    },
    /// No delimiter in the buffer yet
    Incomplete,
}

/// One parsed inbound line: `<code>[ ]<remainder>`.
///
/// Only lives for the duration of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLine<'a> {
    pub code: ResponseCode,
    pub remainder: &'a str,
}

/// Handed to every [`StateObserver`] when the connection state changes.
///
/// Observers are expected to look at [`state()`](StateChangedEvent::state) rather than
/// track transitions themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangedEvent {
    state: ConnectionState,
}

impl StateChangedEvent {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Listener for connection state changes.
pub trait StateObserver {
    fn notify(&mut self, event: &StateChangedEvent);
}

impl<F> StateObserver for F
where
    F: FnMut(&StateChangedEvent),
{
    fn notify(&mut self, event: &StateChangedEvent) {
        self(event)
    }
}

/// Registration token returned by `add_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);
