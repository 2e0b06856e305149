//! Sans-IO implementation of the vold client protocol.
//!
//! This module holds the complete client session as a plain state machine.
//! It owns no socket, spawns no task and never sleeps, so it can be driven by
//! any event loop and tested without a daemon.
//!
//! # Architecture
//!
//! The host implements [`Link`] and feeds the [`Session`]:
//!
//! - `start()`: begin connecting; the session asks the link to connect
//! - `write_pump()`: the socket became writable again
//! - `handle_input()`: bytes were read from the socket
//! - `handle_read_error()`: the socket failed or hit end of file
//! - `reconnect()`: the retry timer requested by the link fired
//!
//! # Example
//!
//! ```
//! use std::io;
//! use std::time::Duration;
//! use vold_client::sansio::{ConnectionState, Link, Session};
//! use vold_client::{SessionConfig, VolumeTable};
//!
//! #[derive(Default)]
//! struct Wire {
//!     connected: bool,
//!     sent: Vec<u8>,
//! }
//!
//! impl Link for Wire {
//!     fn is_connected(&self) -> bool { self.connected }
//!     fn connect(&mut self) -> io::Result<()> { self.connected = true; Ok(()) }
//!     fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
//!         self.sent.extend_from_slice(buf);
//!         Ok(buf.len())
//!     }
//!     fn watch_writable(&mut self) {}
//!     fn disconnect(&mut self) { self.connected = false; }
//!     fn schedule_reconnect(&mut self, _delay: Duration) {}
//! }
//!
//! let config = SessionConfig { delimiter: b'\n', ..Default::default() };
//! let mut session = Session::new(Wire::default(), VolumeTable::new(), &config);
//!
//! session.start();
//! assert_eq!(session.link().sent, b"volume list\n");
//!
//! session.handle_input(b"110 sdcard /mnt/sdcard 4\n200 Volumes listed.\n");
//! assert_eq!(session.state(), ConnectionState::Ready);
//! assert_eq!(session.volumes().len(), 1);
//! ```

pub mod protocol;
pub mod session;
pub mod types;

pub use self::protocol::{parse_message, parse_response_line, serialize_command, LineReader, ResponseCode};
pub use self::session::{Link, Session};
pub use self::types::{
    ConnectionState, ObserverId, ParseResult, ResponseLine, StateChangedEvent, StateObserver,
};
