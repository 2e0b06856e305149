//! Commands queued on a vold session.
//!
//! The session only knows commands through the [`Command`] trait: it writes
//! their bytes, feeds them the response lines addressed to them and drops
//! them after their terminal line. [`VolumeCommand`] is the implementation
//! used by [`VolumeManager`](crate::VolumeManager); it reports the outcome
//! through a oneshot channel.

use crate::sansio::protocol::{serialize_command, ResponseCode};
use std::fmt;
use tokio::sync::oneshot;

/// Something the session can write to the daemon and route responses to.
pub trait Command {
    /// The complete encoded command, delimiter included.
    fn data(&self) -> &[u8];

    fn remaining_byte_count(&self) -> usize;

    /// Advance the write cursor by `n` bytes accepted by the socket.
    fn consume_bytes(&mut self, n: usize);

    /// A response line addressed to this command. May be called many times;
    /// the last call carries a terminal code.
    fn handle_response(&mut self, code: ResponseCode, remainder: &str);

    /// Short human readable form used in log output.
    fn description(&self) -> String {
        String::from_utf8_lossy(self.data())
            .trim_end_matches(|c: char| c == '\0' || c == '\n')
            .to_string()
    }

    /// Bytes that still have to be written.
    fn unsent(&self) -> &[u8] {
        let data = self.data();
        &data[data.len() - self.remaining_byte_count()..]
    }
}

/// Final answer to a [`VolumeCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    /// The terminal response code
    pub code: ResponseCode,
    /// Text of the terminal line
    pub message: String,
    /// Intermediate lines received before the terminal one
    pub lines: Vec<(ResponseCode, String)>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// A plain text vold command, e.g. `volume mount sdcard`.
pub struct VolumeCommand {
    text: String,
    bytes: Vec<u8>,
    written: usize,
    lines: Vec<(ResponseCode, String)>,
    reply_tx: Option<oneshot::Sender<CommandResponse>>,
}

impl VolumeCommand {
    /// Build a command and the receiver its response will arrive on.
    ///
    /// If the command is dropped without a terminal response, e.g. because
    /// the session restarted, the receiver yields `RecvError`.
    pub fn new<S: Into<String>>(
        text: S,
        delimiter: u8,
    ) -> (Self, oneshot::Receiver<CommandResponse>) {
        let (tx, rx) = oneshot::channel();
        let mut cmd = Self::detached(text, delimiter);
        cmd.reply_tx = Some(tx);
        (cmd, rx)
    }

    /// A command nobody waits for.
    pub fn detached<S: Into<String>>(text: S, delimiter: u8) -> Self {
        let text = text.into();
        let bytes = serialize_command(&text, delimiter);
        Self {
            text,
            bytes,
            written: 0,
            lines: Vec::new(),
            reply_tx: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn list() -> String {
        "volume list".to_string()
    }

    pub fn mount(volume: &str) -> String {
        format!("volume mount {}", volume)
    }

    pub fn unmount(volume: &str, force: bool) -> String {
        if force {
            format!("volume unmount {} force", volume)
        } else {
            format!("volume unmount {}", volume)
        }
    }

    pub fn share(volume: &str) -> String {
        format!("volume share {} ums", volume)
    }

    pub fn unshare(volume: &str) -> String {
        format!("volume unshare {} ums", volume)
    }

    pub fn format(volume: &str) -> String {
        format!("volume format {}", volume)
    }
}

impl Command for VolumeCommand {
    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn remaining_byte_count(&self) -> usize {
        self.bytes.len() - self.written
    }

    fn consume_bytes(&mut self, n: usize) {
        self.written = usize::min(self.written + n, self.bytes.len());
    }

    fn handle_response(&mut self, code: ResponseCode, remainder: &str) {
        if !code.is_terminal() {
            self.lines.push((code, remainder.to_string()));
            return;
        }

        let response = CommandResponse {
            code,
            message: remainder.to_string(),
            lines: std::mem::take(&mut self.lines),
        };
        if let Some(tx) = self.reply_tx.take() {
            // receiver gone means the caller stopped waiting
            let _ = tx.send(response);
        }
    }

    fn description(&self) -> String {
        self.text.clone()
    }
}

impl fmt::Debug for VolumeCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VolumeCommand")
            .field("text", &self.text)
            .field("written", &self.written)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The bootstrap `volume list` command sent after every connect.
///
/// Its `110` lines are routed to the volume registry by the session, so the
/// command itself only remembers how the listing ended.
#[derive(Debug)]
pub struct VolumeListCommand {
    bytes: Vec<u8>,
    written: usize,
    listed: usize,
    result: Option<ResponseCode>,
}

impl VolumeListCommand {
    pub fn new(delimiter: u8) -> Self {
        Self {
            bytes: serialize_command(&VolumeCommand::list(), delimiter),
            written: 0,
            listed: 0,
            result: None,
        }
    }

    /// Number of volumes reported so far.
    pub fn listed(&self) -> usize {
        self.listed
    }

    pub fn result(&self) -> Option<ResponseCode> {
        self.result
    }
}

impl Command for VolumeListCommand {
    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn remaining_byte_count(&self) -> usize {
        self.bytes.len() - self.written
    }

    fn consume_bytes(&mut self, n: usize) {
        self.written = usize::min(self.written + n, self.bytes.len());
    }

    fn handle_response(&mut self, code: ResponseCode, _remainder: &str) {
        if code == ResponseCode::VOLUME_LIST_RESULT {
            self.listed += 1;
        } else if code.is_terminal() {
            self.result = Some(code);
        }
    }
}
