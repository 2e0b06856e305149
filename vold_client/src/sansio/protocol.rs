//! Pure protocol parsing and serialization functions.
//!
//! This module contains side-effect-free functions for framing and parsing
//! vold records. Nothing in here performs I/O.

use super::types::{ParseResult, ResponseLine};
use crate::{Error, Result};
use std::fmt;

/// A vold response code.
///
/// The daemon groups its codes by hundreds: `1xx` are intermediate lines of a
/// command's answer, `2xx` to `5xx` finish a command (success or failure), and
/// `6xx` are unsolicited broadcasts that belong to no command at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub u32);

impl ResponseCode {
    pub const ACTION_INITIATED: Self = Self(100);
    pub const VOLUME_LIST_RESULT: Self = Self(110);
    pub const ASEC_LIST_RESULT: Self = Self(111);
    pub const STORAGE_USERS_LIST_RESULT: Self = Self(112);

    pub const COMMAND_OKAY: Self = Self(200);
    pub const SHARE_STATUS_RESULT: Self = Self(210);
    pub const ASEC_PATH_RESULT: Self = Self(211);
    pub const SHARE_ENABLED_RESULT: Self = Self(212);

    pub const OPERATION_FAILED: Self = Self(400);
    pub const OP_FAILED_NO_MEDIA: Self = Self(401);
    pub const OP_FAILED_MEDIA_BLANK: Self = Self(402);
    pub const OP_FAILED_MEDIA_CORRUPT: Self = Self(403);
    pub const OP_FAILED_VOL_NOT_MOUNTED: Self = Self(404);
    pub const OP_FAILED_STORAGE_BUSY: Self = Self(405);
    pub const OP_FAILED_STORAGE_NOT_FOUND: Self = Self(406);

    pub const COMMAND_SYNTAX_ERROR: Self = Self(500);
    pub const COMMAND_PARAMETER_ERROR: Self = Self(501);
    pub const COMMAND_NO_PERMISSION: Self = Self(502);

    pub const UNSOLICITED_INFORMATIONAL: Self = Self(600);
    pub const VOLUME_STATE_CHANGE: Self = Self(605);
    pub const VOLUME_MOUNT_FAILED_BLANK: Self = Self(610);
    pub const VOLUME_MOUNT_FAILED_DAMAGED: Self = Self(611);
    pub const VOLUME_MOUNT_FAILED_NO_MEDIA: Self = Self(612);
    pub const SHARE_AVAILABILITY_CHANGE: Self = Self(620);
    pub const VOLUME_DISK_INSERTED: Self = Self(630);
    pub const VOLUME_DISK_REMOVED: Self = Self(631);
    pub const VOLUME_BAD_REMOVAL: Self = Self(632);

    /// Unsolicited daemon event, never addressed to a queued command.
    pub fn is_broadcast(self) -> bool {
        self >= Self::UNSOLICITED_INFORMATIONAL
    }

    /// Finishes the command at the head of the queue.
    pub fn is_terminal(self) -> bool {
        self >= Self::COMMAND_OKAY && !self.is_broadcast()
    }

    pub fn is_success(self) -> bool {
        self.0 / 100 == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scan `buf` for the first `delimiter`-terminated record.
///
/// # Example
///
/// ```
/// use vold_client::sansio::protocol::parse_message;
/// use vold_client::sansio::ParseResult;
///
/// let buf = b"200 Command completed\0";
/// match parse_message(buf, 0) {
///     ParseResult::Complete { message, consumed } => {
///         assert_eq!(consumed, buf.len());
///         assert_eq!(message, b"200 Command completed");
///     }
///     _ => panic!("Expected complete message"),
/// }
/// ```
pub fn parse_message(buf: &[u8], delimiter: u8) -> ParseResult {
    match buf.iter().position(|&b| b == delimiter) {
        Some(pos) => ParseResult::Complete {
            message: buf[..pos].to_vec(),
            consumed: pos + 1,
        },
        None => ParseResult::Incomplete,
    }
}

/// Split a record into its leading response code and the remainder.
///
/// A single space after the code is consumed if present, so both `"200 ok"`
/// and `"200ok"` yield the remainder `"ok"`.
pub fn parse_response_line(line: &str) -> Result<ResponseLine<'_>> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(Error::MalformedResponse(line.to_string()));
    }
    let code = line[..digits]
        .parse::<u32>()
        .map_err(|_| Error::MalformedResponse(line.to_string()))?;
    let rest = &line[digits..];
    let remainder = rest.strip_prefix(' ').unwrap_or(rest);

    Ok(ResponseLine {
        code: ResponseCode(code),
        remainder,
    })
}

/// Encode a command line for the wire.
///
/// ```
/// use vold_client::sansio::protocol::serialize_command;
///
/// let bytes = serialize_command("volume list", 0);
/// assert_eq!(bytes, b"volume list\0");
/// ```
pub fn serialize_command(text: &str, delimiter: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(delimiter);
    bytes
}

/// Turns a raw byte stream into delimited records.
///
/// Bytes are appended with [`push`](LineReader::push) as they arrive from the
/// socket and complete records are taken out with
/// [`next_record`](LineReader::next_record).
#[derive(Debug)]
pub struct LineReader {
    delimiter: u8,
    capacity: usize,
    recv_buf: Vec<u8>,
}

impl LineReader {
    pub fn new(delimiter: u8, capacity: usize) -> Self {
        Self {
            delimiter,
            capacity,
            recv_buf: Vec::with_capacity(capacity),
        }
    }

    /// Append freshly read bytes.
    ///
    /// Fails if the buffer would hold a partial record longer than the
    /// configured capacity. The stream cannot be resynchronized after that.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        self.recv_buf.extend_from_slice(data);

        let pending = match self.recv_buf.iter().rposition(|&b| b == self.delimiter) {
            Some(pos) => self.recv_buf.len() - pos - 1,
            None => self.recv_buf.len(),
        };
        if pending > self.capacity {
            return Err(Error::RecordTooLong(self.capacity));
        }
        Ok(())
    }

    /// Take the next complete, non-empty record.
    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        loop {
            match parse_message(&self.recv_buf, self.delimiter) {
                ParseResult::Complete { message, consumed } => {
                    self.recv_buf.drain(..consumed);
                    if !message.is_empty() {
                        return Some(message);
                    }
                }
                ParseResult::Incomplete => return None,
            }
        }
    }

    /// Bytes of a record that has not been completed yet.
    pub fn pending(&self) -> usize {
        self.recv_buf.len()
    }

    pub fn clear(&mut self) {
        self.recv_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_incomplete_message() {
        assert_eq!(parse_message(b"200 Command", b'\n'), ParseResult::Incomplete);
    }

    #[test]
    fn test_parse_with_extra_data() {
        let buf = b"110 sdcard /mnt/sdcard 1\n200 Command";
        match parse_message(buf, b'\n') {
            ParseResult::Complete { message, consumed } => {
                assert_eq!(consumed, 25);
                assert_eq!(message, b"110 sdcard /mnt/sdcard 1");
            }
            _ => panic!("Expected complete message"),
        }
    }

    #[test]
    fn test_response_line_with_space() {
        let line = parse_response_line("110 sdcard /mnt/sdcard 1").unwrap();
        assert_eq!(line.code, ResponseCode::VOLUME_LIST_RESULT);
        assert_eq!(line.remainder, "sdcard /mnt/sdcard 1");
    }

    #[test]
    fn test_response_line_without_space() {
        let line = parse_response_line("200").unwrap();
        assert_eq!(line.code, ResponseCode::COMMAND_OKAY);
        assert_eq!(line.remainder, "");

        let line = parse_response_line("200ok").unwrap();
        assert_eq!(line.remainder, "ok");

        // only one space is eaten
        let line = parse_response_line("200  two").unwrap();
        assert_eq!(line.remainder, " two");
    }

    #[test]
    fn test_response_line_malformed() {
        match parse_response_line("Volume sdcard") {
            Err(Error::MalformedResponse(s)) => assert_eq!(s, "Volume sdcard"),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(parse_response_line("").is_err());
        assert!(parse_response_line("99999999999999999999 overflow").is_err());
    }

    #[test]
    fn test_code_ranges() {
        assert!(!ResponseCode::VOLUME_LIST_RESULT.is_terminal());
        assert!(!ResponseCode::ACTION_INITIATED.is_broadcast());
        assert!(ResponseCode::COMMAND_OKAY.is_terminal());
        assert!(ResponseCode::COMMAND_OKAY.is_success());
        assert!(ResponseCode::OPERATION_FAILED.is_terminal());
        assert!(!ResponseCode::OPERATION_FAILED.is_success());
        assert!(ResponseCode::COMMAND_NO_PERMISSION.is_terminal());
        assert!(ResponseCode::VOLUME_STATE_CHANGE.is_broadcast());
        assert!(!ResponseCode::VOLUME_STATE_CHANGE.is_terminal());
    }

    #[test]
    fn test_line_reader_split_input() {
        let mut reader = LineReader::new(0, 64);
        reader.push(b"110 sdcard /mnt/sd").unwrap();
        assert_eq!(reader.next_record(), None);
        reader.push(b"card 1\0200 Command completed\0\0605 Vol").unwrap();
        assert_eq!(reader.next_record().unwrap(), b"110 sdcard /mnt/sdcard 1");
        assert_eq!(reader.next_record().unwrap(), b"200 Command completed");
        assert_eq!(reader.next_record(), None);
        assert_eq!(reader.pending(), 7);

        reader.clear();
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_line_reader_overflow() {
        let mut reader = LineReader::new(b'\n', 8);
        reader.push(b"12345678").unwrap();
        assert_eq!(reader.push(b"9"), Err(Error::RecordTooLong(8)));

        // complete records do not count against the limit
        let mut reader = LineReader::new(b'\n', 8);
        reader.push(b"200 Command completed\n200 ok").unwrap();
    }
}
