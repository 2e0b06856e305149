use std::io;

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),
    #[error("Connection Closed")]
    ConnectionClosed,
    #[error("Not connected to the volume daemon")]
    NotConnected,
    #[error("Record exceeds receive buffer of {0} bytes")]
    RecordTooLong(usize),
    #[error("Malformed response line: '{0}'")]
    MalformedResponse(String),
    #[error("Command '{0}' was dropped before it was answered")]
    CommandAbandoned(String),
    #[error("Timeout Error")]
    Timeout,
    #[error("Volume session is shut down")]
    SessionClosed,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            io::ErrorKind::NotConnected => Error::NotConnected,
            kind => Error::Io(kind),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
