use crate::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a vold session
///
/// # Examples
///
/// ```
/// use vold_client::SessionConfig;
///
/// let config = SessionConfig {
///     socket_path: "/tmp/vold.sock".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.delimiter, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path of the daemon's unix socket
    pub socket_path: PathBuf,

    /// Record delimiter, on the wire in both directions
    ///
    /// vold terminates every command and every response with a NUL byte.
    pub delimiter: u8,

    /// Largest partial record kept while waiting for its delimiter
    pub recv_buffer_size: usize,

    /// Pause between connection attempts while the daemon is unreachable
    pub reconnect_delay_ms: u64,

    /// Depth of the request channel into the session task
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            socket_path: PathBuf::from("/dev/socket/vold"),
            delimiter: 0,
            recv_buffer_size: 4096,
            reconnect_delay_ms: 1000,
            channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size == 0 {
            return Err(crate::Error::Config("recv_buffer_size must not be 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(crate::Error::Config("channel_capacity must not be 0".into()));
        }
        Ok(())
    }
}
