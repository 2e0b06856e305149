//! Volumes reported by the daemon.
//!
//! The session never interprets volume lines itself. It looks the target
//! volume up by name in a [`VolumeRegistry`] (creating it on first sight) and
//! hands over the remaining tokens.

use crate::sansio::protocol::ResponseCode;
use std::fmt;
use tokio::sync::broadcast;

/// One named storage resource.
pub trait Volume {
    fn name(&self) -> &str;

    /// Interpret a `110` list line or a `6xx` broadcast.
    ///
    /// `tokens` are the whitespace separated words following the volume name.
    fn handle_broadcast(&mut self, code: ResponseCode, tokens: &[&str]);
}

/// Find-or-create lookup of volumes by name.
pub trait VolumeRegistry {
    fn find_or_add(&mut self, name: &str) -> &mut dyn Volume;

    /// Current view of every known volume.
    fn snapshot(&self) -> Vec<VolumeInfo>;
}

/// Volume states, numbered the way vold reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VolumeState {
    #[default]
    Init,
    NoMedia,
    Idle,
    Pending,
    Checking,
    Mounted,
    Unmounting,
    Formatting,
    Shared,
    SharedMnt,
}

impl VolumeState {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => VolumeState::Init,
            0 => VolumeState::NoMedia,
            1 => VolumeState::Idle,
            2 => VolumeState::Pending,
            3 => VolumeState::Checking,
            4 => VolumeState::Mounted,
            5 => VolumeState::Unmounting,
            6 => VolumeState::Formatting,
            7 => VolumeState::Shared,
            8 => VolumeState::SharedMnt,
            _ => return None,
        })
    }

    pub fn code(&self) -> i32 {
        match self {
            VolumeState::Init => -1,
            VolumeState::NoMedia => 0,
            VolumeState::Idle => 1,
            VolumeState::Pending => 2,
            VolumeState::Checking => 3,
            VolumeState::Mounted => 4,
            VolumeState::Unmounting => 5,
            VolumeState::Formatting => 6,
            VolumeState::Shared => 7,
            VolumeState::SharedMnt => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeState::Init => "Init",
            VolumeState::NoMedia => "NoMedia",
            VolumeState::Idle => "Idle",
            VolumeState::Pending => "Pending",
            VolumeState::Checking => "Checking",
            VolumeState::Mounted => "Mounted",
            VolumeState::Unmounting => "Unmounting",
            VolumeState::Formatting => "Formatting",
            VolumeState::Shared => "Shared",
            VolumeState::SharedMnt => "Shared-Mounted",
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a volume, safe to hand out of the session task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: Option<String>,
    pub state: VolumeState,
    pub media_present: bool,
    /// Incremented every time the volume enters `Mounted`
    pub mount_generation: u32,
}

/// The default [`Volume`]: tracks what vold says about one volume.
#[derive(Debug)]
pub struct TrackedVolume {
    info: VolumeInfo,
    events: Option<broadcast::Sender<VolumeInfo>>,
}

impl TrackedVolume {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            info: VolumeInfo {
                name: name.into(),
                mount_point: None,
                state: VolumeState::Init,
                media_present: true,
                mount_generation: 0,
            },
            events: None,
        }
    }

    pub fn info(&self) -> &VolumeInfo {
        &self.info
    }

    fn set_state(&mut self, state: VolumeState) {
        if state == self.info.state {
            return;
        }
        tracing::debug!(
            volume = %self.info.name,
            from = %self.info.state,
            to = %state,
            "volume state changed"
        );
        if state == VolumeState::Mounted {
            self.info.mount_generation += 1;
        }
        self.info.media_present = state != VolumeState::NoMedia;
        self.info.state = state;
    }

    fn set_mount_point(&mut self, mount_point: &str) {
        if self.info.mount_point.as_deref() != Some(mount_point) {
            self.info.mount_point = Some(mount_point.to_string());
        }
    }

    fn parse_state(&self, token: Option<&&str>) -> Option<VolumeState> {
        let state = token
            .and_then(|t| t.parse::<i32>().ok())
            .and_then(VolumeState::from_code);
        if state.is_none() {
            tracing::warn!(volume = %self.info.name, token = ?token, "unparsable volume state");
        }
        state
    }
}

impl Volume for TrackedVolume {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn handle_broadcast(&mut self, code: ResponseCode, tokens: &[&str]) {
        let before = self.info.clone();

        match code {
            // <mount point> <state>
            ResponseCode::VOLUME_LIST_RESULT => {
                if let Some(mount_point) = tokens.first() {
                    self.set_mount_point(mount_point);
                }
                if let Some(state) = self.parse_state(tokens.get(1)) {
                    self.set_state(state);
                }
            }
            // <mount point> state changed from <n> (<old>) to <m> (<new>)
            ResponseCode::VOLUME_STATE_CHANGE => {
                if let Some(mount_point) = tokens.first() {
                    self.set_mount_point(mount_point);
                }
                let to = tokens.iter().rposition(|t| *t == "to");
                if let Some(state) = self.parse_state(to.and_then(|i| tokens.get(i + 1))) {
                    self.set_state(state);
                }
            }
            ResponseCode::VOLUME_DISK_INSERTED => {
                self.info.media_present = true;
            }
            ResponseCode::VOLUME_DISK_REMOVED | ResponseCode::VOLUME_BAD_REMOVAL => {
                self.info.media_present = false;
            }
            _ => {
                tracing::debug!(volume = %self.info.name, code = %code, "ignoring volume broadcast");
            }
        }

        if self.info != before {
            if let Some(events) = &self.events {
                // no subscribers is fine
                let _ = events.send(self.info.clone());
            }
        }
    }
}

/// The default [`VolumeRegistry`], keeping volumes in discovery order.
#[derive(Debug, Default)]
pub struct VolumeTable {
    volumes: Vec<TrackedVolume>,
    events: Option<broadcast::Sender<VolumeInfo>>,
}

impl VolumeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot on `events` whenever a volume changes.
    pub fn with_events(events: broadcast::Sender<VolumeInfo>) -> Self {
        Self {
            volumes: Vec::new(),
            events: Some(events),
        }
    }

    pub fn find(&self, name: &str) -> Option<&TrackedVolume> {
        self.volumes.iter().find(|v| v.info.name == name)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedVolume> {
        self.volumes.iter()
    }
}

impl VolumeRegistry for VolumeTable {
    fn find_or_add(&mut self, name: &str) -> &mut dyn Volume {
        let idx = match self.volumes.iter().position(|v| v.info.name == name) {
            Some(idx) => idx,
            None => {
                tracing::info!(volume = %name, "new volume");
                let mut volume = TrackedVolume::new(name);
                volume.events = self.events.clone();
                self.volumes.push(volume);
                self.volumes.len() - 1
            }
        };
        &mut self.volumes[idx]
    }

    fn snapshot(&self) -> Vec<VolumeInfo> {
        self.volumes.iter().map(|v| v.info.clone()).collect()
    }
}
