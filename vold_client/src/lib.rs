//!Client for the vold volume daemon's command socket
//!
//!vold speaks a simple line protocol over a unix stream socket. The client
//!sends a command such as `volume mount sdcard`, terminated by a NUL byte, and
//!the daemon answers with one or more records of the form `<code> <text>`.
//!Codes below 200 are intermediate lines, codes 200 to 599 finish the command
//!and codes from 600 up are broadcasts about volumes that may arrive at any
//!time.
//!
//!The crate has two layers:
//!
//!- [`sansio`] holds the complete session as a state machine without any I/O:
//!  command queue, record framing, response routing, reconnect policy and the
//!  `Uninitialized -> Connecting -> Ready` state.
//!- [`VolumeManager`] runs that state machine on a tokio task with a real
//!  unix socket and gives out a cloneable handle.
//!
//!```no_run
//!# #[tokio::main]
//!# async fn main() -> vold_client::Result<()> {
//!use vold_client::{SessionConfig, VolumeManager, VolumeState};
//!
//!let config = SessionConfig::load("/etc/vold-client.json")?;
//!let (manager, _task) = VolumeManager::spawn(config)?;
//!manager.wait_ready().await?;
//!
//!if let Some(sdcard) = manager.volume("sdcard").await? {
//!    if sdcard.state == VolumeState::Idle {
//!        manager.mount("sdcard").await?;
//!    }
//!}
//!
//!let mut changes = manager.subscribe_volumes();
//!while let Ok(volume) = changes.recv().await {
//!    println!("{} is now {}", volume.name, volume.state);
//!}
//!# Ok(())
//!# }
//!```

#[macro_use]
extern crate serde_derive;

pub use crate::client_async::{TokioLink, VolumeManager};
pub use crate::command::{Command, CommandResponse, VolumeCommand, VolumeListCommand};
pub use crate::config::SessionConfig;
pub use crate::error::{Error, Result};
pub use crate::sansio::{ConnectionState, ObserverId, ResponseCode, StateChangedEvent, StateObserver};
pub use crate::volume::{TrackedVolume, Volume, VolumeInfo, VolumeRegistry, VolumeState, VolumeTable};

mod client_async;
mod command;
mod config;
mod error;
pub mod sansio;
mod volume;

#[cfg(test)]
mod test;
