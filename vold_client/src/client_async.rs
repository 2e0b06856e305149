//! Tokio host for the vold session
//!
//! One spawned task owns the [`Session`] and its socket and is the only place
//! the session is ever touched. Everything else talks to it through a
//! [`VolumeManager`] handle, which forwards requests over a channel.

use crate::command::{Command, CommandResponse, VolumeCommand};
use crate::config::SessionConfig;
use crate::error::*;
use crate::sansio::{ConnectionState, Link, ObserverId, Session, StateChangedEvent, StateObserver};
use crate::volume::{VolumeInfo, VolumeRegistry, VolumeTable};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// [`Link`] over a tokio unix stream.
///
/// Watcher registrations only set flags; the session task turns them into
/// readiness futures and timers.
#[derive(Debug)]
pub struct TokioLink {
    path: PathBuf,
    stream: Option<UnixStream>,
    want_write: bool,
    reconnect_at: Option<Instant>,
}

impl TokioLink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            stream: None,
            want_write: false,
            reconnect_at: None,
        }
    }
}

impl Link for TokioLink {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> io::Result<()> {
        // Blocking connect on the session task. A unix socket connect returns
        // at once unless the daemon's accept backlog is full, in which case the
        // task stalls until vold accepts.
        let stream = std::os::unix::net::UnixStream::connect(&self.path)?;
        stream.set_nonblocking(true)?;
        self.stream = Some(UnixStream::from_std(stream)?);
        self.reconnect_at = None;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(stream) = &self.stream else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        match stream.try_write(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            r => r,
        }
    }

    fn watch_writable(&mut self) {
        self.want_write = true;
    }

    fn disconnect(&mut self) {
        self.want_write = false;
        self.stream = None;
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.reconnect_at = Some(Instant::now() + delay);
    }
}

enum Request {
    Post(Box<dyn Command + Send>),
    AddObserver(Box<dyn StateObserver + Send>, oneshot::Sender<ObserverId>),
    RemoveObserver(ObserverId),
    Volumes(oneshot::Sender<Vec<VolumeInfo>>),
    Shutdown,
}

enum Wakeup {
    Request(Option<Request>),
    Readable(io::Result<()>),
    Writable(io::Result<()>),
    Reconnect,
}

/// Handle to a running vold session.
///
/// Cheap to clone. The session task stops after [`shutdown`](VolumeManager::shutdown)
/// or once every handle has been dropped.
///
/// # Examples
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> vold_client::Result<()> {
/// use vold_client::{SessionConfig, VolumeManager};
///
/// let (manager, _task) = VolumeManager::spawn(SessionConfig::default())?;
/// manager.wait_ready().await?;
/// for volume in manager.volumes().await? {
///     println!("{} is {}", volume.name, volume.state);
/// }
/// let response = manager.mount("sdcard").await?;
/// assert!(response.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct VolumeManager {
    tx: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    volume_events: broadcast::Sender<VolumeInfo>,
    delimiter: u8,
}

impl VolumeManager {
    /// Start the session task on the current tokio runtime.
    pub fn spawn(config: SessionConfig) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninitialized);
        let (volume_events, _) = broadcast::channel(config.channel_capacity);

        let link = TokioLink::new(config.socket_path.clone());
        let volumes = VolumeTable::with_events(volume_events.clone());
        let mut session = Session::new(link, volumes, &config);
        session.add_observer(Box::new(move |e: &StateChangedEvent| {
            state_tx.send_replace(e.state());
        }));

        tracing::debug!(socket = %config.socket_path.display(), "spawning vold session");
        let task = tokio::spawn(run(session, rx, config.recv_buffer_size));

        Ok((
            VolumeManager {
                tx,
                state: state_rx,
                volume_events,
                delimiter: config.delimiter,
            },
            task,
        ))
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Queue a command. Its outcome is the command's own business.
    pub async fn post_command(&self, cmd: Box<dyn Command + Send>) -> Result<()> {
        self.send(Request::Post(cmd)).await
    }

    /// Send `text` and wait for its terminal response.
    ///
    /// Fails with [`Error::CommandAbandoned`] if the session restarts before
    /// the daemon answered. There is no timeout; see
    /// [`call_timeout`](VolumeManager::call_timeout).
    pub async fn call<S: Into<String>>(&self, text: S) -> Result<CommandResponse> {
        let (cmd, rx) = VolumeCommand::new(text, self.delimiter);
        let text = cmd.text().to_string();
        self.post_command(Box::new(cmd)).await?;
        rx.await.map_err(|_| Error::CommandAbandoned(text))
    }

    pub async fn call_timeout<S: Into<String>>(
        &self,
        text: S,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        tokio::time::timeout(timeout, self.call(text))
            .await
            .map_err(|_| Error::Timeout)?
    }

    pub async fn mount(&self, volume: &str) -> Result<CommandResponse> {
        self.call(VolumeCommand::mount(volume)).await
    }

    pub async fn unmount(&self, volume: &str, force: bool) -> Result<CommandResponse> {
        self.call(VolumeCommand::unmount(volume, force)).await
    }

    pub async fn share(&self, volume: &str) -> Result<CommandResponse> {
        self.call(VolumeCommand::share(volume)).await
    }

    pub async fn unshare(&self, volume: &str) -> Result<CommandResponse> {
        self.call(VolumeCommand::unshare(volume)).await
    }

    pub async fn format(&self, volume: &str) -> Result<CommandResponse> {
        self.call(VolumeCommand::format(volume)).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the initial volume list has arrived.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::SessionClosed)
    }

    /// Register an observer, called on the session task for every state change.
    pub async fn add_observer(&self, observer: Box<dyn StateObserver + Send>) -> Result<ObserverId> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::AddObserver(observer, tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    pub async fn remove_observer(&self, id: ObserverId) -> Result<()> {
        self.send(Request::RemoveObserver(id)).await
    }

    pub async fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Volumes(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    pub async fn volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        Ok(self.volumes().await?.into_iter().find(|v| v.name == name))
    }

    /// Every change to any volume, as a snapshot of that volume.
    pub fn subscribe_volumes(&self) -> broadcast::Receiver<VolumeInfo> {
        self.volume_events.subscribe()
    }

    /// Stop the session task. Queued commands are dropped.
    ///
    /// Observers are not told about the teardown, so [`state`](VolumeManager::state)
    /// keeps reporting the last state the session reached. Use the
    /// [`JoinHandle`] returned by [`spawn`](VolumeManager::spawn) to learn when
    /// the task has stopped.
    pub async fn shutdown(&self) -> Result<()> {
        match self.send(Request::Shutdown).await {
            Err(Error::SessionClosed) => Ok(()),
            r => r,
        }
    }
}

async fn readable(stream: Option<&UnixStream>) -> io::Result<()> {
    match stream {
        Some(stream) => stream.readable().await,
        None => std::future::pending().await,
    }
}

async fn writable(stream: Option<&UnixStream>) -> io::Result<()> {
    match stream {
        Some(stream) => stream.writable().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut session: Session<TokioLink, VolumeTable>,
    mut rx: mpsc::Receiver<Request>,
    recv_buffer_size: usize,
) {
    let mut buf = vec![0u8; recv_buffer_size];
    session.start();

    loop {
        let wakeup = {
            let link = session.link();
            let stream = link.stream.as_ref();
            let want_write = link.want_write;
            let reconnect_at = link.reconnect_at;

            tokio::select! {
                request = rx.recv() => Wakeup::Request(request),
                r = readable(stream) => Wakeup::Readable(r),
                r = writable(stream), if want_write => Wakeup::Writable(r),
                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)),
                    if reconnect_at.is_some() => Wakeup::Reconnect,
            }
        };

        match wakeup {
            Wakeup::Request(None) | Wakeup::Request(Some(Request::Shutdown)) => {
                session.teardown();
                break;
            }
            Wakeup::Request(Some(Request::Post(cmd))) => session.post_command(cmd),
            Wakeup::Request(Some(Request::AddObserver(observer, reply))) => {
                let _ = reply.send(session.add_observer(observer));
            }
            Wakeup::Request(Some(Request::RemoveObserver(id))) => {
                session.remove_observer(id);
            }
            Wakeup::Request(Some(Request::Volumes(reply))) => {
                let _ = reply.send(session.volumes().snapshot());
            }
            Wakeup::Readable(Err(e)) => session.handle_read_error(e.into()),
            Wakeup::Readable(Ok(())) => {
                let Some(stream) = session.link().stream.as_ref() else {
                    continue;
                };
                match stream.try_read(&mut buf) {
                    Ok(0) => session.handle_read_error(Error::ConnectionClosed),
                    Ok(n) => session.handle_input(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => session.handle_read_error(e.into()),
                }
            }
            Wakeup::Writable(r) => {
                session.link_mut().want_write = false;
                match r {
                    Ok(()) => session.write_pump(),
                    Err(e) => {
                        tracing::warn!(error = %e, "waiting for vold socket to drain failed");
                        session.restart();
                    }
                }
            }
            Wakeup::Reconnect => {
                session.link_mut().reconnect_at = None;
                session.reconnect();
            }
        }
    }

    tracing::debug!("vold session stopped");
}
