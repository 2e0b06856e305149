//! Session state machine for the vold protocol.
//!
//! A [`Session`] owns the command queue, the record parser and the connection
//! state. The socket and its readiness watchers live behind the [`Link`]
//! trait, so the session never blocks and never performs I/O on its own: the
//! host event loop calls [`write_pump`](Session::write_pump) when the socket
//! becomes writable, [`handle_input`](Session::handle_input) with bytes it
//! read, and [`reconnect`](Session::reconnect) when the retry timer fires.

use super::protocol::{parse_response_line, LineReader, ResponseCode};
use super::types::{ConnectionState, ObserverId, ResponseLine, StateChangedEvent, StateObserver};
use crate::command::{Command, VolumeListCommand};
use crate::config::SessionConfig;
use crate::volume::{VolumeRegistry, VolumeTable};
use crate::Error;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// The socket to the daemon together with its readiness watchers.
pub trait Link {
    fn is_connected(&self) -> bool;

    /// Open the socket in non-blocking mode and start watching it for input.
    fn connect(&mut self) -> io::Result<()>;

    /// One non-blocking write. Accepting zero or only part of `buf` is fine.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Call [`Session::write_pump`] once the socket is writable again.
    fn watch_writable(&mut self);

    /// Stop both watchers and close the socket.
    fn disconnect(&mut self);

    /// Call [`Session::reconnect`] after `delay`.
    fn schedule_reconnect(&mut self, delay: Duration);
}

enum Queued {
    Bootstrap(VolumeListCommand),
    Caller(Box<dyn Command + Send>),
}

impl Queued {
    fn command(&self) -> &dyn Command {
        match self {
            Queued::Bootstrap(cmd) => cmd,
            Queued::Caller(cmd) => &**cmd,
        }
    }

    fn command_mut(&mut self) -> &mut dyn Command {
        match self {
            Queued::Bootstrap(cmd) => cmd,
            Queued::Caller(cmd) => &mut **cmd,
        }
    }
}

/// Sans-IO vold session.
///
/// At most one command is in flight: only the head of the queue is ever
/// written, and it stays at the head until a terminal response arrives.
pub struct Session<L: Link, V: VolumeRegistry = VolumeTable> {
    link: L,
    volumes: V,
    state: ConnectionState,
    queue: VecDeque<Queued>,
    reader: LineReader,
    observers: Vec<(ObserverId, Box<dyn StateObserver + Send>)>,
    next_observer_id: u64,
    delimiter: u8,
    reconnect_delay: Duration,
    /// Set while `connect` writes the bootstrap command
    connecting: bool,
}

impl<L: Link, V: VolumeRegistry> Session<L, V> {
    pub fn new(link: L, volumes: V, config: &SessionConfig) -> Self {
        Self {
            link,
            volumes,
            state: ConnectionState::Uninitialized,
            queue: VecDeque::new(),
            reader: LineReader::new(config.delimiter, config.recv_buffer_size),
            observers: Vec::new(),
            next_observer_id: 0,
            delimiter: config.delimiter,
            reconnect_delay: config.reconnect_delay(),
            connecting: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True if the head command has been at least partly written.
    pub fn in_flight(&self) -> bool {
        self.queue
            .front()
            .map(|q| {
                let cmd = q.command();
                cmd.remaining_byte_count() < cmd.data().len()
            })
            .unwrap_or(false)
    }

    pub fn volumes(&self) -> &V {
        &self.volumes
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Start connecting. Does nothing once the session has been started.
    pub fn start(&mut self) {
        if self.state != ConnectionState::Uninitialized {
            tracing::debug!(state = %self.state, "session already started");
            return;
        }
        self.connect();
    }

    /// Retry timer callback.
    pub fn reconnect(&mut self) {
        if self.state == ConnectionState::Uninitialized || self.link.is_connected() {
            return;
        }
        self.connect();
    }

    /// Throw away the socket and every queued command, then connect again.
    pub fn restart(&mut self) {
        tracing::warn!(
            dropped = self.queue.len(),
            state = %self.state,
            "restarting vold session"
        );
        self.link.disconnect();
        self.queue.clear();
        self.reader.clear();
        self.connect();
    }

    /// Stop the session for good. Observers are not notified.
    pub fn teardown(&mut self) {
        tracing::debug!(dropped = self.queue.len(), "tearing down vold session");
        self.link.disconnect();
        self.queue.clear();
        self.reader.clear();
        self.state = ConnectionState::Uninitialized;
    }

    fn connect(&mut self) {
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.link.connect() {
            tracing::debug!(
                error = %e,
                retry_ms = self.reconnect_delay.as_millis() as u64,
                "vold not reachable"
            );
            self.link.schedule_reconnect(self.reconnect_delay);
            return;
        }

        tracing::info!(queued = self.queue.len(), "connected to vold");
        // the volume list goes ahead of anything posted while disconnected
        self.queue
            .push_front(Queued::Bootstrap(VolumeListCommand::new(self.delimiter)));
        self.connecting = true;
        self.write_pump();
        self.connecting = false;
    }

    // The fresh socket failed on its first write. Restarting from here would
    // recurse, so drop the bootstrap and leave the retry to the timer.
    fn abort_connect(&mut self) {
        if matches!(self.queue.front(), Some(Queued::Bootstrap(_))) {
            self.queue.pop_front();
        }
        self.link.disconnect();
        self.reader.clear();
        self.link.schedule_reconnect(self.reconnect_delay);
    }

    /// Append `cmd` to the queue and start writing it if nothing is in flight.
    pub fn post_command(&mut self, cmd: Box<dyn Command + Send>) {
        tracing::debug!(command = %cmd.description(), queued = self.queue.len(), "post command");
        let was_empty = self.queue.is_empty();
        self.queue.push_back(Queued::Caller(cmd));
        if was_empty {
            self.write_pump();
        }
    }

    /// Write as much of the head command as the socket takes right now.
    pub fn write_pump(&mut self) {
        if !self.link.is_connected() {
            return;
        }
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        let cmd = head.command_mut();
        if cmd.remaining_byte_count() == 0 {
            // sent already, waiting for the answer
            return;
        }

        match self.link.write(cmd.unsent()) {
            Ok(n) => {
                cmd.consume_bytes(n);
                if cmd.remaining_byte_count() > 0 {
                    tracing::trace!(
                        written = n,
                        remaining = cmd.remaining_byte_count(),
                        "partial write"
                    );
                    self.link.watch_writable();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.link.watch_writable();
            }
            Err(e) if self.connecting => {
                tracing::warn!(
                    error = %e,
                    retry_ms = self.reconnect_delay.as_millis() as u64,
                    "first write to vold failed"
                );
                self.abort_connect();
            }
            Err(e) => {
                tracing::warn!(error = %e, "write to vold failed");
                self.restart();
            }
        }
    }

    /// Feed bytes read from the socket and dispatch every complete record.
    pub fn handle_input(&mut self, data: &[u8]) {
        if let Err(e) = self.reader.push(data) {
            self.handle_read_error(e);
            return;
        }
        while let Some(record) = self.reader.next_record() {
            let record = String::from_utf8_lossy(&record);
            self.handle_record(&record);
        }
    }

    pub fn handle_read_error(&mut self, e: Error) {
        tracing::warn!(error = %e, "read from vold failed");
        self.restart();
    }

    /// Route one record to the head command or to the volume it names.
    pub fn handle_record(&mut self, record: &str) {
        let line = match parse_response_line(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "dropping record");
                return;
            }
        };

        if line.code.is_broadcast() {
            self.handle_broadcast(line);
            return;
        }

        let Some(head) = self.queue.front_mut() else {
            tracing::warn!(
                code = %line.code,
                remainder = line.remainder,
                "response with no command pending"
            );
            return;
        };
        if head.command().remaining_byte_count() > 0 {
            tracing::warn!(
                code = %line.code,
                command = %head.command().description(),
                "response before command was fully sent"
            );
            return;
        }

        let is_bootstrap = matches!(head, Queued::Bootstrap(_));
        head.command_mut().handle_response(line.code, line.remainder);
        if is_bootstrap {
            self.handle_volume_list(line);
        }

        if line.code.is_terminal() {
            if let Some(done) = self.queue.pop_front() {
                tracing::debug!(
                    command = %done.command().description(),
                    code = %line.code,
                    "command finished"
                );
                if let Queued::Bootstrap(list) = &done {
                    self.finish_volume_list(list);
                }
            }
            self.write_pump();
        }
    }

    // 110 <name> <mount point> <state>
    fn handle_volume_list(&mut self, line: ResponseLine<'_>) {
        if line.code != ResponseCode::VOLUME_LIST_RESULT {
            return;
        }
        let tokens: Vec<&str> = line.remainder.split_whitespace().collect();
        match tokens.split_first() {
            Some((name, rest)) => self
                .volumes
                .find_or_add(name)
                .handle_broadcast(line.code, rest),
            None => tracing::warn!("empty volume list entry"),
        }
    }

    fn finish_volume_list(&mut self, list: &VolumeListCommand) {
        match list.result() {
            Some(code) if code.is_success() => {
                tracing::info!(volumes = list.listed(), "volume list complete");
                self.set_state(ConnectionState::Ready);
            }
            Some(code) => {
                tracing::error!(code = %code, volumes = list.listed(), "volume list failed")
            }
            None => {}
        }
    }

    // Volume <name> <tokens...>
    fn handle_broadcast(&mut self, line: ResponseLine<'_>) {
        let tokens: Vec<&str> = line.remainder.split_whitespace().collect();
        match tokens.as_slice() {
            ["Volume", name, rest @ ..] => {
                self.volumes.find_or_add(name).handle_broadcast(line.code, rest)
            }
            _ => tracing::debug!(
                code = %line.code,
                remainder = line.remainder,
                "ignoring broadcast"
            ),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "vold session state changed");
        self.state = state;

        let event = StateChangedEvent::new(state);
        for (_, observer) in self.observers.iter_mut() {
            observer.notify(&event);
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn StateObserver + Send>) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(i, _)| *i != id);
        self.observers.len() != before
    }
}
