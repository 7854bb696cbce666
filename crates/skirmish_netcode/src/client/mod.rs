//! # Transport Client
//!
//! Connects to one server and pumps traffic on a dedicated network thread.
//!
//! Inbound packets are never handled on the network thread: they are
//! queued as [`Command`]s for the game loop to drain (see
//! [`crate::command`]). Outbound messages queue the other way and are
//! flushed by the worker, buffered until the connection handshake
//! completes.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::command::{command_channel, Command, CommandQueue, CommandSender};
use crate::protocol::{ClientMessage, LobbyRequest, Vec2};
use crate::transport::{DeliveryMode, DisconnectReason, TransportEvent, UdpEndpoint};
use crate::{LifecyclePhase, PeerId};

/// Bound on each socket wait, so stop requests are observed promptly.
const POLL_TIMEOUT: Duration = Duration::from_millis(15);

/// Poll interval while waiting for the worker to finish stopping.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Connection callbacks, invoked on the network thread.
#[derive(Default)]
pub struct ClientHooks {
    /// The handshake completed; the server assigned us this id.
    pub on_connected: Option<Box<dyn Fn(PeerId) + Send + Sync>>,
    /// The connection ended. Also queued as [`Command::Disconnected`].
    pub on_disconnected: Option<Box<dyn Fn(DisconnectReason) + Send + Sync>>,
}

enum ClientControl {
    Stop,
}

/// Handle to the client network thread.
///
/// Construction yields the handle and the [`CommandQueue`] the game loop
/// drains; [`connect`](Self::connect) spawns the worker.
pub struct GameClient {
    phase: Arc<AtomicU8>,
    hooks: Arc<ClientHooks>,
    /// Assigned peer id, 0 until the handshake completes.
    peer_id: Arc<AtomicU32>,
    control_tx: Sender<ClientControl>,
    control_rx: Receiver<ClientControl>,
    outgoing_tx: Sender<(ClientMessage, DeliveryMode)>,
    outgoing_rx: Receiver<(ClientMessage, DeliveryMode)>,
    commands: CommandSender,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GameClient {
    /// Creates a disconnected client and the command queue it will feed.
    #[must_use]
    pub fn new(hooks: ClientHooks) -> (Self, CommandQueue) {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (outgoing_tx, outgoing_rx) = crossbeam_channel::unbounded();
        let (commands, queue) = command_channel();
        let client = Self {
            phase: Arc::new(AtomicU8::new(LifecyclePhase::Stopped as u8)),
            hooks: Arc::new(hooks),
            peer_id: Arc::new(AtomicU32::new(0)),
            control_tx,
            control_rx,
            outgoing_tx,
            outgoing_rx,
            commands,
            worker: Mutex::new(None),
        };
        (client, queue)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// The server-assigned peer id, once connected.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        match self.peer_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(PeerId(id)),
        }
    }

    /// Spawns the network thread and begins connecting to `remote`.
    ///
    /// Connection failures surface asynchronously through the
    /// `on_disconnected` hook and a [`Command::Disconnected`].
    pub fn connect(&self, remote: SocketAddr) {
        if self
            .phase
            .compare_exchange(
                LifecyclePhase::Stopped as u8,
                LifecyclePhase::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::warn!("client connect requested but it is not stopped");
            return;
        }

        while self.control_rx.try_recv().is_ok() {}
        while self.outgoing_rx.try_recv().is_ok() {}
        self.peer_id.store(0, Ordering::Release);

        let phase = Arc::clone(&self.phase);
        let hooks = Arc::clone(&self.hooks);
        let peer_id = Arc::clone(&self.peer_id);
        let control_rx = self.control_rx.clone();
        let outgoing_rx = self.outgoing_rx.clone();
        let commands = self.commands.clone();

        let spawned = thread::Builder::new()
            .name("netcode-client".into())
            .spawn(move || {
                run(
                    remote,
                    &phase,
                    &hooks,
                    &peer_id,
                    &control_rx,
                    &outgoing_rx,
                    &commands,
                );
                peer_id.store(0, Ordering::Release);
                phase.store(LifecyclePhase::Stopped as u8, Ordering::Release);
            });
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(e) => {
                tracing::error!("failed to spawn client worker: {e}");
                self.phase
                    .store(LifecyclePhase::Stopped as u8, Ordering::Release);
            }
        }
    }

    /// Requests disconnect. No-op when already stopped.
    pub fn stop(&self) {
        if self.phase() == LifecyclePhase::Stopped {
            tracing::debug!("client stop requested but it is already stopped");
            return;
        }
        self.phase
            .store(LifecyclePhase::Stopping as u8, Ordering::Release);
        let _ = self.control_tx.send(ClientControl::Stop);
    }

    /// Requests disconnect and waits until the worker has finished.
    ///
    /// Waits by polling the phase flag at [`STOP_POLL_INTERVAL`] rather
    /// than joining the worker thread.
    pub fn stop_and_wait(&self) {
        self.stop();
        let handle = self.worker.lock().take();
        loop {
            if self.phase() == LifecyclePhase::Stopped {
                break;
            }
            let finished = handle.as_ref().is_some_and(JoinHandle::is_finished);
            if self.phase() == LifecyclePhase::Stopped {
                break;
            }
            if finished {
                // Exited without reaching Stopped: the worker panicked.
                tracing::error!("client worker panicked");
                self.phase
                    .store(LifecyclePhase::Stopped as u8, Ordering::Release);
                break;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Queues a message for the server.
    ///
    /// Messages queued before the handshake completes are buffered and
    /// flushed on connect; messages queued while stopped are dropped.
    pub fn send(&self, message: ClientMessage, mode: DeliveryMode) {
        match self.phase() {
            LifecyclePhase::Stopped | LifecyclePhase::Stopping => {
                tracing::debug!("send requested while client is not connected (dropping)");
            }
            LifecyclePhase::Starting | LifecyclePhase::Running => {
                let _ = self.outgoing_tx.send((message, mode));
            }
        }
    }

    /// Asks to join the lobby under `username`.
    pub fn join_lobby(&self, username: impl Into<String>) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::Join {
                username: username.into(),
            }),
            DeliveryMode::Reliable,
        );
    }

    /// Leaves the lobby while staying connected.
    pub fn leave_lobby(&self) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::Leave),
            DeliveryMode::Reliable,
        );
    }

    /// Sets the local ready flag.
    pub fn set_ready(&self, ready: bool) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::Ready { ready }),
            DeliveryMode::Reliable,
        );
    }

    /// Sends a chat line.
    pub fn send_chat(&self, message: impl Into<String>) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::ChatMessage {
                message: message.into(),
            }),
            DeliveryMode::Reliable,
        );
    }

    /// Starts or cancels the pre-game countdown.
    pub fn set_countdown(&self, running: bool) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::CountdownChange { running }),
            DeliveryMode::Reliable,
        );
    }

    /// Asks the server to start the game.
    pub fn start_game(&self) {
        self.send(
            ClientMessage::Lobby(LobbyRequest::GameStart),
            DeliveryMode::Reliable,
        );
    }

    /// Reports the local player's position, fire-and-forget.
    pub fn send_position(&self, position: Vec2) {
        self.send(
            ClientMessage::PlayerPosition { position },
            DeliveryMode::Unreliable,
        );
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.stop_and_wait();
    }
}

/// The network thread body: one connection from handshake to teardown.
fn run(
    remote: SocketAddr,
    phase: &AtomicU8,
    hooks: &ClientHooks,
    peer_id: &AtomicU32,
    control_rx: &Receiver<ClientControl>,
    outgoing_rx: &Receiver<(ClientMessage, DeliveryMode)>,
    commands: &CommandSender,
) {
    let mut endpoint = match UdpEndpoint::connect(remote) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!("failed to open client socket: {e}");
            report_disconnect(hooks, commands, DisconnectReason::Generic);
            return;
        }
    };
    tracing::info!("connecting to {remote} from {}", endpoint.local_addr());

    let mut connected = false;
    let mut buffered: VecDeque<(ClientMessage, DeliveryMode)> = VecDeque::new();

    loop {
        if control_rx.try_recv().is_ok() {
            // Local stop: tell the server and fall out quietly.
            endpoint.disconnect(remote, DisconnectReason::Generic);
            endpoint.flush();
            tracing::info!("disconnected from {remote} (local stop)");
            report_disconnect(hooks, commands, DisconnectReason::Generic);
            return;
        }

        while let Ok(entry) = outgoing_rx.try_recv() {
            if connected {
                endpoint.send_payload(remote, &entry.0.encode(), entry.1);
            } else {
                buffered.push_back(entry);
            }
        }

        let mut event = endpoint.poll(POLL_TIMEOUT);
        while let Some(current) = event {
            match current {
                TransportEvent::Connected(_) => {
                    connected = true;
                    let id = endpoint.assigned_id().unwrap_or_default();
                    peer_id.store(id, Ordering::Release);
                    phase.store(LifecyclePhase::Running as u8, Ordering::Release);
                    tracing::info!("connected to {remote} as peer {id}");
                    if let Some(hook) = &hooks.on_connected {
                        hook(PeerId(id));
                    }
                    while let Some((message, mode)) = buffered.pop_front() {
                        endpoint.send_payload(remote, &message.encode(), mode);
                    }
                }
                TransportEvent::Received { payload, .. } => {
                    commands.push(Command::Packet(payload));
                }
                TransportEvent::Disconnected { reason, .. } => {
                    tracing::info!("server closed the connection ({reason:?})");
                    report_disconnect(hooks, commands, reason);
                    return;
                }
                TransportEvent::TimedOut(_) => {
                    tracing::warn!("connection to {remote} timed out");
                    report_disconnect(hooks, commands, DisconnectReason::Timeout);
                    return;
                }
            }
            event = endpoint.poll(Duration::ZERO);
        }
    }
}

fn report_disconnect(hooks: &ClientHooks, commands: &CommandSender, reason: DisconnectReason) {
    if let Some(hook) = &hooks.on_disconnected {
        hook(reason);
    }
    commands.push(Command::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_on_a_stopped_client_is_a_no_op() {
        let (client, _queue) = GameClient::new(ClientHooks::default());
        assert_eq!(client.phase(), LifecyclePhase::Stopped);
        client.stop();
        assert_eq!(client.phase(), LifecyclePhase::Stopped);
    }

    #[test]
    fn stop_and_wait_parks_the_phase_at_stopped() {
        let (client, _queue) = GameClient::new(ClientHooks::default());
        client.connect("127.0.0.1:9".parse().unwrap());

        client.stop_and_wait();
        assert_eq!(client.phase(), LifecyclePhase::Stopped);
        assert!(client.worker.lock().is_none());
    }

    #[test]
    fn send_while_stopped_is_dropped() {
        let (client, _queue) = GameClient::new(ClientHooks::default());
        client.join_lobby("alice");
        assert!(client.outgoing_rx.is_empty());
    }

    #[test]
    fn peer_id_is_unset_before_connecting() {
        let (client, _queue) = GameClient::new(ClientHooks::default());
        assert_eq!(client.peer_id(), None);
    }
}
