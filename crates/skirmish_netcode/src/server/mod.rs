//! # Transport Server
//!
//! Authoritative game server: accepts connections, dispatches packets to
//! registered handlers and broadcasts state, all on one dedicated worker
//! thread.
//!
//! ## Threading
//!
//! ```text
//!  game / control thread               worker thread
//!  ────────────────────────            ─────────────────────────────
//!  GameServer::send ──────▶ outgoing ─▶ drain control commands
//!  GameServer::stop ──────▶ control  ─▶ drain outgoing packets
//!  GameServer::kick ──────▶ control  ─▶ emit transforms (in game)
//!                                      ─▶ poll socket (bounded)
//! ```
//!
//! The worker owns the socket, the peer table and the lobby state
//! outright. Other threads reach them only through the two channels, so
//! none of that state needs a lock.

mod peers;

pub use peers::{Peer, PeerTable};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::lobby::{server_registry, LobbyState};
use crate::protocol::{
    ClientOpcode, DecodeError, HandlerRegistry, LobbyEvent, PacketReader, ServerMessage,
};
use crate::transport::{DeliveryMode, DisconnectReason, TransportEvent, UdpEndpoint};
use crate::{LifecyclePhase, PeerId, TRANSFORM_EMIT_INTERVAL_MS};

/// Bound on each socket wait, so control commands are observed promptly.
const POLL_TIMEOUT: Duration = Duration::from_millis(15);

/// Poll interval while waiting for the worker to finish stopping.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Recipients of an outbound packet.
#[derive(Clone, Debug)]
pub enum SendTarget {
    /// Every connected peer.
    All,
    /// Every connected peer except one.
    AllExcept(PeerId),
    /// A single peer.
    One(PeerId),
    /// An explicit set of peers.
    Many(Vec<PeerId>),
}

/// Control-plane command consumed by the worker.
enum ControlCommand {
    Stop,
    Restart,
    Kick(PeerId, DisconnectReason),
    KickAll(DisconnectReason),
}

/// An application packet queued for delivery.
struct OutboundPacket {
    message: ServerMessage,
    target: SendTarget,
    mode: DeliveryMode,
}

/// Why the inner loop of one server run exited.
#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stop,
    Restart,
}

/// Lifecycle and lobby callbacks, invoked on the worker thread.
///
/// Keep these short: the worker does not poll the socket while a hook
/// runs.
#[derive(Default)]
pub struct ServerHooks {
    /// The server bound its socket and is accepting connections.
    pub on_started: Option<Box<dyn Fn(SocketAddr) + Send + Sync>>,
    /// A peer connected and was assigned an id.
    pub on_connect: Option<Box<dyn Fn(PeerId, SocketAddr) + Send + Sync>>,
    /// A peer disconnected (explicitly or by kick).
    pub on_disconnect: Option<Box<dyn Fn(PeerId) + Send + Sync>>,
    /// A peer went silent past the idle timeout.
    pub on_timeout: Option<Box<dyn Fn(PeerId) + Send + Sync>>,
    /// A peer left the lobby while staying connected.
    pub on_leave: Option<Box<dyn Fn(PeerId) + Send + Sync>>,
    /// The server finished shutting down (also fires between restarts).
    pub on_stopped: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Handler for one client opcode, run on the worker thread.
pub type ServerHandler = Box<
    dyn Fn(&mut ServerContext<'_>, PeerId, &mut PacketReader<'_>) -> Result<(), DecodeError>
        + Send,
>;

/// Worker-side state lent to packet handlers.
pub struct ServerContext<'a> {
    endpoint: &'a mut UdpEndpoint,
    /// Connected peers.
    pub peers: &'a mut PeerTable,
    /// Lobby and match state.
    pub lobby: &'a mut LobbyState,
    hooks: &'a ServerHooks,
}

impl ServerContext<'_> {
    /// Sends a message to one peer.
    pub fn send(&mut self, id: PeerId, message: &ServerMessage, mode: DeliveryMode) {
        let Some(peer) = self.peers.get(id) else {
            tracing::debug!("send to unknown peer {id} (dropping)");
            return;
        };
        self.endpoint.send_payload(peer.addr, &message.encode(), mode);
    }

    /// Sends a message to every connected peer.
    pub fn broadcast(&mut self, message: &ServerMessage, mode: DeliveryMode) {
        let bytes = message.encode();
        for peer in self.peers.iter() {
            self.endpoint.send_payload(peer.addr, &bytes, mode);
        }
    }

    /// Sends a message to every connected peer but one.
    pub fn broadcast_except(&mut self, excluded: PeerId, message: &ServerMessage, mode: DeliveryMode) {
        let bytes = message.encode();
        for peer in self.peers.others(excluded) {
            self.endpoint.send_payload(peer.addr, &bytes, mode);
        }
    }

    /// Disconnects a peer immediately and tells the lobby it is gone.
    pub fn kick(&mut self, id: PeerId, reason: DisconnectReason) {
        let Some(peer) = self.peers.remove(id) else {
            return;
        };
        tracing::info!("kicking peer {id} ({reason:?})");
        self.endpoint.disconnect(peer.addr, reason);
        self.lobby.transforms.remove(&id);
        if peer.username.is_some() {
            self.broadcast(
                &ServerMessage::Lobby(LobbyEvent::Leave { id }),
                DeliveryMode::Reliable,
            );
        }
        if let Some(hook) = &self.hooks.on_disconnect {
            hook(id);
        }
    }

    /// Runs the leave hook for a peer that left the lobby but stays
    /// connected.
    pub(crate) fn notify_leave(&self, id: PeerId) {
        if let Some(hook) = &self.hooks.on_leave {
            hook(id);
        }
    }
}

/// Handle to the server worker, shared freely across threads.
///
/// `start` spawns the worker; every other method is a request the worker
/// picks up on its next iteration. A stopped server can be started again,
/// and `restart` re-runs the bind-accept-serve cycle on the same worker
/// thread without tearing the thread down.
pub struct GameServer {
    phase: Arc<AtomicU8>,
    hooks: Arc<ServerHooks>,
    control_tx: Sender<ControlCommand>,
    control_rx: Receiver<ControlCommand>,
    outgoing_tx: Sender<OutboundPacket>,
    outgoing_rx: Receiver<OutboundPacket>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    emit_interval: Duration,
}

impl GameServer {
    /// Creates a stopped server with the given hooks.
    #[must_use]
    pub fn new(hooks: ServerHooks) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (outgoing_tx, outgoing_rx) = crossbeam_channel::unbounded();
        Self {
            phase: Arc::new(AtomicU8::new(LifecyclePhase::Stopped as u8)),
            hooks: Arc::new(hooks),
            control_tx,
            control_rx,
            outgoing_tx,
            outgoing_rx,
            local_addr: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            emit_interval: Duration::from_millis(TRANSFORM_EMIT_INTERVAL_MS),
        }
    }

    /// Overrides the transform broadcast interval.
    #[must_use]
    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval = interval;
        self
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Returns true while the worker is serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == LifecyclePhase::Running
    }

    /// The bound address, once the worker has its socket. Useful when
    /// binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Spawns the worker and begins serving on `port`.
    ///
    /// No-op with a warning if the server is not stopped. Bind failures
    /// are reported through the `on_stopped` hook and the phase returning
    /// to `Stopped`, matching how a later in-loop failure would surface.
    pub fn start(&self, port: u16, max_clients: usize) {
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
            tracing::warn!("server start requested but it is not stopped");
            return;
        }

        // Leftovers from a previous run would confuse the new one.
        while self.control_rx.try_recv().is_ok() {}
        while self.outgoing_rx.try_recv().is_ok() {}

        let phase = Arc::clone(&self.phase);
        let hooks = Arc::clone(&self.hooks);
        let control_rx = self.control_rx.clone();
        let outgoing_rx = self.outgoing_rx.clone();
        let local_addr = Arc::clone(&self.local_addr);
        let emit_interval = self.emit_interval;

        let spawned = thread::Builder::new()
            .name("netcode-server".into())
            .spawn(move || {
                loop {
                    let exit = run_once(
                        port,
                        max_clients,
                        emit_interval,
                        &phase,
                        &hooks,
                        &control_rx,
                        &outgoing_rx,
                        &local_addr,
                    );
                    if exit == LoopExit::Stop {
                        break;
                    }
                    tracing::info!("restarting server on port {port}");
                }
                phase.store(LifecyclePhase::Stopped as u8, Ordering::Release);
            });
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(e) => {
                tracing::error!("failed to spawn server worker: {e}");
                self.phase
                    .store(LifecyclePhase::Stopped as u8, Ordering::Release);
            }
        }
    }

    /// Requests shutdown. No-op when already stopped.
    pub fn stop(&self) {
        if self.phase() == LifecyclePhase::Stopped {
            tracing::debug!("server stop requested but it is already stopped");
            return;
        }
        self.phase
            .store(LifecyclePhase::Stopping as u8, Ordering::Release);
        let _ = self.control_tx.send(ControlCommand::Stop);
    }

    /// Requests shutdown and waits until the worker has finished.
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
                tracing::error!("server worker panicked");
                self.phase
                    .store(LifecyclePhase::Stopped as u8, Ordering::Release);
                break;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Disconnects everyone and serves a fresh run on the same thread.
    pub fn restart(&self) {
        if self.phase() == LifecyclePhase::Stopped {
            tracing::warn!("server restart requested but it is stopped");
            return;
        }
        let _ = self.control_tx.send(ControlCommand::Restart);
    }

    /// Disconnects one peer.
    pub fn kick(&self, id: PeerId) {
        if self.is_running() {
            let _ = self
                .control_tx
                .send(ControlCommand::Kick(id, DisconnectReason::Kicked));
        }
    }

    /// Disconnects every peer without stopping the server.
    pub fn kick_all(&self) {
        if self.is_running() {
            let _ = self
                .control_tx
                .send(ControlCommand::KickAll(DisconnectReason::Kicked));
        }
    }

    /// Queues a message for delivery on the next worker iteration.
    pub fn send(&self, message: ServerMessage, target: SendTarget, mode: DeliveryMode) {
        if !self.is_running() {
            tracing::debug!("send requested while server is not running (dropping)");
            return;
        }
        let _ = self.outgoing_tx.send(OutboundPacket {
            message,
            target,
            mode,
        });
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.stop_and_wait();
    }
}

/// One bind-accept-serve cycle of the worker.
#[allow(clippy::too_many_arguments)]
fn run_once(
    port: u16,
    max_clients: usize,
    emit_interval: Duration,
    phase: &AtomicU8,
    hooks: &ServerHooks,
    control_rx: &Receiver<ControlCommand>,
    outgoing_rx: &Receiver<OutboundPacket>,
    local_addr: &Mutex<Option<SocketAddr>>,
) -> LoopExit {
    let bind_addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .expect("valid bind address");
    let mut endpoint = match UdpEndpoint::bind(bind_addr, max_clients) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!("failed to bind UDP port {port}: {e}");
            if let Some(hook) = &hooks.on_stopped {
                hook();
            }
            return LoopExit::Stop;
        }
    };

    let addr = endpoint.local_addr();
    *local_addr.lock() = Some(addr);
    phase.store(LifecyclePhase::Running as u8, Ordering::Release);
    tracing::info!("server listening on {addr} (up to {max_clients} clients)");
    if let Some(hook) = &hooks.on_started {
        hook(addr);
    }

    let registry = server_registry();
    let mut peers = PeerTable::new();
    let mut lobby = LobbyState::new();
    let mut last_emit = Instant::now();

    let exit = 'serve: loop {
        // Control commands first, so a stop is never delayed by traffic.
        while let Ok(command) = control_rx.try_recv() {
            let mut ctx = ServerContext {
                endpoint: &mut endpoint,
                peers: &mut peers,
                lobby: &mut lobby,
                hooks,
            };
            match command {
                ControlCommand::Stop => break 'serve LoopExit::Stop,
                ControlCommand::Restart => break 'serve LoopExit::Restart,
                ControlCommand::Kick(id, reason) => ctx.kick(id, reason),
                ControlCommand::KickAll(reason) => {
                    let ids: Vec<PeerId> = ctx.peers.iter().map(|p| p.id).collect();
                    for id in ids {
                        ctx.kick(id, reason);
                    }
                }
            }
        }

        // Queued application sends.
        while let Ok(packet) = outgoing_rx.try_recv() {
            deliver(&mut endpoint, &peers, &packet);
        }

        // Authoritative transform broadcast while a match runs.
        if lobby.game_started && last_emit.elapsed() >= emit_interval {
            last_emit = Instant::now();
            let message = ServerMessage::PlayerTransforms {
                transforms: lobby.transforms.clone(),
            };
            deliver(
                &mut endpoint,
                &peers,
                &OutboundPacket {
                    message,
                    target: SendTarget::All,
                    mode: DeliveryMode::Unreliable,
                },
            );
        }

        // One bounded wait, then drain whatever else is already queued.
        let mut event = endpoint.poll(POLL_TIMEOUT);
        while let Some(current) = event {
            handle_event(
                current,
                &mut endpoint,
                &mut peers,
                &mut lobby,
                hooks,
                &registry,
            );
            event = endpoint.poll(Duration::ZERO);
        }
    };

    let reason = match exit {
        LoopExit::Stop => DisconnectReason::Stopping,
        LoopExit::Restart => DisconnectReason::Restarting,
    };
    endpoint.disconnect_all(reason);
    endpoint.flush();
    *local_addr.lock() = None;
    tracing::info!("server on {addr} shut down ({} peers dropped)", peers.len());
    if let Some(hook) = &hooks.on_stopped {
        hook();
    }
    exit
}

fn deliver(endpoint: &mut UdpEndpoint, peers: &PeerTable, packet: &OutboundPacket) {
    let bytes = packet.message.encode();
    match &packet.target {
        SendTarget::All => {
            for peer in peers.iter() {
                endpoint.send_payload(peer.addr, &bytes, packet.mode);
            }
        }
        SendTarget::AllExcept(excluded) => {
            for peer in peers.others(*excluded) {
                endpoint.send_payload(peer.addr, &bytes, packet.mode);
            }
        }
        SendTarget::One(id) => {
            if let Some(peer) = peers.get(*id) {
                endpoint.send_payload(peer.addr, &bytes, packet.mode);
            } else {
                tracing::debug!("send to unknown peer {id} (dropping)");
            }
        }
        SendTarget::Many(ids) => {
            for id in ids {
                if let Some(peer) = peers.get(*id) {
                    endpoint.send_payload(peer.addr, &bytes, packet.mode);
                }
            }
        }
    }
}

fn handle_event(
    event: TransportEvent,
    endpoint: &mut UdpEndpoint,
    peers: &mut PeerTable,
    lobby: &mut LobbyState,
    hooks: &ServerHooks,
    registry: &HandlerRegistry<ClientOpcode, ServerHandler>,
) {
    match event {
        TransportEvent::Connected(addr) => {
            let id = peers.insert(addr);
            endpoint.accept(addr, id.0);
            tracing::info!("peer {id} connected from {addr}");
            if let Some(hook) = &hooks.on_connect {
                hook(id, addr);
            }
        }
        TransportEvent::Received { addr, payload } => {
            let Some(id) = peers.id_at(addr) else {
                tracing::debug!("payload from unregistered remote {addr} (ignoring)");
                return;
            };
            dispatch(endpoint, peers, lobby, hooks, registry, id, &payload);
        }
        TransportEvent::Disconnected { addr, reason } => {
            if let Some(peer) = peers.remove_by_addr(addr) {
                tracing::info!("peer {} disconnected ({reason:?})", peer.id);
                drop_from_lobby(endpoint, peers, lobby, &peer);
                if let Some(hook) = &hooks.on_disconnect {
                    hook(peer.id);
                }
            }
        }
        TransportEvent::TimedOut(addr) => {
            if let Some(peer) = peers.remove_by_addr(addr) {
                tracing::warn!("peer {} timed out", peer.id);
                drop_from_lobby(endpoint, peers, lobby, &peer);
                if let Some(hook) = &hooks.on_timeout {
                    hook(peer.id);
                }
            }
        }
    }
}

/// Tells the remaining players a departed peer is gone.
fn drop_from_lobby(
    endpoint: &mut UdpEndpoint,
    peers: &PeerTable,
    lobby: &mut LobbyState,
    departed: &Peer,
) {
    lobby.transforms.remove(&departed.id);
    if departed.username.is_none() {
        return; // Never joined the lobby, nothing to announce.
    }
    let bytes = ServerMessage::Lobby(LobbyEvent::Leave { id: departed.id }).encode();
    for peer in peers.iter() {
        endpoint.send_payload(peer.addr, &bytes, DeliveryMode::Reliable);
    }
}

fn dispatch(
    endpoint: &mut UdpEndpoint,
    peers: &mut PeerTable,
    lobby: &mut LobbyState,
    hooks: &ServerHooks,
    registry: &HandlerRegistry<ClientOpcode, ServerHandler>,
    sender: PeerId,
    payload: &[u8],
) {
    let mut reader = PacketReader::new(payload);
    let byte = match reader.read_u8() {
        Ok(byte) => byte,
        Err(_) => {
            tracing::warn!("empty packet from peer {sender} (ignoring)");
            return;
        }
    };
    let Some(opcode) = ClientOpcode::from_u8(byte) else {
        tracing::warn!("unknown opcode {byte} from peer {sender} (ignoring packet)");
        return;
    };
    let Some(handler) = registry.get(opcode) else {
        tracing::warn!("no handler for opcode {opcode:?} (ignoring packet)");
        return;
    };

    let mut ctx = ServerContext {
        endpoint,
        peers,
        lobby,
        hooks,
    };
    if let Err(e) = handler(&mut ctx, sender, &mut reader) {
        tracing::warn!("malformed {opcode:?} packet from peer {sender}: {e} (ignoring)");
    }
}
