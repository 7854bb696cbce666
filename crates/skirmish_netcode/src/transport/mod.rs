//! # Transport Layer
//!
//! UDP endpoint with connection sessions and per-packet delivery modes.
//!
//! ## Frame layout
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────────┐
//! │ kind (1) │ frame body                                    │
//! ├──────────┼───────────────────────────────────────────────┤
//! │ Connect  │ -                                             │
//! │ Ack'd    │ peer id (4)                                   │
//! │ Disconn. │ reason (1)                                    │
//! │ Heartbeat│ -                                             │
//! │ Reliable │ sequence (2) │ application payload            │
//! │ Unrel.   │ application payload                           │
//! │ Ack      │ sequence (2)                                  │
//! └──────────┴───────────────────────────────────────────────┘
//! ```
//!
//! The endpoint synthesizes connect/disconnect/timeout events over raw UDP
//! so the server and client loops see the same event vocabulary. Polling
//! uses a bounded socket timeout so the owning loop observes stop requests
//! within that bound instead of blocking indefinitely.
//!
//! Congestion control, NAT traversal and encryption are out of scope.

mod reliability;

pub use reliability::{sequence_newer, ReliabilityLayer};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::MAX_PACKET_SIZE;

/// Receive buffer size. Larger than any legal datagram so oversized
/// payloads are observed (and warned about) rather than silently truncated
/// at the legal limit.
const RECV_BUFFER_SIZE: usize = 2 * MAX_PACKET_SIZE;

/// A session is declared dead after this long without any inbound frame.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(8);

/// Keep-alive interval for send-idle sessions.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between connection request retries on the client side.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Connection attempts before the client gives up.
const MAX_CONNECT_ATTEMPTS: u32 = 20;

/// Delivery mode for an outbound packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Retransmitted until acked, delivered in enqueue order. The default.
    #[default]
    Reliable,
    /// Fire and forget.
    Unreliable,
}

/// Reason code carried by a disconnect notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Ordinary disconnect with no further detail.
    #[default]
    Generic = 0,
    /// The remote went silent past the idle timeout.
    Timeout = 1,
    /// The server is restarting.
    Restarting = 2,
    /// The server is shutting down.
    Stopping = 3,
    /// The peer was kicked.
    Kicked = 4,
}

impl DisconnectReason {
    /// Decodes a reason byte, defaulting to [`Self::Generic`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Timeout,
            2 => Self::Restarting,
            3 => Self::Stopping,
            4 => Self::Kicked,
            _ => Self::Generic,
        }
    }
}

/// Frame kinds on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Connect = 0,
    ConnectAck = 1,
    Disconnect = 2,
    Heartbeat = 3,
    Reliable = 4,
    Unreliable = 5,
    Ack = 6,
}

impl FrameKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connect),
            1 => Some(Self::ConnectAck),
            2 => Some(Self::Disconnect),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::Reliable),
            5 => Some(Self::Unreliable),
            6 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Event surfaced by [`UdpEndpoint::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session was established with the remote.
    Connected(SocketAddr),
    /// An application payload arrived.
    Received {
        /// Source of the payload.
        addr: SocketAddr,
        /// Application bytes (opcode byte first).
        payload: Vec<u8>,
    },
    /// The remote disconnected explicitly.
    Disconnected {
        /// The remote that left.
        addr: SocketAddr,
        /// Reason it supplied.
        reason: DisconnectReason,
    },
    /// The remote went silent past the idle timeout (or never answered a
    /// connection request).
    TimedOut(SocketAddr),
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Datagrams sent.
    pub packets_sent: u64,
    /// Datagrams received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors (socket errors and unparseable frames).
    pub recv_errors: u64,
    /// Payloads dropped for exceeding [`MAX_PACKET_SIZE`].
    pub oversize_dropped: u64,
}

/// Per-remote session state.
#[derive(Debug)]
struct Session {
    reliability: ReliabilityLayer,
    last_recv: Instant,
    last_send: Instant,
    /// False on the client side until the ConnectAck arrives.
    connected: bool,
    /// Server side: the id announced in our ConnectAck, kept so duplicate
    /// connection requests get the same answer.
    announced_id: Option<u32>,
    connect_attempts: u32,
}

impl Session {
    fn new(connected: bool) -> Self {
        let now = Instant::now();
        Self {
            reliability: ReliabilityLayer::new(),
            last_recv: now,
            last_send: now,
            connected,
            announced_id: None,
            connect_attempts: 0,
        }
    }
}

/// UDP endpoint shared by the transport server and client.
///
/// Owns the socket, the per-remote sessions and all packet-framing state.
/// Exactly one thread - the network thread of the owning loop - ever
/// touches an endpoint.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    /// `Some(limit)` for listening endpoints, `None` for client endpoints.
    accept_limit: Option<usize>,
    /// The one remote a client endpoint talks to.
    remote: Option<SocketAddr>,
    sessions: HashMap<SocketAddr, Session>,
    pending_events: VecDeque<TransportEvent>,
    assigned_id: Option<u32>,
    stats: TransportStats,
    nonblocking: bool,
    read_timeout: Option<Duration>,
}

impl UdpEndpoint {
    /// Binds a listening endpoint accepting up to `max_sessions` remotes.
    pub fn bind(addr: SocketAddr, max_sessions: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            accept_limit: Some(max_sessions),
            remote: None,
            sessions: HashMap::new(),
            pending_events: VecDeque::new(),
            assigned_id: None,
            stats: TransportStats::default(),
            nonblocking: false,
            read_timeout: None,
        })
    }

    /// Creates a client endpoint and sends the first connection request.
    ///
    /// The connection is not established until [`TransportEvent::Connected`]
    /// is polled; requests are retried until the server answers or the
    /// attempt budget runs out (surfaced as [`TransportEvent::TimedOut`]).
    pub fn connect(remote: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid wildcard address")
        } else {
            "[::]:0".parse().expect("valid wildcard address")
        };
        let socket = UdpSocket::bind(bind_addr)?;
        let local_addr = socket.local_addr()?;

        let mut endpoint = Self {
            socket,
            local_addr,
            accept_limit: None,
            remote: Some(remote),
            sessions: HashMap::new(),
            pending_events: VecDeque::new(),
            assigned_id: None,
            stats: TransportStats::default(),
            nonblocking: false,
            read_timeout: None,
        };

        let mut session = Session::new(false);
        session.connect_attempts = 1;
        endpoint.sessions.insert(remote, session);
        endpoint.send_frame(remote, FrameKind::Connect, &[]);
        Ok(endpoint)
    }

    /// The locally bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The remote a client endpoint was created for.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// The peer id the server announced to this client endpoint.
    #[must_use]
    pub const fn assigned_id(&self) -> Option<u32> {
        self.assigned_id
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Transport statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Confirms an accepted connection, announcing the assigned peer id.
    ///
    /// Server side only; called by the owning loop after it registered the
    /// peer surfaced by [`TransportEvent::Connected`].
    pub fn accept(&mut self, addr: SocketAddr, id: u32) {
        if let Some(session) = self.sessions.get_mut(&addr) {
            session.announced_id = Some(id);
            session.last_send = Instant::now();
        } else {
            tracing::warn!("accept for unknown session {addr} (ignoring)");
            return;
        }
        let body = id.to_le_bytes();
        self.send_frame(addr, FrameKind::ConnectAck, &body);
    }

    /// Sends an application payload to a connected remote.
    ///
    /// Oversized payloads and payloads for unknown sessions are dropped
    /// with a log line; neither is an error to the caller.
    pub fn send_payload(&mut self, addr: SocketAddr, payload: &[u8], mode: DeliveryMode) {
        if payload.len() > MAX_PACKET_SIZE {
            tracing::warn!(
                "refusing to send payload of {} bytes to {addr} (max is {MAX_PACKET_SIZE})",
                payload.len()
            );
            self.stats.oversize_dropped += 1;
            return;
        }
        let Some(session) = self.sessions.get_mut(&addr) else {
            tracing::debug!("no session for {addr} (dropping send)");
            return;
        };

        match mode {
            DeliveryMode::Reliable => {
                let sequence = session.reliability.next_sequence();
                let mut datagram = Vec::with_capacity(3 + payload.len());
                datagram.push(FrameKind::Reliable as u8);
                datagram.extend_from_slice(&sequence.to_le_bytes());
                datagram.extend_from_slice(payload);
                session.last_send = Instant::now();
                session.reliability.track(sequence, datagram.clone());
                Self::send_raw(&self.socket, &mut self.stats, addr, &datagram);
            }
            DeliveryMode::Unreliable => {
                let mut datagram = Vec::with_capacity(1 + payload.len());
                datagram.push(FrameKind::Unreliable as u8);
                datagram.extend_from_slice(payload);
                session.last_send = Instant::now();
                Self::send_raw(&self.socket, &mut self.stats, addr, &datagram);
            }
        }
    }

    /// Notifies the remote and tears the session down immediately.
    pub fn disconnect(&mut self, addr: SocketAddr, reason: DisconnectReason) {
        if self.sessions.remove(&addr).is_some() {
            self.send_frame(addr, FrameKind::Disconnect, &[reason as u8]);
        }
    }

    /// Disconnects every session with the same reason.
    pub fn disconnect_all(&mut self, reason: DisconnectReason) {
        let addrs: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for addr in addrs {
            self.disconnect(addr, reason);
        }
    }

    /// Best-effort resend of every unacked reliable datagram, used when a
    /// loop exits and wants its tail flushed.
    pub fn flush(&mut self) {
        for (addr, session) in &self.sessions {
            for datagram in session.reliability.pending_datagrams() {
                Self::send_raw(&self.socket, &mut self.stats, *addr, &datagram);
            }
        }
    }

    /// Polls for the next transport event.
    ///
    /// Waits on the socket for at most `timeout` (pass zero to drain
    /// without blocking), runs periodic upkeep (retransmits, heartbeats,
    /// idle-timeout scan) and returns the next queued event, if any.
    pub fn poll(&mut self, timeout: Duration) -> Option<TransportEvent> {
        if let Some(event) = self.pending_events.pop_front() {
            return Some(event);
        }

        self.upkeep();
        if let Some(event) = self.pending_events.pop_front() {
            return Some(event);
        }

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        self.configure_blocking(timeout);
        match self.socket.recv_from(&mut buffer) {
            Ok((len, addr)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                self.handle_datagram(addr, &buffer[..len]);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                self.stats.recv_errors += 1;
                tracing::debug!("socket receive failed: {e}");
            }
        }

        self.pending_events.pop_front()
    }

    fn configure_blocking(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            if !self.nonblocking {
                if let Err(e) = self.socket.set_nonblocking(true) {
                    tracing::debug!("set_nonblocking failed: {e}");
                }
                self.nonblocking = true;
            }
        } else {
            if self.nonblocking {
                if let Err(e) = self.socket.set_nonblocking(false) {
                    tracing::debug!("set_nonblocking failed: {e}");
                }
                self.nonblocking = false;
            }
            if self.read_timeout != Some(timeout) {
                if let Err(e) = self.socket.set_read_timeout(Some(timeout)) {
                    tracing::debug!("set_read_timeout failed: {e}");
                }
                self.read_timeout = Some(timeout);
            }
        }
    }

    /// Retransmits, heartbeats, connection retries and the idle-timeout
    /// scan. Runs once per poll.
    fn upkeep(&mut self) {
        let now = Instant::now();
        let is_client = self.accept_limit.is_none();

        for (addr, session) in &mut self.sessions {
            for datagram in session.reliability.due_resends(now) {
                Self::send_raw(&self.socket, &mut self.stats, *addr, &datagram);
                session.last_send = now;
            }

            if session.connected {
                if now.duration_since(session.last_send) >= HEARTBEAT_INTERVAL {
                    Self::send_raw(
                        &self.socket,
                        &mut self.stats,
                        *addr,
                        &[FrameKind::Heartbeat as u8],
                    );
                    session.last_send = now;
                }
            } else if is_client
                && now.duration_since(session.last_send) >= CONNECT_RETRY_INTERVAL
            {
                Self::send_raw(
                    &self.socket,
                    &mut self.stats,
                    *addr,
                    &[FrameKind::Connect as u8],
                );
                session.connect_attempts += 1;
                session.last_send = now;
            }
        }

        // A failed reliability layer condemns the session even though
        // heartbeats may still be flowing: the remote's in-order delivery
        // is wedged behind the sequence that will never arrive.
        let dead: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, session)| {
                now.duration_since(session.last_recv) >= CONNECTION_TIMEOUT
                    || session.reliability.is_failed()
                    || (!session.connected && session.connect_attempts > MAX_CONNECT_ATTEMPTS)
            })
            .map(|(addr, _)| *addr)
            .collect();
        for addr in dead {
            self.sessions.remove(&addr);
            self.pending_events.push_back(TransportEvent::TimedOut(addr));
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, bytes: &[u8]) {
        let Some(&kind_byte) = bytes.first() else {
            self.stats.recv_errors += 1;
            return;
        };
        let Some(kind) = FrameKind::from_u8(kind_byte) else {
            self.stats.recv_errors += 1;
            tracing::warn!("unknown frame kind {kind_byte} from {addr} (ignoring)");
            return;
        };
        let body = &bytes[1..];
        let now = Instant::now();

        match kind {
            FrameKind::Connect => self.handle_connect(addr),
            FrameKind::ConnectAck => {
                if self.accept_limit.is_some() {
                    return; // Servers never receive acks to connections.
                }
                let Some(session) = self.sessions.get_mut(&addr) else {
                    return;
                };
                session.last_recv = now;
                if body.len() < 4 {
                    self.stats.recv_errors += 1;
                    return;
                }
                let id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                if !session.connected {
                    session.connected = true;
                    self.assigned_id = Some(id);
                    self.pending_events
                        .push_back(TransportEvent::Connected(addr));
                }
            }
            FrameKind::Disconnect => {
                let reason = body
                    .first()
                    .copied()
                    .map_or(DisconnectReason::Generic, DisconnectReason::from_u8);
                if self.sessions.remove(&addr).is_some() {
                    self.pending_events
                        .push_back(TransportEvent::Disconnected { addr, reason });
                }
            }
            FrameKind::Heartbeat => {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    session.last_recv = now;
                }
            }
            FrameKind::Reliable => {
                if body.len() < 2 {
                    self.stats.recv_errors += 1;
                    return;
                }
                let sequence = u16::from_le_bytes([body[0], body[1]]);
                let payload = &body[2..];
                let Some(session) = self.sessions.get_mut(&addr) else {
                    tracing::debug!("reliable frame from unknown remote {addr} (ignoring)");
                    return;
                };
                session.last_recv = now;

                // Ack even duplicates, or the remote resends forever.
                let mut ack = [FrameKind::Ack as u8, 0, 0];
                ack[1..].copy_from_slice(&sequence.to_le_bytes());
                Self::send_raw(&self.socket, &mut self.stats, addr, &ack);

                let delivered = session.reliability.accept(sequence, payload.to_vec());
                for item in delivered {
                    self.queue_received(addr, item);
                }
            }
            FrameKind::Unreliable => {
                let Some(session) = self.sessions.get_mut(&addr) else {
                    tracing::debug!("unreliable frame from unknown remote {addr} (ignoring)");
                    return;
                };
                session.last_recv = now;
                self.queue_received(addr, body.to_vec());
            }
            FrameKind::Ack => {
                if body.len() < 2 {
                    self.stats.recv_errors += 1;
                    return;
                }
                let sequence = u16::from_le_bytes([body[0], body[1]]);
                if let Some(session) = self.sessions.get_mut(&addr) {
                    session.last_recv = now;
                    session.reliability.acknowledge(sequence);
                }
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr) {
        let Some(limit) = self.accept_limit else {
            return; // Client endpoints ignore connection requests.
        };

        if let Some(session) = self.sessions.get_mut(&addr) {
            session.last_recv = Instant::now();
            // Duplicate request: the ack got lost, answer it again.
            if let Some(id) = session.announced_id {
                let body = id.to_le_bytes();
                self.send_frame(addr, FrameKind::ConnectAck, &body);
            }
            return;
        }

        if self.sessions.len() >= limit {
            tracing::warn!("refusing connection from {addr}: server is full");
            self.send_frame(addr, FrameKind::Disconnect, &[DisconnectReason::Generic as u8]);
            return;
        }

        self.sessions.insert(addr, Session::new(true));
        self.pending_events
            .push_back(TransportEvent::Connected(addr));
    }

    /// Enforces the maximum payload size on receipt: anything larger is
    /// dropped with a warning and the connection is left open.
    fn queue_received(&mut self, addr: SocketAddr, payload: Vec<u8>) {
        if payload.len() > MAX_PACKET_SIZE {
            tracing::warn!(
                "dropping packet of {} bytes from {addr} (max is {MAX_PACKET_SIZE})",
                payload.len()
            );
            self.stats.oversize_dropped += 1;
            return;
        }
        self.pending_events
            .push_back(TransportEvent::Received { addr, payload });
    }

    fn send_frame(&mut self, addr: SocketAddr, kind: FrameKind, body: &[u8]) {
        let mut datagram = Vec::with_capacity(1 + body.len());
        datagram.push(kind as u8);
        datagram.extend_from_slice(body);
        Self::send_raw(&self.socket, &mut self.stats, addr, &datagram);
    }

    fn send_raw(socket: &UdpSocket, stats: &mut TransportStats, addr: SocketAddr, bytes: &[u8]) {
        match socket.send_to(bytes, addr) {
            Ok(sent) => {
                stats.packets_sent += 1;
                stats.bytes_sent += sent as u64;
            }
            Err(e) => {
                stats.send_errors += 1;
                tracing::debug!("send to {addr} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_server(max_sessions: usize) -> UdpEndpoint {
        UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), max_sessions)
            .expect("bind ephemeral port")
    }

    fn raw_client() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind raw client");
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn drain(endpoint: &mut UdpEndpoint, deadline: Duration) -> Vec<TransportEvent> {
        let start = Instant::now();
        let mut events = Vec::new();
        while start.elapsed() < deadline {
            if let Some(event) = endpoint.poll(Duration::from_millis(10)) {
                events.push(event);
            } else if !events.is_empty() {
                break;
            }
        }
        events
    }

    #[test]
    fn connect_handshake_and_payload() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let client = raw_client();

        client.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(matches!(events.first(), Some(TransportEvent::Connected(_))));

        let TransportEvent::Connected(addr) = events[0] else {
            unreachable!()
        };
        server.accept(addr, 1);

        // The client sees the ack with the announced id.
        let mut buffer = [0u8; 64];
        let (len, _) = client.recv_from(&mut buffer).unwrap();
        assert_eq!(buffer[0], FrameKind::ConnectAck as u8);
        assert_eq!(len, 5);
        assert_eq!(u32::from_le_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]), 1);

        // Reliable payload shows up as Received and gets acked.
        let mut frame = vec![FrameKind::Reliable as u8, 0, 0];
        frame.extend_from_slice(b"hello");
        client.send_to(&frame, server_addr).unwrap();

        let events = drain(&mut server, Duration::from_millis(500));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Received { payload, .. } if payload == b"hello"
        )));

        let (len, _) = client.recv_from(&mut buffer).unwrap();
        assert_eq!(len, 3);
        assert_eq!(buffer[0], FrameKind::Ack as u8);
    }

    #[test]
    fn oversized_payload_is_dropped_but_connection_survives() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let client = raw_client();

        client.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(matches!(events.first(), Some(TransportEvent::Connected(_))));

        // An unreliable frame well past the limit.
        let mut frame = vec![FrameKind::Unreliable as u8];
        frame.extend_from_slice(&vec![0xAB; MAX_PACKET_SIZE + 200]);
        client.send_to(&frame, server_addr).unwrap();

        let events = drain(&mut server, Duration::from_millis(300));
        assert!(events.is_empty(), "oversized payload must not surface");
        assert_eq!(server.stats().oversize_dropped, 1);
        assert_eq!(server.session_count(), 1, "connection must stay open");

        // The same remote can still deliver a normal packet afterwards.
        let mut frame = vec![FrameKind::Unreliable as u8];
        frame.extend_from_slice(b"still here");
        client.send_to(&frame, server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Received { payload, .. } if payload == b"still here"
        )));
    }

    #[test]
    fn unacked_reliable_send_tears_the_session_down() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let client = raw_client();

        client.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        let Some(TransportEvent::Connected(addr)) = events.first().cloned() else {
            panic!("expected Connected, got {events:?}");
        };
        server.accept(addr, 1);

        // The remote never acks. Once the resend budget runs out the
        // session must die visibly rather than leave the remote's ordered
        // stream wedged behind the lost sequence.
        server.send_payload(addr, b"must arrive", DeliveryMode::Reliable);
        let start = Instant::now();
        loop {
            if let Some(TransportEvent::TimedOut(dead)) = server.poll(Duration::from_millis(10)) {
                assert_eq!(dead, addr);
                break;
            }
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "session with undeliverable reliable traffic never timed out"
            );
        }
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn server_full_refuses_new_connections() {
        let mut server = loopback_server(1);
        let server_addr = server.local_addr();

        let first = raw_client();
        first.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(matches!(events.first(), Some(TransportEvent::Connected(_))));

        let second = raw_client();
        second.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(300));
        assert!(events.is_empty());

        let mut buffer = [0u8; 8];
        let (len, _) = second.recv_from(&mut buffer).unwrap();
        assert_eq!(len, 2);
        assert_eq!(buffer[0], FrameKind::Disconnect as u8);
        assert_eq!(server.session_count(), 1);
    }

    #[test]
    fn explicit_disconnect_surfaces_the_reason() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let client = raw_client();

        client.send_to(&[FrameKind::Connect as u8], server_addr).unwrap();
        drain(&mut server, Duration::from_millis(500));

        client
            .send_to(
                &[FrameKind::Disconnect as u8, DisconnectReason::Stopping as u8],
                server_addr,
            )
            .unwrap();
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Disconnected {
                reason: DisconnectReason::Stopping,
                ..
            }
        )));
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn unknown_frame_kind_is_counted_not_fatal() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let client = raw_client();

        client.send_to(&[250, 1, 2, 3], server_addr).unwrap();
        let events = drain(&mut server, Duration::from_millis(300));
        assert!(events.is_empty());
        assert_eq!(server.stats().recv_errors, 1);
    }

    #[test]
    fn endpoint_pair_round_trip() {
        let mut server = loopback_server(4);
        let server_addr = server.local_addr();
        let mut client = UdpEndpoint::connect(server_addr).expect("client endpoint");

        // Server sees the request and accepts.
        let events = drain(&mut server, Duration::from_millis(500));
        let Some(TransportEvent::Connected(addr)) = events.first().cloned() else {
            panic!("expected Connected, got {events:?}");
        };
        server.accept(addr, 7);

        // Client learns its id.
        let events = drain(&mut client, Duration::from_millis(500));
        assert!(matches!(events.first(), Some(TransportEvent::Connected(_))));
        assert_eq!(client.assigned_id(), Some(7));

        // Reliable payloads flow both ways.
        client.send_payload(server_addr, b"ping", DeliveryMode::Reliable);
        let events = drain(&mut server, Duration::from_millis(500));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Received { payload, .. } if payload == b"ping"
        )));

        server.send_payload(addr, b"pong", DeliveryMode::Reliable);
        let events = drain(&mut client, Duration::from_millis(500));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Received { payload, .. } if payload == b"pong"
        )));
    }
}
