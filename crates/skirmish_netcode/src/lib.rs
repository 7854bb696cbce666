//! # Skirmish Netcode
//!
//! Real-time transport and protocol layer for the Skirmish multiplayer game.
//!
//! ## Architecture
//!
//! ```text
//! NETWORK THREAD                        FOREGROUND THREAD
//! ┌─────────────────────────────┐       ┌──────────────────────────┐
//! │ GameServer / GameClient     │       │ Presentation layer       │
//! │  ├─ control command queue ◄─┼───────┼─ stop / restart / kick   │
//! │  ├─ outbound packet queue ◄─┼───────┼─ send(message)           │
//! │  ├─ UdpEndpoint (bounded    │       │                          │
//! │  │   poll, 15ms)            │       │                          │
//! │  └─ handler dispatch        │       │                          │
//! │       server: inline ───────┼──┐    │                          │
//! │       client: deferred ─────┼──┼────► CommandQueue.dequeue_one │
//! └─────────────────────────────┘  │    │  └─ ClientDispatcher     │
//!                                  │    │      └─ PrevCurQueue     │
//!                                  ▼    └──────────────────────────┘
//!                        peer table + lobby state
//!                        (owned by the network thread)
//! ```
//!
//! - **protocol**: opcode-prefixed binary messages with lobby sub-messages
//! - **transport**: UDP framing with per-packet reliable-ordered delivery
//! - **server** / **client**: one dedicated worker thread per instance
//! - **command**: FIFO bridge marshaling decoded events to the foreground
//! - **interpolation**: prev/cur snapshot queue for smooth entity motion
//!
//! ## Failure isolation
//!
//! Malformed, truncated or oversized packets are dropped with a warning and
//! never terminate a loop or a connection. The only error that prevents a
//! loop from running at all is a bind failure at start time.

pub mod client;
pub mod command;
pub mod interpolation;
pub mod lobby;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientHooks, GameClient};
pub use command::{ClientApp, ClientDispatcher, Command, CommandQueue, Scene};
pub use interpolation::PrevCurQueue;
pub use lobby::LobbyState;
pub use protocol::{
    ClientMessage, ClientOpcode, DecodeError, EntityTransform, LobbyEvent, LobbyRequest,
    ServerMessage, ServerOpcode, Vec2,
};
pub use server::{GameServer, SendTarget, ServerHooks};
pub use transport::{DeliveryMode, DisconnectReason};

/// Maximum application payload size in bytes.
///
/// Anything larger received on the wire is dropped with a warning; the
/// connection is left open.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Expected interval between authoritative transform broadcasts, in
/// milliseconds. Drives both the server emit timer and the foreground
/// interpolation progress.
pub const TRANSFORM_EMIT_INTERVAL_MS: u64 = 50;

/// Unique identifier for a connected peer.
///
/// Assigned by the server from a monotonically increasing counter when the
/// connection is registered; never reused while the peer is still
/// registered. The first peer gets id 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase shared by the transport server and client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecyclePhase {
    /// No worker thread alive.
    Stopped = 0,
    /// Worker spawned, endpoint not yet bound.
    Starting = 1,
    /// Event loop running.
    Running = 2,
    /// Stop observed, loop winding down.
    Stopping = 3,
}

impl LifecyclePhase {
    /// Decodes a phase previously stored in an atomic.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}
