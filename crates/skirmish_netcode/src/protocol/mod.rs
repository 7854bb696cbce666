//! # Network Protocol
//!
//! Binary opcode-dispatched message protocol.
//!
//! ## Packet structure
//!
//! ```text
//! ┌───────────────┬──────────────────────────────────────────────┐
//! │ opcode (1)    │ payload (variable)                           │
//! └───────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Composite families (the lobby) carry a second sub-opcode byte. Payload
//! fields use fixed-width little-endian integers, u16-length-prefixed UTF-8
//! strings and two-component f32 vectors.
//!
//! Decoding is total over well-formed input and fails cleanly with a
//! [`DecodeError`] on anything else; `decode(encode(m)) == m` holds for
//! every supported variant.

mod messages;
mod registry;
mod wire;

pub use messages::{
    ClientMessage, ClientOpcode, EntityTransform, LobbyEvent, LobbyOpcode, LobbyRequest,
    ServerMessage, ServerOpcode, Vec2,
};
pub(crate) use messages::read_transforms;
pub use registry::HandlerRegistry;
pub use wire::{DecodeError, PacketReader, PacketWriter, MAX_STRING_LEN};
