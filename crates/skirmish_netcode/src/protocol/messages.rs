//! # Message Definitions
//!
//! Typed messages for both wire directions, with their opcode enumerations
//! and encode/decode routines.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ opcode u8│ payload (variant-specific)                   │
//! ├──────────┼──────────────────────────────────────────────┤
//! │ Lobby    │ sub-opcode u8 │ variant fields               │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Client→server and server→client opcodes are disjoint enumerations;
//! adding a message kind means adding an enum value and a registry entry.
//!
//! Encoding is deterministic: player and transform maps are `BTreeMap`s so
//! the same logical message always serializes to the same bytes.

use std::collections::BTreeMap;

use super::wire::{DecodeError, PacketReader, PacketWriter};
use crate::PeerId;

/// 2-D vector with f32 components, the wire representation of a position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    /// Horizontal component.
    pub x: f32,
    /// Vertical component.
    pub y: f32,
}

impl Vec2 {
    /// Creates a new vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0);
}

/// Position and rotation of one synchronized entity at an authoritative
/// tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EntityTransform {
    /// World position.
    pub position: Vec2,
    /// Facing angle in radians.
    pub rotation: f32,
}

/// Opcodes for client→server messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    /// Lobby request carrying a [`LobbyRequest`] sub-message.
    Lobby = 0,
    /// Unreliable position report for the local player.
    PlayerPosition = 1,
}

impl ClientOpcode {
    /// Decodes an opcode byte, or `None` if outside the enumeration.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lobby),
            1 => Some(Self::PlayerPosition),
            _ => None,
        }
    }
}

/// Opcodes for server→client messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOpcode {
    /// Lobby event carrying a [`LobbyEvent`] sub-message.
    Lobby = 0,
    /// Unreliable authoritative transform broadcast.
    PlayerTransforms = 1,
}

impl ServerOpcode {
    /// Decodes an opcode byte, or `None` if outside the enumeration.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lobby),
            1 => Some(Self::PlayerTransforms),
            _ => None,
        }
    }
}

/// Sub-opcodes shared by the lobby message family in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LobbyOpcode {
    /// A player joined (or asks to join).
    Join = 0,
    /// A player left (or asks to leave).
    Leave = 1,
    /// Ready flag change.
    Ready = 2,
    /// Chat line relay.
    ChatMessage = 3,
    /// Pre-game countdown started or cancelled.
    CountdownChange = 4,
    /// Transition out of the lobby into gameplay.
    GameStart = 5,
    /// Server→client only: the joiner's assigned id and the other players.
    Info = 6,
}

impl LobbyOpcode {
    /// Decodes a sub-opcode byte, or `None` if outside the enumeration.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Join),
            1 => Some(Self::Leave),
            2 => Some(Self::Ready),
            3 => Some(Self::ChatMessage),
            4 => Some(Self::CountdownChange),
            5 => Some(Self::GameStart),
            6 => Some(Self::Info),
            _ => None,
        }
    }
}

/// Lobby sub-message sent by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum LobbyRequest {
    /// Ask to join the lobby under a username.
    Join {
        /// Display name chosen by the player.
        username: String,
    },
    /// Leave the lobby explicitly.
    Leave,
    /// Toggle the ready flag.
    Ready {
        /// New ready state.
        ready: bool,
    },
    /// Send a chat line to everyone.
    ChatMessage {
        /// Chat text.
        message: String,
    },
    /// Start or cancel the pre-game countdown.
    CountdownChange {
        /// True to start, false to cancel.
        running: bool,
    },
    /// Begin the game for every lobby member.
    GameStart,
}

impl LobbyRequest {
    /// Sub-opcode for this variant.
    #[must_use]
    pub const fn opcode(&self) -> LobbyOpcode {
        match self {
            Self::Join { .. } => LobbyOpcode::Join,
            Self::Leave => LobbyOpcode::Leave,
            Self::Ready { .. } => LobbyOpcode::Ready,
            Self::ChatMessage { .. } => LobbyOpcode::ChatMessage,
            Self::CountdownChange { .. } => LobbyOpcode::CountdownChange,
            Self::GameStart => LobbyOpcode::GameStart,
        }
    }

    /// Writes the sub-opcode byte and variant fields.
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.opcode() as u8);
        match self {
            Self::Join { username } => writer.write_str(username),
            Self::Leave | Self::GameStart => {}
            Self::Ready { ready } => writer.write_bool(*ready),
            Self::ChatMessage { message } => writer.write_str(message),
            Self::CountdownChange { running } => writer.write_bool(*running),
        }
    }

    /// Reads a sub-message from a reader positioned at the sub-opcode byte.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let byte = reader.read_u8()?;
        let opcode = LobbyOpcode::from_u8(byte).ok_or(DecodeError::UnknownLobbyOpcode(byte))?;
        Ok(match opcode {
            LobbyOpcode::Join => Self::Join {
                username: reader.read_str()?,
            },
            LobbyOpcode::Leave => Self::Leave,
            LobbyOpcode::Ready => Self::Ready {
                ready: reader.read_bool()?,
            },
            LobbyOpcode::ChatMessage => Self::ChatMessage {
                message: reader.read_str()?,
            },
            LobbyOpcode::CountdownChange => Self::CountdownChange {
                running: reader.read_bool()?,
            },
            LobbyOpcode::GameStart => Self::GameStart,
            // Info only ever travels server→client.
            LobbyOpcode::Info => return Err(DecodeError::UnknownLobbyOpcode(byte)),
        })
    }
}

/// Lobby sub-message broadcast by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum LobbyEvent {
    /// A new player joined the lobby.
    Join {
        /// Id assigned to the joiner.
        id: PeerId,
        /// Their username.
        username: String,
    },
    /// A player left the lobby.
    Leave {
        /// Id of the departing player.
        id: PeerId,
    },
    /// A player changed their ready flag.
    Ready {
        /// Id of the player.
        id: PeerId,
        /// New ready state.
        ready: bool,
    },
    /// A chat line, tagged with its sender.
    ChatMessage {
        /// Sender id.
        id: PeerId,
        /// Chat text.
        message: String,
    },
    /// The pre-game countdown started or was cancelled.
    CountdownChange {
        /// True when the countdown is running.
        running: bool,
    },
    /// Every client transitions out of the lobby into gameplay.
    GameStart,
    /// Sent to a joiner only: their id and everyone already present.
    Info {
        /// Id assigned to the receiving player.
        id: PeerId,
        /// Other players currently in the lobby, by id.
        players: BTreeMap<PeerId, String>,
    },
}

impl LobbyEvent {
    /// Sub-opcode for this variant.
    #[must_use]
    pub const fn opcode(&self) -> LobbyOpcode {
        match self {
            Self::Join { .. } => LobbyOpcode::Join,
            Self::Leave { .. } => LobbyOpcode::Leave,
            Self::Ready { .. } => LobbyOpcode::Ready,
            Self::ChatMessage { .. } => LobbyOpcode::ChatMessage,
            Self::CountdownChange { .. } => LobbyOpcode::CountdownChange,
            Self::GameStart => LobbyOpcode::GameStart,
            Self::Info { .. } => LobbyOpcode::Info,
        }
    }

    /// Writes the sub-opcode byte and variant fields.
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.opcode() as u8);
        match self {
            Self::Join { id, username } => {
                writer.write_peer_id(*id);
                writer.write_str(username);
            }
            Self::Leave { id } => writer.write_peer_id(*id),
            Self::Ready { id, ready } => {
                writer.write_peer_id(*id);
                writer.write_bool(*ready);
            }
            Self::ChatMessage { id, message } => {
                writer.write_peer_id(*id);
                writer.write_str(message);
            }
            Self::CountdownChange { running } => writer.write_bool(*running),
            Self::GameStart => {}
            Self::Info { id, players } => {
                writer.write_peer_id(*id);
                // BTreeMap iteration is ordered, so the encoding is stable.
                writer.write_u16(players.len() as u16);
                for (player_id, username) in players {
                    writer.write_peer_id(*player_id);
                    writer.write_str(username);
                }
            }
        }
    }

    /// Reads a sub-message from a reader positioned at the sub-opcode byte.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let byte = reader.read_u8()?;
        let opcode = LobbyOpcode::from_u8(byte).ok_or(DecodeError::UnknownLobbyOpcode(byte))?;
        Ok(match opcode {
            LobbyOpcode::Join => Self::Join {
                id: reader.read_peer_id()?,
                username: reader.read_str()?,
            },
            LobbyOpcode::Leave => Self::Leave {
                id: reader.read_peer_id()?,
            },
            LobbyOpcode::Ready => Self::Ready {
                id: reader.read_peer_id()?,
                ready: reader.read_bool()?,
            },
            LobbyOpcode::ChatMessage => Self::ChatMessage {
                id: reader.read_peer_id()?,
                message: reader.read_str()?,
            },
            LobbyOpcode::CountdownChange => Self::CountdownChange {
                running: reader.read_bool()?,
            },
            LobbyOpcode::GameStart => Self::GameStart,
            LobbyOpcode::Info => {
                let id = reader.read_peer_id()?;
                let count = reader.read_u16()?;
                let mut players = BTreeMap::new();
                for _ in 0..count {
                    let player_id = reader.read_peer_id()?;
                    let username = reader.read_str()?;
                    players.insert(player_id, username);
                }
                Self::Info { id, players }
            }
        })
    }
}

/// A complete client→server message.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Lobby request family.
    Lobby(LobbyRequest),
    /// Position report for the local player, sent unreliable.
    PlayerPosition {
        /// Current world position.
        position: Vec2,
    },
}

impl ClientMessage {
    /// Top-level opcode for this message.
    #[must_use]
    pub const fn opcode(&self) -> ClientOpcode {
        match self {
            Self::Lobby(_) => ClientOpcode::Lobby,
            Self::PlayerPosition { .. } => ClientOpcode::PlayerPosition,
        }
    }

    /// Serializes the message, opcode byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(self.opcode() as u8);
        match self {
            Self::Lobby(request) => request.encode(&mut writer),
            Self::PlayerPosition { position } => writer.write_vec2(*position),
        }
        writer.into_bytes()
    }

    /// Deserializes a message from raw payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = PacketReader::new(bytes);
        let byte = reader.read_u8()?;
        let opcode = ClientOpcode::from_u8(byte).ok_or(DecodeError::UnknownOpcode(byte))?;
        match opcode {
            ClientOpcode::Lobby => Ok(Self::Lobby(LobbyRequest::decode(&mut reader)?)),
            ClientOpcode::PlayerPosition => Ok(Self::PlayerPosition {
                position: reader.read_vec2()?,
            }),
        }
    }
}

/// A complete server→client message.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Lobby event family.
    Lobby(LobbyEvent),
    /// Authoritative transforms for all synchronized players.
    PlayerTransforms {
        /// Transform per entity id, captured at one tick.
        transforms: BTreeMap<PeerId, EntityTransform>,
    },
}

impl ServerMessage {
    /// Top-level opcode for this message.
    #[must_use]
    pub const fn opcode(&self) -> ServerOpcode {
        match self {
            Self::Lobby(_) => ServerOpcode::Lobby,
            Self::PlayerTransforms { .. } => ServerOpcode::PlayerTransforms,
        }
    }

    /// Serializes the message, opcode byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(self.opcode() as u8);
        match self {
            Self::Lobby(event) => event.encode(&mut writer),
            Self::PlayerTransforms { transforms } => {
                writer.write_u16(transforms.len() as u16);
                for (id, transform) in transforms {
                    writer.write_peer_id(*id);
                    writer.write_vec2(transform.position);
                    writer.write_f32(transform.rotation);
                }
            }
        }
        writer.into_bytes()
    }

    /// Deserializes a message from raw payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = PacketReader::new(bytes);
        let byte = reader.read_u8()?;
        let opcode = ServerOpcode::from_u8(byte).ok_or(DecodeError::UnknownOpcode(byte))?;
        match opcode {
            ServerOpcode::Lobby => Ok(Self::Lobby(LobbyEvent::decode(&mut reader)?)),
            ServerOpcode::PlayerTransforms => Ok(Self::PlayerTransforms {
                transforms: read_transforms(&mut reader)?,
            }),
        }
    }
}

/// Reads a transform map, used both by [`ServerMessage::decode`] and the
/// client-side transform handler.
pub(crate) fn read_transforms(
    reader: &mut PacketReader<'_>,
) -> Result<BTreeMap<PeerId, EntityTransform>, DecodeError> {
    let count = reader.read_u16()?;
    let mut transforms = BTreeMap::new();
    for _ in 0..count {
        let id = reader.read_peer_id()?;
        let position = reader.read_vec2()?;
        let rotation = reader.read_f32()?;
        transforms.insert(
            id,
            EntityTransform { position, rotation },
        );
    }
    Ok(transforms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_variants() -> Vec<ClientMessage> {
        vec![
            ClientMessage::Lobby(LobbyRequest::Join {
                username: "alice".into(),
            }),
            ClientMessage::Lobby(LobbyRequest::Leave),
            ClientMessage::Lobby(LobbyRequest::Ready { ready: true }),
            ClientMessage::Lobby(LobbyRequest::ChatMessage {
                message: "gl hf".into(),
            }),
            ClientMessage::Lobby(LobbyRequest::CountdownChange { running: false }),
            ClientMessage::Lobby(LobbyRequest::GameStart),
            ClientMessage::PlayerPosition {
                position: Vec2::new(12.5, -8.25),
            },
        ]
    }

    fn server_variants() -> Vec<ServerMessage> {
        let mut players = BTreeMap::new();
        players.insert(PeerId(1), "alice".to_owned());
        players.insert(PeerId(3), "carol".to_owned());

        let mut transforms = BTreeMap::new();
        transforms.insert(
            PeerId(1),
            EntityTransform {
                position: Vec2::new(4.0, 5.0),
                rotation: 1.5,
            },
        );
        transforms.insert(
            PeerId(2),
            EntityTransform {
                position: Vec2::new(-1.0, 0.5),
                rotation: -0.25,
            },
        );

        vec![
            ServerMessage::Lobby(LobbyEvent::Join {
                id: PeerId(2),
                username: "bob".into(),
            }),
            ServerMessage::Lobby(LobbyEvent::Leave { id: PeerId(2) }),
            ServerMessage::Lobby(LobbyEvent::Ready {
                id: PeerId(1),
                ready: true,
            }),
            ServerMessage::Lobby(LobbyEvent::ChatMessage {
                id: PeerId(3),
                message: "ready when you are".into(),
            }),
            ServerMessage::Lobby(LobbyEvent::CountdownChange { running: true }),
            ServerMessage::Lobby(LobbyEvent::GameStart),
            ServerMessage::Lobby(LobbyEvent::Info {
                id: PeerId(2),
                players,
            }),
            ServerMessage::PlayerTransforms { transforms },
        ]
    }

    #[test]
    fn every_client_variant_round_trips() {
        for message in client_variants() {
            let bytes = message.encode();
            let decoded = ClientMessage::decode(&bytes).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn every_server_variant_round_trips() {
        for message in server_variants() {
            let bytes = message.encode();
            let decoded = ServerMessage::decode(&bytes).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        for message in server_variants() {
            assert_eq!(message.encode(), message.encode());
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert_eq!(
            ClientMessage::decode(&[200]),
            Err(DecodeError::UnknownOpcode(200))
        );
        assert_eq!(
            ServerMessage::decode(&[200]),
            Err(DecodeError::UnknownOpcode(200))
        );
    }

    #[test]
    fn info_never_decodes_as_a_client_request() {
        // Sub-opcode 6 (Info) is server→client only.
        let bytes = [ClientOpcode::Lobby as u8, LobbyOpcode::Info as u8];
        assert_eq!(
            ClientMessage::decode(&bytes),
            Err(DecodeError::UnknownLobbyOpcode(LobbyOpcode::Info as u8))
        );
    }

    #[test]
    fn truncated_lobby_join_is_rejected() {
        let message = ClientMessage::Lobby(LobbyRequest::Join {
            username: "alice".into(),
        });
        let bytes = message.encode();
        for len in 0..bytes.len() {
            assert_eq!(
                ClientMessage::decode(&bytes[..len]),
                Err(DecodeError::Truncated),
                "prefix of {len} bytes should be truncated"
            );
        }
    }
}
