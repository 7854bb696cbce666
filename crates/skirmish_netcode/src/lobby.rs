//! # Lobby
//!
//! Server-side lobby state machine and the packet handlers that drive it.
//!
//! ## Flow
//!
//! ```text
//! join ──▶ info (to joiner) + join (to others)
//! ready / chat / countdown ──▶ broadcast to everyone
//! game start ──▶ broadcast, transforms seeded, emit loop begins
//! ```
//!
//! Handlers run on the server worker thread with exclusive access to the
//! peer table and lobby state, so there is no locking here.

use std::collections::BTreeMap;

use crate::protocol::{
    ClientOpcode, EntityTransform, HandlerRegistry, LobbyEvent, LobbyRequest, ServerMessage, Vec2,
};
use crate::server::{ServerContext, ServerHandler};
use crate::transport::DeliveryMode;
use crate::PeerId;

/// Mutable lobby and match state, owned by the server worker.
#[derive(Debug, Default)]
pub struct LobbyState {
    /// True while the pre-game countdown runs.
    pub countdown_running: bool,
    /// True once the match has started; gates position intake and the
    /// transform broadcast.
    pub game_started: bool,
    /// Authoritative transform per in-game player.
    pub transforms: BTreeMap<PeerId, EntityTransform>,
}

impl LobbyState {
    /// Creates an empty lobby.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns to the pre-join state, dropping all match progress.
    pub fn reset(&mut self) {
        self.countdown_running = false;
        self.game_started = false;
        self.transforms.clear();
    }
}

/// Builds the server's opcode dispatch table.
pub(crate) fn server_registry() -> HandlerRegistry<ClientOpcode, ServerHandler> {
    let mut registry = HandlerRegistry::new();
    registry.register(ClientOpcode::Lobby, Box::new(handle_lobby) as ServerHandler);
    registry.register(
        ClientOpcode::PlayerPosition,
        Box::new(handle_player_position) as ServerHandler,
    );
    registry
}

fn handle_lobby(
    ctx: &mut ServerContext<'_>,
    sender: PeerId,
    reader: &mut crate::protocol::PacketReader<'_>,
) -> Result<(), crate::protocol::DecodeError> {
    let request = LobbyRequest::decode(reader)?;
    match request {
        LobbyRequest::Join { username } => handle_join(ctx, sender, username),
        LobbyRequest::Leave => handle_leave(ctx, sender),
        LobbyRequest::Ready { ready } => {
            if let Some(peer) = ctx.peers.get_mut(sender) {
                peer.ready = ready;
            }
            ctx.broadcast(
                &ServerMessage::Lobby(LobbyEvent::Ready { id: sender, ready }),
                DeliveryMode::Reliable,
            );
        }
        LobbyRequest::ChatMessage { message } => {
            // Relayed to everyone, the sender included, so every client
            // renders the line through the same path.
            ctx.broadcast(
                &ServerMessage::Lobby(LobbyEvent::ChatMessage {
                    id: sender,
                    message,
                }),
                DeliveryMode::Reliable,
            );
        }
        LobbyRequest::CountdownChange { running } => {
            ctx.lobby.countdown_running = running;
            // Everyone gets this, the requester included, so all clients
            // agree on the countdown state the server settled on.
            ctx.broadcast(
                &ServerMessage::Lobby(LobbyEvent::CountdownChange { running }),
                DeliveryMode::Reliable,
            );
        }
        LobbyRequest::GameStart => handle_game_start(ctx, sender),
    }
    Ok(())
}

fn handle_join(ctx: &mut ServerContext<'_>, sender: PeerId, username: String) {
    // Snapshot the roster before naming the joiner, so the Info packet
    // lists only the *other* players.
    let players = ctx.peers.joined_usernames();

    let Some(peer) = ctx.peers.get_mut(sender) else {
        tracing::warn!("lobby join from unregistered peer {sender} (ignoring)");
        return;
    };
    if peer.username.is_some() {
        tracing::warn!("peer {sender} sent a second lobby join (ignoring)");
        return;
    }
    peer.username = Some(username.clone());
    tracing::info!("{username} joined the lobby as peer {sender}");

    ctx.send(
        sender,
        &ServerMessage::Lobby(LobbyEvent::Info {
            id: sender,
            players,
        }),
        DeliveryMode::Reliable,
    );
    ctx.broadcast_except(
        sender,
        &ServerMessage::Lobby(LobbyEvent::Join {
            id: sender,
            username,
        }),
        DeliveryMode::Reliable,
    );
}

fn handle_leave(ctx: &mut ServerContext<'_>, sender: PeerId) {
    let Some(peer) = ctx.peers.get_mut(sender) else {
        return;
    };
    let username = peer.username.take();
    peer.ready = false;
    ctx.lobby.transforms.remove(&sender);

    if let Some(username) = username {
        tracing::info!("{username} left the lobby (peer {sender})");
        ctx.notify_leave(sender);
        ctx.broadcast_except(
            sender,
            &ServerMessage::Lobby(LobbyEvent::Leave { id: sender }),
            DeliveryMode::Reliable,
        );
    }
}

fn handle_game_start(ctx: &mut ServerContext<'_>, sender: PeerId) {
    if ctx.lobby.game_started {
        tracing::debug!("peer {sender} requested game start but the game is running");
        return;
    }
    ctx.lobby.game_started = true;
    ctx.lobby.countdown_running = false;

    // Seed every joined player at the origin so the first transform
    // broadcast covers the full roster.
    let joined: Vec<PeerId> = ctx.peers.joined_usernames().keys().copied().collect();
    for id in joined {
        ctx.lobby.transforms.insert(id, EntityTransform::default());
    }

    tracing::info!("game started ({} players)", ctx.lobby.transforms.len());
    ctx.broadcast(
        &ServerMessage::Lobby(LobbyEvent::GameStart),
        DeliveryMode::Reliable,
    );
}

fn handle_player_position(
    ctx: &mut ServerContext<'_>,
    sender: PeerId,
    reader: &mut crate::protocol::PacketReader<'_>,
) -> Result<(), crate::protocol::DecodeError> {
    let position = reader.read_vec2()?;
    if !ctx.lobby.game_started {
        tracing::debug!("position from peer {sender} before game start (ignoring)");
        return Ok(());
    }
    let Some(transform) = ctx.lobby.transforms.get_mut(&sender) else {
        tracing::debug!("position from peer {sender} outside the match (ignoring)");
        return Ok(());
    };
    apply_position(transform, position);
    Ok(())
}

/// Applies a reported position, facing the direction of travel and holding
/// the old facing when stationary.
fn apply_position(transform: &mut EntityTransform, position: Vec2) {
    let dx = position.x - transform.position.x;
    let dy = position.y - transform.position.y;
    if dx != 0.0 || dy != 0.0 {
        transform.rotation = dy.atan2(dx);
    }
    transform.position = position;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_all_match_state() {
        let mut lobby = LobbyState::new();
        lobby.countdown_running = true;
        lobby.game_started = true;
        lobby.transforms.insert(PeerId(1), EntityTransform::default());

        lobby.reset();
        assert!(!lobby.countdown_running);
        assert!(!lobby.game_started);
        assert!(lobby.transforms.is_empty());
    }

    #[test]
    fn registry_covers_every_client_opcode() {
        let registry = server_registry();
        assert!(registry.get(ClientOpcode::Lobby).is_some());
        assert!(registry.get(ClientOpcode::PlayerPosition).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn facing_follows_movement_and_holds_when_still() {
        let mut transform = EntityTransform::default();

        apply_position(&mut transform, Vec2::new(1.0, 0.0));
        assert!((transform.rotation - 0.0).abs() < f32::EPSILON);

        apply_position(&mut transform, Vec2::new(1.0, 2.0));
        assert!((transform.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-6);

        // No movement: rotation unchanged.
        apply_position(&mut transform, Vec2::new(1.0, 2.0));
        assert!((transform.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
