//! # Command Queue
//!
//! Hand-off from the client network thread to the game loop.
//!
//! The network thread never touches game state directly. It pushes
//! [`Command`]s onto an unbounded channel and the game loop drains them on
//! its own thread, one command per frame, so a burst of packets never
//! stalls a single frame.
//!
//! [`ClientDispatcher`] turns drained packet commands into calls on the
//! game's [`ClientApp`] implementation through a fixed opcode registry.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};

use crate::protocol::{
    read_transforms, DecodeError, EntityTransform, HandlerRegistry, LobbyEvent, PacketReader,
    ServerOpcode,
};
use crate::transport::DisconnectReason;
use crate::PeerId;

/// Scene the game should present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    /// Main menu.
    Menu,
    /// Pre-game lobby.
    Lobby,
    /// Active match.
    Game,
    /// Server browser, shown after a disconnect.
    ServerBrowser,
}

/// Work item queued by the network thread for the game loop.
#[derive(Clone, Debug)]
pub enum Command {
    /// A decoded-later server payload (opcode byte first).
    Packet(Vec<u8>),
    /// Show a popup message to the player.
    Popup(String),
    /// Switch to another scene.
    ChangeScene(Scene),
    /// The connection ended; the reason says how.
    Disconnected(DisconnectReason),
}

/// Producer half of the command channel, held by the network thread.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    /// Queues a command for the game loop. A disconnected queue is not an
    /// error: the game is shutting down and the command is moot.
    pub fn push(&self, command: Command) {
        if self.sender.send(command).is_err() {
            tracing::debug!("command queue receiver dropped");
        }
    }
}

/// Consumer half of the command channel, drained by the game loop.
pub struct CommandQueue {
    receiver: Receiver<Command>,
}

impl CommandQueue {
    /// Takes the next queued command, if any. Never blocks.
    ///
    /// Call once per frame: processing a single command per tick bounds
    /// the per-frame cost no matter how fast packets arrive.
    #[must_use]
    pub fn dequeue_one(&self) -> Option<Command> {
        self.receiver.try_recv().ok()
    }

    /// Number of commands waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Creates a connected sender/queue pair.
#[must_use]
pub fn command_channel() -> (CommandSender, CommandQueue) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (CommandSender { sender }, CommandQueue { receiver })
}

/// Game-side callbacks invoked by the dispatcher on the game loop thread.
///
/// Implemented by whatever owns the presentation layer. Every method has a
/// default no-op body so a game only implements what it reacts to.
#[allow(unused_variables)]
pub trait ClientApp {
    /// The lobby accepted us: our id and the players already present.
    fn lobby_info(&mut self, id: PeerId, players: BTreeMap<PeerId, String>) {}
    /// Another player joined the lobby.
    fn lobby_player_joined(&mut self, id: PeerId, username: String) {}
    /// A player left the lobby.
    fn lobby_player_left(&mut self, id: PeerId) {}
    /// A player changed their ready flag.
    fn lobby_ready_changed(&mut self, id: PeerId, ready: bool) {}
    /// A chat line arrived.
    fn lobby_chat(&mut self, id: PeerId, message: String) {}
    /// The countdown started or was cancelled.
    fn countdown_changed(&mut self, running: bool) {}
    /// The match began.
    fn game_started(&mut self) {}
    /// Fresh authoritative transforms for all players.
    fn player_transforms(&mut self, transforms: BTreeMap<PeerId, EntityTransform>) {}
    /// Show a popup.
    fn popup(&mut self, message: String) {}
    /// Switch scenes.
    fn change_scene(&mut self, scene: Scene) {}
    /// The connection ended.
    fn disconnected(&mut self, reason: DisconnectReason) {}
}

/// Handler invoked for one server opcode, reading the remaining payload.
type ClientHandler =
    Box<dyn Fn(&mut dyn ClientApp, &mut PacketReader<'_>) -> Result<(), DecodeError> + Send>;

/// Routes drained commands into [`ClientApp`] callbacks.
pub struct ClientDispatcher {
    registry: HandlerRegistry<ServerOpcode, ClientHandler>,
}

impl ClientDispatcher {
    /// Builds the dispatcher with every server opcode registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry: HandlerRegistry<ServerOpcode, ClientHandler> = HandlerRegistry::new();
        registry.register(ServerOpcode::Lobby, Box::new(handle_lobby_event) as ClientHandler);
        registry.register(
            ServerOpcode::PlayerTransforms,
            Box::new(handle_player_transforms) as ClientHandler,
        );
        Self { registry }
    }

    /// Drains at most one command from the queue into the app.
    ///
    /// Returns true if a command was processed.
    pub fn pump(&self, queue: &CommandQueue, app: &mut dyn ClientApp) -> bool {
        let Some(command) = queue.dequeue_one() else {
            return false;
        };
        self.apply(command, app);
        true
    }

    /// Applies a single command to the app.
    pub fn apply(&self, command: Command, app: &mut dyn ClientApp) {
        match command {
            Command::Packet(bytes) => self.dispatch_packet(&bytes, app),
            Command::Popup(message) => app.popup(message),
            Command::ChangeScene(scene) => app.change_scene(scene),
            Command::Disconnected(reason) => {
                app.disconnected(reason);
                app.change_scene(Scene::ServerBrowser);
            }
        }
    }

    fn dispatch_packet(&self, bytes: &[u8], app: &mut dyn ClientApp) {
        let mut reader = PacketReader::new(bytes);
        let byte = match reader.read_u8() {
            Ok(byte) => byte,
            Err(_) => {
                tracing::warn!("empty packet from server (ignoring)");
                return;
            }
        };
        let Some(opcode) = ServerOpcode::from_u8(byte) else {
            tracing::warn!("unknown server opcode {byte} (ignoring packet)");
            return;
        };
        let Some(handler) = self.registry.get(opcode) else {
            tracing::warn!("no handler for server opcode {opcode:?} (ignoring packet)");
            return;
        };
        if let Err(e) = handler(app, &mut reader) {
            tracing::warn!("malformed {opcode:?} packet: {e} (ignoring)");
        }
    }
}

impl Default for ClientDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_lobby_event(
    app: &mut dyn ClientApp,
    reader: &mut PacketReader<'_>,
) -> Result<(), DecodeError> {
    match LobbyEvent::decode(reader)? {
        LobbyEvent::Info { id, players } => {
            app.lobby_info(id, players);
            app.change_scene(Scene::Lobby);
        }
        LobbyEvent::Join { id, username } => app.lobby_player_joined(id, username),
        LobbyEvent::Leave { id } => app.lobby_player_left(id),
        LobbyEvent::Ready { id, ready } => app.lobby_ready_changed(id, ready),
        LobbyEvent::ChatMessage { id, message } => app.lobby_chat(id, message),
        LobbyEvent::CountdownChange { running } => app.countdown_changed(running),
        LobbyEvent::GameStart => {
            app.game_started();
            app.change_scene(Scene::Game);
        }
    }
    Ok(())
}

fn handle_player_transforms(
    app: &mut dyn ClientApp,
    reader: &mut PacketReader<'_>,
) -> Result<(), DecodeError> {
    let transforms = read_transforms(reader)?;
    app.player_transforms(transforms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    #[derive(Default)]
    struct RecordingApp {
        calls: Vec<String>,
    }

    impl ClientApp for RecordingApp {
        fn lobby_info(&mut self, id: PeerId, players: BTreeMap<PeerId, String>) {
            self.calls.push(format!("info:{id}:{}", players.len()));
        }
        fn lobby_player_joined(&mut self, id: PeerId, username: String) {
            self.calls.push(format!("join:{id}:{username}"));
        }
        fn game_started(&mut self) {
            self.calls.push("game_started".into());
        }
        fn popup(&mut self, message: String) {
            self.calls.push(format!("popup:{message}"));
        }
        fn change_scene(&mut self, scene: Scene) {
            self.calls.push(format!("scene:{scene:?}"));
        }
        fn disconnected(&mut self, reason: DisconnectReason) {
            self.calls.push(format!("disconnected:{reason:?}"));
        }
        fn player_transforms(&mut self, transforms: BTreeMap<PeerId, EntityTransform>) {
            self.calls.push(format!("transforms:{}", transforms.len()));
        }
    }

    #[test]
    fn one_command_per_pump() {
        let (sender, queue) = command_channel();
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        sender.push(Command::Popup("a".into()));
        sender.push(Command::Popup("b".into()));

        assert!(dispatcher.pump(&queue, &mut app));
        assert_eq!(queue.len(), 1);
        assert!(dispatcher.pump(&queue, &mut app));
        assert!(!dispatcher.pump(&queue, &mut app));
    }

    #[test]
    fn commands_dequeue_in_enqueue_order() {
        let (sender, queue) = command_channel();
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        sender.push(Command::Popup("first".into()));
        sender.push(Command::ChangeScene(Scene::Menu));
        sender.push(Command::Popup("second".into()));

        while dispatcher.pump(&queue, &mut app) {}
        assert_eq!(
            app.calls,
            vec!["popup:first", "scene:Menu", "popup:second"]
        );
    }

    #[test]
    fn lobby_info_switches_to_the_lobby_scene() {
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        let mut players = BTreeMap::new();
        players.insert(PeerId(1), "alice".to_owned());
        let bytes = ServerMessage::Lobby(LobbyEvent::Info {
            id: PeerId(2),
            players,
        })
        .encode();

        dispatcher.apply(Command::Packet(bytes), &mut app);
        assert_eq!(app.calls, vec!["info:2:1", "scene:Lobby"]);
    }

    #[test]
    fn game_start_switches_to_the_game_scene() {
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        let bytes = ServerMessage::Lobby(LobbyEvent::GameStart).encode();
        dispatcher.apply(Command::Packet(bytes), &mut app);
        assert_eq!(app.calls, vec!["game_started", "scene:Game"]);
    }

    #[test]
    fn disconnect_lands_in_the_server_browser() {
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        dispatcher.apply(Command::Disconnected(DisconnectReason::Kicked), &mut app);
        assert_eq!(
            app.calls,
            vec!["disconnected:Kicked", "scene:ServerBrowser"]
        );
    }

    #[test]
    fn unknown_opcode_is_ignored_without_callbacks() {
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        dispatcher.apply(Command::Packet(vec![240, 1, 2]), &mut app);
        assert!(app.calls.is_empty());
    }

    #[test]
    fn transforms_reach_the_app() {
        let dispatcher = ClientDispatcher::new();
        let mut app = RecordingApp::default();

        let mut transforms = BTreeMap::new();
        transforms.insert(PeerId(1), EntityTransform::default());
        transforms.insert(PeerId(2), EntityTransform::default());
        let bytes = ServerMessage::PlayerTransforms { transforms }.encode();

        dispatcher.apply(Command::Packet(bytes), &mut app);
        assert_eq!(app.calls, vec!["transforms:2"]);
    }
}
