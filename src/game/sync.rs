//! Game state synchronization: server fan-out and client-side view

use tracing::debug;

use crate::ws::peers::PeerDirectory;
use crate::ws::protocol::{GameStartData, Message, RoomInfo, ShotAimData, TurnChangeData};

use super::state::{CueState, GameState};
use super::turn::{PlayerRemoval, ShotReport};

/// Messages announcing an accepted shot, in delivery order
pub fn shot_messages(state: &GameState, report: &ShotReport) -> Vec<Message> {
    let mut msgs = vec![
        Message::from_server(report.result.clone()),
        Message::from_server(state.clone()),
    ];
    if let Some(change) = &report.turn_change {
        msgs.push(Message::from_server(change.clone()));
    }
    if let Some(over) = &report.game_over {
        msgs.push(Message::from_server(over.clone()));
    }
    msgs
}

/// Messages announcing that a player left a running game
pub fn removal_messages(state: &GameState, removal: &PlayerRemoval) -> Vec<Message> {
    if removal.turn_change.is_none() && removal.game_over.is_none() {
        return Vec::new();
    }
    let mut msgs = vec![Message::from_server(state.clone())];
    if let Some(change) = &removal.turn_change {
        msgs.push(Message::from_server(change.clone()));
    }
    if let Some(over) = &removal.game_over {
        msgs.push(Message::from_server(over.clone()));
    }
    msgs
}

/// Pushes authoritative snapshots to every member of a room.
///
/// Callers hold the room lock while publishing so all members observe the
/// same order.
pub struct GameStateSynchronizer<'a> {
    peers: &'a PeerDirectory,
}

impl<'a> GameStateSynchronizer<'a> {
    pub fn new(peers: &'a PeerDirectory) -> Self {
        Self { peers }
    }

    fn publish_all(&self, room: &RoomInfo, msgs: &[Message]) {
        let recipients = room.players.iter().map(|p| p.player_id.as_str());
        for msg in msgs {
            self.peers.broadcast(recipients.clone(), msg);
        }
    }

    pub fn publish_start(&self, room: &RoomInfo, state: &GameState) {
        debug!(room_id = %room.room_id, players = room.players.len(), "Publishing game start");
        let start = Message::from_server(GameStartData {
            room: Some(room.clone()),
            game_state: Some(state.clone()),
        });
        self.publish_all(room, &[start, Message::from_server(state.clone())]);
    }

    pub fn publish_shot(&self, room: &RoomInfo, state: &GameState, report: &ShotReport) {
        self.publish_all(room, &shot_messages(state, report));
    }

    pub fn publish_removal(&self, room: &RoomInfo, state: &GameState, removal: &PlayerRemoval) {
        self.publish_all(room, &removal_messages(state, removal));
    }

    pub fn publish_turn_change(&self, room: &RoomInfo, state: &GameState, change: &TurnChangeData) {
        self.publish_all(
            room,
            &[
                Message::from_server(state.clone()),
                Message::from_server(change.clone()),
            ],
        );
    }

    /// Aim previews go to everyone except the shooter
    pub fn relay_aim(&self, room: &RoomInfo, shooter_id: &str, cue: &CueState) {
        let msg = Message::new(
            shooter_id,
            ShotAimData {
                cue_state: cue.clone(),
            },
        );
        self.peers.broadcast_except(
            room.players.iter().map(|p| p.player_id.as_str()),
            shooter_id,
            &msg,
        );
    }

    /// Full snapshot for one player (e.g. after a resume)
    pub fn send_snapshot(&self, player_id: &str, state: &GameState) {
        self.peers.send(player_id, Message::from_server(state.clone()));
    }
}

/// Client-side picture of the table: the last authoritative snapshot plus
/// a local aim preview that the next snapshot discards
#[derive(Debug, Clone, Default)]
pub struct GameView {
    snapshot: Option<GameState>,
    preview: Option<CueState>,
}

impl GameView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authoritative state always wins over local speculation
    pub fn apply_snapshot(&mut self, state: GameState) {
        self.snapshot = Some(state);
        self.preview = None;
    }

    pub fn set_preview(&mut self, cue: CueState) {
        self.preview = Some(cue);
    }

    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    pub fn snapshot(&self) -> Option<&GameState> {
        self.snapshot.as_ref()
    }

    pub fn preview(&self) -> Option<&CueState> {
        self.preview.as_ref()
    }

    pub fn is_turn_of(&self, player_id: &str) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| !s.is_game_over && s.current_player_id == player_id)
    }

    pub fn reset(&mut self) {
        self.snapshot = None;
        self.preview = None;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::game::physics::StationarySimulator;
    use crate::game::rack::Rack;
    use crate::game::turn::TurnCoordinator;
    use crate::ws::protocol::{GameType, MessageType, PlayerInfo};

    fn cue() -> CueState {
        CueState {
            phi: 0.0,
            theta: 0.0,
            v0: 1.0,
            a: 0.0,
            b: 0.0,
            cue_ball_id: "cue".into(),
        }
    }

    fn room() -> RoomInfo {
        RoomInfo {
            room_id: "r".into(),
            room_name: "Table".into(),
            host_id: "a".into(),
            players: vec![PlayerInfo::new("a", "A"), PlayerInfo::new("b", "B")],
            max_players: 2,
            game_type: GameType::EightBall,
            is_started: true,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<MessageType> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.msg_type())
            .collect()
    }

    #[test]
    fn test_shot_fanout_order() {
        let players = vec!["a".to_string(), "b".to_string()];
        let mut state = GameState::new("r", &players, &Rack::for_game(GameType::EightBall));
        let turns = TurnCoordinator::new(players);
        let report = turns
            .execute_shot(&mut state, "a", &cue(), &StationarySimulator)
            .unwrap();

        let peers = PeerDirectory::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        peers.register("a", Uuid::new_v4(), tx_a);
        peers.register("b", Uuid::new_v4(), tx_b);

        GameStateSynchronizer::new(&peers).publish_shot(&room(), &state, &report);

        let expected = vec![
            MessageType::ShotResult,
            MessageType::GameState,
            MessageType::TurnChange,
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
    }

    #[test]
    fn test_aim_not_echoed_to_shooter() {
        let peers = PeerDirectory::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        peers.register("a", Uuid::new_v4(), tx_a);
        peers.register("b", Uuid::new_v4(), tx_b);

        GameStateSynchronizer::new(&peers).relay_aim(&room(), "a", &cue());
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![MessageType::ShotAim]);
    }

    #[test]
    fn test_snapshot_overwrites_preview() {
        let players = vec!["a".to_string(), "b".to_string()];
        let state = GameState::new("r", &players, &Rack::for_game(GameType::NineBall));

        let mut view = GameView::new();
        view.set_preview(cue());
        assert!(view.preview().is_some());

        view.apply_snapshot(state.clone());
        assert!(view.preview().is_none());
        assert_eq!(view.snapshot(), Some(&state));
        assert!(view.is_turn_of("a"));
        assert!(!view.is_turn_of("b"));
    }

    #[test]
    fn test_removal_without_effect_sends_nothing() {
        let players = vec!["a".to_string()];
        let state = GameState::new("r", &players, &Rack::for_game(GameType::NineBall));
        assert!(removal_messages(&state, &PlayerRemoval::default()).is_empty());
    }
}
