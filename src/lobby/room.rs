//! A single room: seats, readiness and the game it hosts

use std::collections::HashMap;

use thiserror::Error;

use crate::game::physics::ShotSimulator;
use crate::game::rack::Rack;
use crate::game::state::{CueState, GameState};
use crate::game::turn::{PlayerRemoval, ShotReport, TurnCoordinator, TurnError};
use crate::session::timers::RoomTimers;
use crate::ws::protocol::{ErrorCode, GameType, PlayerInfo, RoomInfo, TurnChangeData};

/// Smallest table that can start a game
pub const MIN_PLAYERS_TO_START: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Game already started")]
    GameAlreadyStarted,
    #[error("Already in this room")]
    AlreadyInRoom,
    #[error("Not in this room")]
    NotInRoom,
    #[error("Room limit reached")]
    RoomLimitReached,
    #[error("Only the host can do that")]
    NotHost,
    #[error("Not every player is ready")]
    PlayersNotReady,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomFull => ErrorCode::RoomFull,
            Self::RoomNotFound => ErrorCode::RoomNotFound,
            Self::GameAlreadyStarted => ErrorCode::GameAlreadyStarted,
            Self::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            Self::NotInRoom => ErrorCode::NotInRoom,
            Self::RoomLimitReached => ErrorCode::RoomLimitReached,
            Self::NotHost => ErrorCode::NotHost,
            Self::PlayersNotReady => ErrorCode::PlayersNotReady,
        }
    }
}

/// What happened when a player left
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub player: PlayerInfo,
    /// Set when the host seat moved
    pub new_host: Option<String>,
    /// Effect on a running game
    pub removal: PlayerRemoval,
    /// Room emptied and is gone
    pub room_closed: bool,
}

/// Room state guarded by the registry's per-room lock
#[derive(Debug)]
pub struct Room {
    info: RoomInfo,
    game: Option<GameState>,
    turns: Option<TurnCoordinator>,
    /// Resume keys of seats held for dropped players
    held: HashMap<String, String>,
    pub timers: RoomTimers,
    created_seq: u64,
    standing: bool,
    closed: bool,
}

impl Room {
    pub fn new(
        room_id: impl Into<String>,
        room_name: impl Into<String>,
        game_type: GameType,
        max_players: usize,
        created_seq: u64,
    ) -> Self {
        Self {
            info: RoomInfo {
                room_id: room_id.into(),
                room_name: room_name.into(),
                host_id: String::new(),
                players: Vec::new(),
                max_players,
                game_type,
                is_started: false,
            },
            game: None,
            turns: None,
            held: HashMap::new(),
            timers: RoomTimers::default(),
            created_seq,
            standing: false,
            closed: false,
        }
    }

    pub(crate) fn mark_standing(&mut self) {
        self.standing = true;
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.room_id
    }

    pub fn game(&self) -> Option<&GameState> {
        self.game.as_ref()
    }

    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    pub fn is_standing(&self) -> bool {
        self.standing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.info.players.is_empty()
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.info.player(player_id).is_some()
    }

    /// Listed in the lobby
    pub fn is_open(&self) -> bool {
        !self.closed && !self.info.is_started
    }

    /// Game running and not yet decided
    pub fn in_play(&self) -> bool {
        self.game.as_ref().is_some_and(|g| !g.is_game_over)
    }

    /// Member ids in join order
    pub fn member_ids(&self) -> impl Iterator<Item = &str> + Clone {
        self.info.players.iter().map(|p| p.player_id.as_str())
    }

    /// Seat a player. The first player into an empty room becomes host.
    pub fn add_player(&mut self, player_id: &str, name: &str) -> Result<(), RoomError> {
        if self.closed {
            return Err(RoomError::RoomNotFound);
        }
        if self.info.is_started {
            return Err(RoomError::GameAlreadyStarted);
        }
        if self.is_member(player_id) {
            return Err(RoomError::AlreadyInRoom);
        }
        if self.info.is_full() {
            return Err(RoomError::RoomFull);
        }

        let mut player = PlayerInfo::new(player_id, name);
        if self.info.players.is_empty() {
            player.is_host = true;
            self.info.host_id = player_id.to_string();
        }
        self.info.players.push(player);
        Ok(())
    }

    /// Unseat a player, promoting the earliest remaining joiner to host and
    /// closing the room once empty
    pub fn remove_player(&mut self, player_id: &str) -> Result<Departure, RoomError> {
        let idx = self
            .info
            .players
            .iter()
            .position(|p| p.player_id == player_id)
            .ok_or(RoomError::NotInRoom)?;
        let player = self.info.players.remove(idx);

        let removal = match (self.turns.as_mut(), self.game.as_mut()) {
            (Some(turns), Some(game)) => turns.remove_player(game, player_id),
            _ => PlayerRemoval::default(),
        };
        self.held.remove(player_id);
        self.timers.cancel_reclaim(player_id);

        let mut new_host = None;
        if self.info.players.is_empty() {
            self.close();
        } else if player.is_host {
            let heir = &mut self.info.players[0];
            heir.is_host = true;
            self.info.host_id = heir.player_id.clone();
            new_host = Some(heir.player_id.clone());
        }

        Ok(Departure {
            player,
            new_host,
            removal,
            room_closed: self.closed,
        })
    }

    pub fn set_ready(&mut self, player_id: &str, is_ready: bool) -> Result<(), RoomError> {
        if self.info.is_started {
            return Err(RoomError::GameAlreadyStarted);
        }
        let player = self
            .info
            .players
            .iter_mut()
            .find(|p| p.player_id == player_id)
            .ok_or(RoomError::NotInRoom)?;
        player.is_ready = is_ready;
        Ok(())
    }

    pub fn set_connected(&mut self, player_id: &str, is_connected: bool) -> Result<(), RoomError> {
        let player = self
            .info
            .players
            .iter_mut()
            .find(|p| p.player_id == player_id)
            .ok_or(RoomError::NotInRoom)?;
        player.is_connected = is_connected;
        Ok(())
    }

    /// Keep a dropped player's seat; only `key` can reclaim it
    pub fn hold_seat(&mut self, player_id: &str, key: &str) -> Result<(), RoomError> {
        self.set_connected(player_id, false)?;
        self.held.insert(player_id.to_string(), key.to_string());
        Ok(())
    }

    /// Hand a held seat back. The key is spent on success.
    pub fn resume_seat(&mut self, player_id: &str, key: &str) -> bool {
        if self.held.get(player_id).map(String::as_str) != Some(key) {
            return false;
        }
        self.held.remove(player_id);
        self.set_connected(player_id, true).is_ok()
    }

    pub fn is_held(&self, player_id: &str) -> bool {
        self.held.contains_key(player_id)
    }

    /// Enough players and every one of them ready
    pub fn all_ready(&self) -> bool {
        self.info.players.len() >= MIN_PLAYERS_TO_START
            && self.info.players.iter().all(|p| p.is_ready)
    }

    /// Rack the table and hand the break to the first joiner
    pub fn start_game(&mut self) -> Result<&GameState, RoomError> {
        if self.info.is_started {
            return Err(RoomError::GameAlreadyStarted);
        }
        if !self.all_ready() {
            return Err(RoomError::PlayersNotReady);
        }

        let order = self.info.player_ids();
        let rack = Rack::for_game(self.info.game_type);
        self.info.is_started = true;
        self.turns = Some(TurnCoordinator::new(order.clone()));
        let game = self
            .game
            .insert(GameState::new(self.info.room_id.clone(), &order, &rack));
        Ok(&*game)
    }

    pub fn execute_shot(
        &mut self,
        shooter_id: &str,
        cue: &CueState,
        simulator: &dyn ShotSimulator,
    ) -> Result<ShotReport, TurnError> {
        match (self.turns.as_ref(), self.game.as_mut()) {
            (Some(turns), Some(game)) => turns.execute_shot(game, shooter_id, cue, simulator),
            _ => Err(TurnError::NoActiveGame),
        }
    }

    /// Pass the turn if it is still `turn_number`; stale clocks do nothing
    pub fn expire_turn(&mut self, turn_number: u32) -> Option<TurnChangeData> {
        let (turns, game) = (self.turns.as_ref()?, self.game.as_mut()?);
        if game.turn_number != turn_number {
            return None;
        }
        turns.pass_turn(game).ok()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.timers.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(max: usize) -> Room {
        Room::new("r1", "Table", GameType::EightBall, max, 0)
    }

    #[test]
    fn test_first_player_is_host() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        assert_eq!(r.info().host_id, "a");
        assert!(r.info().players[0].is_host);
    }

    #[test]
    fn test_join_rejections() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        assert_eq!(r.add_player("a", "Alice"), Err(RoomError::AlreadyInRoom));
        r.add_player("b", "Bob").unwrap();
        assert_eq!(r.add_player("c", "Carol"), Err(RoomError::RoomFull));
        assert_eq!(r.info().player_count(), 2);
    }

    #[test]
    fn test_host_promotion_in_join_order() {
        let mut r = room(4);
        for (id, name) in [("a", "A"), ("b", "B"), ("c", "C")] {
            r.add_player(id, name).unwrap();
        }
        let departure = r.remove_player("a").unwrap();
        assert_eq!(departure.new_host.as_deref(), Some("b"));
        assert_eq!(r.info().host_id, "b");
        assert_eq!(r.info().players.iter().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn test_last_leave_closes() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        let departure = r.remove_player("a").unwrap();
        assert!(departure.room_closed);
        assert!(r.is_closed());
        assert_eq!(r.add_player("b", "Bob"), Err(RoomError::RoomNotFound));
    }

    #[test]
    fn test_start_requires_all_ready() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        r.set_ready("a", true).unwrap();
        assert!(!r.all_ready());
        assert_eq!(r.start_game().unwrap_err(), RoomError::PlayersNotReady);

        r.add_player("b", "Bob").unwrap();
        r.set_ready("b", true).unwrap();
        let game = r.start_game().unwrap();
        assert_eq!(game.current_player_id, "a");
        assert!(r.info().is_started);
        assert!(!r.is_open());
        assert_eq!(r.add_player("c", "Carol"), Err(RoomError::GameAlreadyStarted));
    }

    #[test]
    fn test_shot_without_game() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        let cue = CueState {
            phi: 0.0,
            theta: 0.0,
            v0: 1.0,
            a: 0.0,
            b: 0.0,
            cue_ball_id: "cue".into(),
        };
        let err = r
            .execute_shot("a", &cue, &crate::game::physics::StationarySimulator)
            .unwrap_err();
        assert_eq!(err, TurnError::NoActiveGame);
    }

    #[test]
    fn test_stale_turn_clock_is_ignored() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        r.add_player("b", "Bob").unwrap();
        r.set_ready("a", true).unwrap();
        r.set_ready("b", true).unwrap();
        r.start_game().unwrap();

        assert!(r.expire_turn(7).is_none());
        let change = r.expire_turn(1).unwrap();
        assert_eq!(change.current_player_id, "b");
        assert!(r.expire_turn(1).is_none());
    }

    #[test]
    fn test_held_seat_needs_its_key() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        r.add_player("b", "Bob").unwrap();
        r.hold_seat("a", "secret").unwrap();
        assert!(!r.info().player("a").unwrap().is_connected);

        assert!(!r.resume_seat("a", ""));
        assert!(!r.resume_seat("a", "guess"));
        assert!(!r.resume_seat("b", "secret"));
        assert!(r.is_held("a"));

        assert!(r.resume_seat("a", "secret"));
        assert!(r.info().player("a").unwrap().is_connected);
        assert!(!r.resume_seat("a", "secret"));
        assert_eq!(r.hold_seat("c", "k"), Err(RoomError::NotInRoom));
    }

    #[test]
    fn test_mid_game_leave_forfeits() {
        let mut r = room(2);
        r.add_player("a", "Alice").unwrap();
        r.add_player("b", "Bob").unwrap();
        r.set_ready("a", true).unwrap();
        r.set_ready("b", true).unwrap();
        r.start_game().unwrap();

        let departure = r.remove_player("a").unwrap();
        let over = departure.removal.game_over.unwrap();
        assert_eq!(over.winner_id.as_deref(), Some("b"));
        assert!(!r.in_play());
    }
}
