//! Client callback slots, invoked from `MultiplayerClient::update`

use crate::game::state::{CueState, GameState};
use crate::ws::protocol::{GameOverData, Message, RoomInfo, RoomSummary, TurnChangeData};

use super::ClientError;

/// Registered handlers. Each fires at most once per event, on the thread
/// that calls `update`.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_connected: Option<Box<dyn FnMut(&str) + Send>>,
    pub(crate) on_disconnected: Option<Box<dyn FnMut(Option<&str>) + Send>>,
    pub(crate) on_room_list: Option<Box<dyn FnMut(&[RoomSummary]) + Send>>,
    pub(crate) on_room_update: Option<Box<dyn FnMut(&RoomInfo) + Send>>,
    pub(crate) on_game_start: Option<Box<dyn FnMut(&RoomInfo, &GameState) + Send>>,
    pub(crate) on_game_state: Option<Box<dyn FnMut(&GameState) + Send>>,
    pub(crate) on_turn_change: Option<Box<dyn FnMut(&TurnChangeData) + Send>>,
    pub(crate) on_game_over: Option<Box<dyn FnMut(&GameOverData) + Send>>,
    pub(crate) on_shot_aim: Option<Box<dyn FnMut(&str, &CueState) + Send>>,
    pub(crate) on_chat: Option<Box<dyn FnMut(&str, &str) + Send>>,
    pub(crate) on_error: Option<Box<dyn FnMut(&ClientError) + Send>>,
    pub(crate) on_message: Option<Box<dyn FnMut(&Message) + Send>>,
}

impl Callbacks {
    pub(crate) fn connected(&mut self, player_id: &str) {
        if let Some(cb) = self.on_connected.as_mut() {
            cb(player_id);
        }
    }

    pub(crate) fn disconnected(&mut self, reason: Option<&str>) {
        if let Some(cb) = self.on_disconnected.as_mut() {
            cb(reason);
        }
    }

    pub(crate) fn room_list(&mut self, rooms: &[RoomSummary]) {
        if let Some(cb) = self.on_room_list.as_mut() {
            cb(rooms);
        }
    }

    pub(crate) fn room_update(&mut self, room: &RoomInfo) {
        if let Some(cb) = self.on_room_update.as_mut() {
            cb(room);
        }
    }

    pub(crate) fn game_start(&mut self, room: &RoomInfo, state: &GameState) {
        if let Some(cb) = self.on_game_start.as_mut() {
            cb(room, state);
        }
    }

    pub(crate) fn game_state(&mut self, state: &GameState) {
        if let Some(cb) = self.on_game_state.as_mut() {
            cb(state);
        }
    }

    pub(crate) fn turn_change(&mut self, change: &TurnChangeData) {
        if let Some(cb) = self.on_turn_change.as_mut() {
            cb(change);
        }
    }

    pub(crate) fn game_over(&mut self, over: &GameOverData) {
        if let Some(cb) = self.on_game_over.as_mut() {
            cb(over);
        }
    }

    pub(crate) fn shot_aim(&mut self, shooter_id: &str, cue: &CueState) {
        if let Some(cb) = self.on_shot_aim.as_mut() {
            cb(shooter_id, cue);
        }
    }

    pub(crate) fn chat(&mut self, sender_id: &str, text: &str) {
        if let Some(cb) = self.on_chat.as_mut() {
            cb(sender_id, text);
        }
    }

    pub(crate) fn error(&mut self, error: &ClientError) {
        if let Some(cb) = self.on_error.as_mut() {
            cb(error);
        }
    }

    pub(crate) fn message(&mut self, msg: &Message) {
        if let Some(cb) = self.on_message.as_mut() {
            cb(msg);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
