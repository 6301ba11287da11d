//! Turn arbitration for a running game

use thiserror::Error;
use tracing::debug;

use crate::ws::protocol::{ErrorCode, GameOverData, ShotResultData, TurnChangeData};

use super::physics::ShotSimulator;
use super::state::{CueState, GameState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("Not your turn (current player is {current})")]
    OutOfTurn { current: String },
    #[error("No game in progress")]
    NoActiveGame,
    #[error("Game is already over")]
    GameFinished,
}

impl TurnError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfTurn { .. } => ErrorCode::OutOfTurn,
            Self::NoActiveGame => ErrorCode::NoActiveGame,
            Self::GameFinished => ErrorCode::GameFinished,
        }
    }
}

/// Everything an accepted shot changed
#[derive(Debug, Clone, PartialEq)]
pub struct ShotReport {
    pub result: ShotResultData,
    pub turn_change: Option<TurnChangeData>,
    pub game_over: Option<GameOverData>,
}

/// Effect of a player leaving a running game
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRemoval {
    pub turn_change: Option<TurnChangeData>,
    pub game_over: Option<GameOverData>,
}

/// Owns the turn order (join order) of one game
#[derive(Debug, Clone)]
pub struct TurnCoordinator {
    order: Vec<String>,
}

impl TurnCoordinator {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Player after `player_id`, wrapping around
    pub fn next_after(&self, player_id: &str) -> Option<&str> {
        if self.order.is_empty() {
            return None;
        }
        let next = match self.order.iter().position(|p| p == player_id) {
            Some(idx) => (idx + 1) % self.order.len(),
            None => 0,
        };
        self.order.get(next).map(String::as_str)
    }

    /// Validate and apply a shot. Rejected shots leave `state` untouched.
    pub fn execute_shot(
        &self,
        state: &mut GameState,
        shooter_id: &str,
        cue: &CueState,
        simulator: &dyn ShotSimulator,
    ) -> Result<ShotReport, TurnError> {
        if state.is_game_over {
            return Err(TurnError::GameFinished);
        }
        if state.current_player_id != shooter_id {
            return Err(TurnError::OutOfTurn {
                current: state.current_player_id.clone(),
            });
        }

        let outcome = simulator.simulate(state, shooter_id, cue);

        state.ball_positions.extend(outcome.ball_positions);
        state.ball_states.extend(outcome.ball_states);
        for (player_id, delta) in outcome.score_delta {
            *state.score.entry(player_id).or_insert(0) += delta;
        }
        state.shot_number += 1;
        state.cue_state = None;

        let mut turn_change = None;
        let mut game_over = None;
        if outcome.game_over {
            game_over = Some(self.finish(state, outcome.winner_id));
        } else if outcome.turn_passes {
            turn_change = self.advance(state);
        }

        debug!(
            room_id = %state.room_id,
            shooter = %shooter_id,
            turn = state.turn_number,
            shot = state.shot_number,
            "Shot applied"
        );

        Ok(ShotReport {
            result: ShotResultData {
                shooter_id: shooter_id.to_string(),
                cue_state: cue.clone(),
                turn_number: state.turn_number,
                shot_number: state.shot_number,
                turn_passed: turn_change.is_some(),
            },
            turn_change,
            game_over,
        })
    }

    /// Hand the table to the next player without a shot (turn clock expiry)
    pub fn pass_turn(&self, state: &mut GameState) -> Result<TurnChangeData, TurnError> {
        if state.is_game_over {
            return Err(TurnError::GameFinished);
        }
        self.advance(state).ok_or(TurnError::NoActiveGame)
    }

    /// Drop a player from the rotation. Fewer than two left ends the game.
    pub fn remove_player(&mut self, state: &mut GameState, player_id: &str) -> PlayerRemoval {
        if !self.order.iter().any(|p| p == player_id) {
            return PlayerRemoval::default();
        }
        let was_current = state.current_player_id == player_id;
        let successor = self
            .next_after(player_id)
            .filter(|next| *next != player_id)
            .map(str::to_string);
        self.order.retain(|p| p != player_id);

        if state.is_game_over {
            return PlayerRemoval::default();
        }

        if self.order.len() < 2 {
            let winner = self.order.first().cloned();
            return PlayerRemoval {
                turn_change: None,
                game_over: Some(self.finish(state, winner)),
            };
        }

        if was_current {
            if let Some(next) = successor {
                state.current_player_id = next;
                state.turn_number += 1;
                state.shot_number = 0;
                state.cue_state = None;
                return PlayerRemoval {
                    turn_change: Some(TurnChangeData {
                        current_player_id: state.current_player_id.clone(),
                        turn_number: state.turn_number,
                    }),
                    game_over: None,
                };
            }
        }
        PlayerRemoval::default()
    }

    fn advance(&self, state: &mut GameState) -> Option<TurnChangeData> {
        let next = self.next_after(&state.current_player_id)?.to_string();
        state.current_player_id = next;
        state.turn_number += 1;
        state.shot_number = 0;
        state.cue_state = None;
        Some(TurnChangeData {
            current_player_id: state.current_player_id.clone(),
            turn_number: state.turn_number,
        })
    }

    fn finish(&self, state: &mut GameState, winner_id: Option<String>) -> GameOverData {
        state.is_game_over = true;
        state.winner_id = winner_id;
        state.cue_state = None;
        GameOverData {
            winner_id: state.winner_id.clone(),
            score: state.score.clone(),
        }
    }
}
