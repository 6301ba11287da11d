//! Authoritative game state carried in snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rack::Rack;

/// Ball position on the table (x, y, z) in metres
pub type Position = [f64; 3];

/// Motion state of a single ball
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallState {
    Stationary,
    Spinning,
    Sliding,
    Rolling,
    Pocketed,
}

impl BallState {
    pub fn is_on_table(self) -> bool {
        self != Self::Pocketed
    }
}

/// Cue stick parameters for one shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueState {
    /// Horizontal aim angle (degrees)
    pub phi: f64,
    /// Cue elevation (degrees)
    pub theta: f64,
    /// Strike velocity (m/s)
    #[serde(rename = "V0")]
    pub v0: f64,
    /// Horizontal english offset
    pub a: f64,
    /// Vertical english offset
    pub b: f64,
    /// Ball the cue strikes
    pub cue_ball_id: String,
}

impl CueState {
    /// Every parameter is a real number (JSON has no NaN or infinity)
    pub fn is_finite(&self) -> bool {
        [self.phi, self.theta, self.v0, self.a, self.b]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Complete game state for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub room_id: String,
    pub current_player_id: String,
    /// Increases only when the turn passes
    pub turn_number: u32,
    /// Shots taken within the current turn
    pub shot_number: u32,
    pub ball_positions: BTreeMap<String, Position>,
    pub ball_states: BTreeMap<String, BallState>,
    #[serde(default)]
    pub cue_state: Option<CueState>,
    pub score: BTreeMap<String, i64>,
    pub is_game_over: bool,
    #[serde(default)]
    pub winner_id: Option<String>,
}

impl GameState {
    /// Fresh state for a racked table; the first player in `players` breaks
    pub fn new(room_id: impl Into<String>, players: &[String], rack: &Rack) -> Self {
        let ball_positions: BTreeMap<String, Position> = rack
            .balls
            .iter()
            .map(|(id, pos)| (id.clone(), *pos))
            .collect();
        let ball_states = ball_positions
            .keys()
            .map(|id| (id.clone(), BallState::Stationary))
            .collect();

        Self {
            room_id: room_id.into(),
            current_player_id: players.first().cloned().unwrap_or_default(),
            turn_number: 1,
            shot_number: 0,
            ball_positions,
            ball_states,
            cue_state: None,
            score: players.iter().map(|p| (p.clone(), 0)).collect(),
            is_game_over: false,
            winner_id: None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.ball_positions
            .values()
            .flatten()
            .all(|v| v.is_finite())
            && self.cue_state.as_ref().map_or(true, CueState::is_finite)
    }

    /// Number of balls not yet pocketed
    pub fn balls_on_table(&self) -> usize {
        self.ball_states.values().filter(|s| s.is_on_table()).count()
    }
}
