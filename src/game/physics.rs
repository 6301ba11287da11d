//! Seam to the external ball simulation

use std::collections::BTreeMap;

use super::state::{BallState, CueState, GameState, Position};

/// What the table looks like once the balls settle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotOutcome {
    /// Final positions; balls not listed keep their previous position
    pub ball_positions: BTreeMap<String, Position>,
    /// Final motion states; balls not listed keep their previous state
    pub ball_states: BTreeMap<String, BallState>,
    /// Whether the shooter loses the table
    pub turn_passes: bool,
    /// Points awarded per player for this shot
    pub score_delta: BTreeMap<String, i64>,
    /// Shot ended the game
    pub game_over: bool,
    /// Winner when `game_over` is set; `None` for a draw
    pub winner_id: Option<String>,
}

/// Runs a shot against the current table.
///
/// Implementations own the physics and the rules of the game type. The
/// session layer only applies what comes back.
pub trait ShotSimulator: Send + Sync {
    fn simulate(&self, state: &GameState, shooter_id: &str, cue: &CueState) -> ShotOutcome;
}

/// Leaves every ball where it is and hands the table over.
///
/// Useful when the real simulation runs on the clients and the server only
/// arbitrates turns.
#[derive(Debug, Clone, Copy, Default)]
pub struct StationarySimulator;

impl ShotSimulator for StationarySimulator {
    fn simulate(&self, state: &GameState, _shooter_id: &str, _cue: &CueState) -> ShotOutcome {
        ShotOutcome {
            ball_positions: state.ball_positions.clone(),
            ball_states: state
                .ball_states
                .iter()
                .map(|(id, s)| {
                    let settled = if s.is_on_table() {
                        BallState::Stationary
                    } else {
                        BallState::Pocketed
                    };
                    (id.clone(), settled)
                })
                .collect(),
            turn_passes: true,
            ..ShotOutcome::default()
        }
    }
}

impl<F> ShotSimulator for F
where
    F: Fn(&GameState, &str, &CueState) -> ShotOutcome + Send + Sync,
{
    fn simulate(&self, state: &GameState, shooter_id: &str, cue: &CueState) -> ShotOutcome {
        self(state, shooter_id, cue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rack::Rack;
    use crate::ws::protocol::GameType;

    fn cue() -> CueState {
        CueState {
            phi: 45.0,
            theta: 0.0,
            v0: 3.0,
            a: 0.0,
            b: 0.0,
            cue_ball_id: "cue".into(),
        }
    }

    #[test]
    fn test_stationary_keeps_table() {
        let players = vec!["a".to_string(), "b".to_string()];
        let state = GameState::new("r", &players, &Rack::for_game(GameType::EightBall));
        let outcome = StationarySimulator.simulate(&state, "a", &cue());

        assert_eq!(outcome.ball_positions, state.ball_positions);
        assert!(outcome.turn_passes);
        assert!(!outcome.game_over);
        assert!(outcome.score_delta.is_empty());
    }

    #[test]
    fn test_closure_is_a_simulator() {
        let sim = |_: &GameState, shooter: &str, _: &CueState| ShotOutcome {
            score_delta: BTreeMap::from([(shooter.to_string(), 1)]),
            ..ShotOutcome::default()
        };
        let players = vec!["a".to_string()];
        let state = GameState::new("r", &players, &Rack::for_game(GameType::NineBall));
        let outcome = sim.simulate(&state, "a", &cue());
        assert_eq!(outcome.score_delta.get("a"), Some(&1));
        assert!(!outcome.turn_passes);
    }
}
