//! Pool game: table state, turn arbitration and synchronization

pub mod physics;
pub mod rack;
pub mod state;
pub mod sync;
pub mod turn;

pub use physics::{ShotOutcome, ShotSimulator, StationarySimulator};
pub use rack::Rack;
pub use state::{BallState, CueState, GameState, Position};
pub use sync::{GameStateSynchronizer, GameView};
pub use turn::{PlayerRemoval, ShotReport, TurnCoordinator, TurnError};
