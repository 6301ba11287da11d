//! Application state shared across routes and connections

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::game::physics::{ShotSimulator, StationarySimulator};
use crate::lobby::RoomRegistry;
use crate::ws::peers::PeerDirectory;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub peers: Arc<PeerDirectory>,
    pub simulator: Arc<dyn ShotSimulator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_simulator(config, Arc::new(StationarySimulator))
    }

    /// State whose shots are resolved by `simulator`
    pub fn with_simulator(config: Config, simulator: Arc<dyn ShotSimulator>) -> Self {
        let config = Arc::new(config);

        // Initialize room registry
        let rooms = Arc::new(RoomRegistry::new(config.max_rooms, config.max_players_cap));

        // Initialize connection routing
        let peers = Arc::new(PeerDirectory::new());

        Self {
            config,
            rooms,
            peers,
            simulator,
        }
    }

    /// Open the configured standing rooms
    pub fn open_standing_rooms(&self) {
        for standing in &self.config.standing_rooms {
            match self.rooms.open_room(&standing.name, standing.game_type, None) {
                Ok(room) => info!(room_id = %room.room_id, name = %standing.name, "Standing room ready"),
                Err(e) => warn!(name = %standing.name, error = %e, "Could not open standing room"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StandingRoom;
    use crate::ws::protocol::GameType;

    #[test]
    fn test_standing_rooms_are_listed() {
        let config = Config {
            standing_rooms: vec![
                StandingRoom {
                    name: "Hall".into(),
                    game_type: GameType::EightBall,
                },
                StandingRoom {
                    name: "Club".into(),
                    game_type: GameType::Snooker,
                },
            ],
            ..Config::default()
        };
        let state = AppState::new(config);
        state.open_standing_rooms();

        let listed = state.rooms.list_rooms();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].game_type, GameType::Snooker);
    }
}
