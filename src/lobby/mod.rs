//! Rooms and the lobby listing

pub mod registry;
pub mod room;

pub use registry::{RoomRegistry, SharedRoom, DEFAULT_MAX_PLAYERS};
pub use room::{Departure, Room, RoomError, MIN_PLAYERS_TO_START};
