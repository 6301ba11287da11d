//! Pool Netplay - session protocol for turn-based multiplayer pool
//!
//! The crate holds both ends of the protocol:
//! - the authoritative server (rooms, turn order, state broadcast)
//! - the client library a game front-end embeds

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod lobby;
pub mod session;
pub mod util;
pub mod ws;
