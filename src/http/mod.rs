//! HTTP surface: health, lobby listing and the WebSocket upgrade

pub mod routes;

pub use routes::build_router;
