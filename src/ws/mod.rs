//! WebSocket transport: wire protocol, codec and connection plumbing

pub mod codec;
pub mod handler;
pub mod keepalive;
pub mod peers;
pub mod protocol;
pub mod reconnect;

pub use handler::ws_handler;

/// Terminal failures of a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection timed out")]
    Timeout,

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,
}
