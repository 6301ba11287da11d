//! Per-connection sessions: protocol state, dispatch and room timers

pub mod dispatch;
pub mod state;
pub mod timers;

pub use dispatch::{Flow, PeerSession};
pub use state::{SessionEvent, SessionState, SessionStateMachine, TransitionError};
