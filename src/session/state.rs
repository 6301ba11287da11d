//! Per-connection protocol state machine

use crate::ws::protocol::MessageType;

/// Protocol state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport up, handshake not yet done
    Connecting,
    /// Browsing rooms
    Lobby,
    /// Seated in a room, not ready
    InRoom,
    /// Ready, waiting for the rest of the room
    ReadyWait,
    /// Game in progress
    InGame,
    /// Game finished, still seated
    GameOver,
    /// Terminal
    Disconnected,
}

impl SessionState {
    pub fn is_seated(self) -> bool {
        matches!(
            self,
            Self::InRoom | Self::ReadyWait | Self::InGame | Self::GameOver
        )
    }
}

/// Events that move the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed
    Connected,
    /// Created or joined a room
    EnteredRoom,
    /// Ready flag toggled
    ReadyChanged(bool),
    /// Room started its game
    GameStarted,
    /// Game reported over
    GameEnded,
    /// Explicit leave
    LeftRoom,
    /// Seat restored after a reconnect into a running game
    Resumed,
    /// Transport closed, timed out or kicked
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot apply {event:?} in state {state:?}")]
pub struct TransitionError {
    pub state: SessionState,
    pub event: SessionEvent,
}

/// Connection state machine. Failed transitions leave the state untouched.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether an inbound message of this type is legal right now
    pub fn accepts(&self, msg_type: MessageType) -> bool {
        use MessageType as M;
        use SessionState as S;

        // Keepalive and goodbye are always fine on a live connection
        if matches!(msg_type, M::Ping | M::Pong | M::Disconnect) {
            return self.state != S::Disconnected;
        }

        match self.state {
            S::Connecting => matches!(msg_type, M::Connect),
            S::Lobby => matches!(msg_type, M::RoomList | M::CreateRoom | M::JoinRoom),
            S::InRoom => matches!(
                msg_type,
                M::RoomList | M::LeaveRoom | M::PlayerReady | M::ChatMessage
            ),
            S::ReadyWait => matches!(
                msg_type,
                M::RoomList | M::LeaveRoom | M::PlayerReady | M::GameStart | M::ChatMessage
            ),
            S::InGame => matches!(msg_type, M::ShotAim | M::ShotExecute | M::ChatMessage),
            S::GameOver => matches!(msg_type, M::RoomList | M::LeaveRoom | M::ChatMessage),
            S::Disconnected => false,
        }
    }

    /// Next state for `event`, without applying it
    pub fn peek(&self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self.state, event) {
            (S::Disconnected, _) => None,
            (_, E::Disconnected) => Some(S::Disconnected),
            (S::Connecting, E::Connected) => Some(S::Lobby),
            (S::Connecting, E::Resumed) => Some(S::InGame),
            (S::Lobby, E::EnteredRoom) => Some(S::InRoom),
            (S::InRoom, E::ReadyChanged(true)) => Some(S::ReadyWait),
            (S::InRoom, E::ReadyChanged(false)) => Some(S::InRoom),
            (S::ReadyWait, E::ReadyChanged(false)) => Some(S::InRoom),
            (S::ReadyWait, E::ReadyChanged(true)) => Some(S::ReadyWait),
            (S::ReadyWait, E::GameStarted) => Some(S::InGame),
            (S::InGame, E::GameEnded) => Some(S::GameOver),
            (S::InRoom | S::ReadyWait | S::GameOver, E::LeftRoom) => Some(S::Lobby),
            _ => None,
        };

        next.ok_or(TransitionError {
            state: self.state,
            event,
        })
    }

    /// Apply `event` atomically
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        let next = self.peek(event)?;
        self.state = next;
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Disconnected
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(events: &[SessionEvent]) -> SessionStateMachine {
        let mut m = SessionStateMachine::new();
        for e in events {
            m.apply(*e).unwrap();
        }
        m
    }

    #[test]
    fn test_happy_path() {
        let mut m = SessionStateMachine::new();
        assert_eq!(m.apply(SessionEvent::Connected), Ok(SessionState::Lobby));
        assert_eq!(m.apply(SessionEvent::EnteredRoom), Ok(SessionState::InRoom));
        assert_eq!(m.apply(SessionEvent::ReadyChanged(true)), Ok(SessionState::ReadyWait));
        assert_eq!(m.apply(SessionEvent::GameStarted), Ok(SessionState::InGame));
        assert_eq!(m.apply(SessionEvent::GameEnded), Ok(SessionState::GameOver));
        assert_eq!(m.apply(SessionEvent::LeftRoom), Ok(SessionState::Lobby));
    }

    #[test]
    fn test_unready_returns_to_room() {
        let mut m = machine_in(&[
            SessionEvent::Connected,
            SessionEvent::EnteredRoom,
            SessionEvent::ReadyChanged(true),
        ]);
        assert_eq!(m.apply(SessionEvent::ReadyChanged(false)), Ok(SessionState::InRoom));
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut m = machine_in(&[SessionEvent::Connected]);
        let err = m.apply(SessionEvent::GameStarted).unwrap_err();
        assert_eq!(err.state, SessionState::Lobby);
        assert_eq!(m.state(), SessionState::Lobby);
    }

    #[test]
    fn test_cannot_leave_mid_game() {
        let mut m = machine_in(&[
            SessionEvent::Connected,
            SessionEvent::EnteredRoom,
            SessionEvent::ReadyChanged(true),
            SessionEvent::GameStarted,
        ]);
        assert!(m.apply(SessionEvent::LeftRoom).is_err());
        assert!(!m.accepts(MessageType::LeaveRoom));
        assert_eq!(m.state(), SessionState::InGame);
    }

    #[test]
    fn test_shot_rejected_in_lobby() {
        let m = machine_in(&[SessionEvent::Connected]);
        assert!(!m.accepts(MessageType::ShotExecute));
        assert!(m.accepts(MessageType::CreateRoom));
        assert!(m.accepts(MessageType::Ping));
    }

    #[test]
    fn test_server_only_types_never_accepted() {
        let states = [
            machine_in(&[]),
            machine_in(&[SessionEvent::Connected]),
            machine_in(&[SessionEvent::Connected, SessionEvent::EnteredRoom]),
        ];
        for m in states {
            for t in [
                MessageType::RoomUpdate,
                MessageType::ShotResult,
                MessageType::GameState,
                MessageType::TurnChange,
                MessageType::GameOver,
                MessageType::Error,
            ] {
                assert!(!m.accepts(t), "{:?} accepted {:?}", m.state(), t);
            }
        }
    }

    #[test]
    fn test_disconnect_from_any_state_is_terminal() {
        let mut m = machine_in(&[SessionEvent::Connected, SessionEvent::EnteredRoom]);
        assert_eq!(m.apply(SessionEvent::Disconnected), Ok(SessionState::Disconnected));
        assert!(m.is_terminal());
        assert!(m.apply(SessionEvent::Disconnected).is_err());
        assert!(!m.accepts(MessageType::Ping));
    }

    #[test]
    fn test_resume_goes_straight_to_game() {
        let mut m = SessionStateMachine::new();
        assert_eq!(m.apply(SessionEvent::Resumed), Ok(SessionState::InGame));
    }
}
