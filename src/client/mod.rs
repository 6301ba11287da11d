//! Client library: a polled session handle for game front-ends
//!
//! Network I/O runs on a tokio runtime; the front-end calls
//! [`MultiplayerClient::update`] from its own loop and callbacks fire there.

pub mod callbacks;
pub mod screens;
pub mod transport;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::game::state::{CueState, GameState};
use crate::game::sync::GameView;
use crate::session::state::{SessionEvent, SessionState, SessionStateMachine};
use crate::ws::protocol::{
    ChatData, ConnectData, ConnectionMsg, CreateRoomData, DisconnectData, ErrorCode, GameOverData,
    GameStartData, GameType, GameplayMsg, JoinRoomData, LeaveRoomData, LobbyMsg, Message,
    MessageType, Payload, PlayerReadyData, ResumeToken, RoomInfo, RoomListData, RoomSummary,
    ShotAimData, ShotExecuteData, TurnChangeData,
};
use crate::ws::codec::{self, EncodeError};
use crate::ws::ConnectionError;

use callbacks::Callbacks;
use screens::ScreenId;
use transport::{Transport, TransportEvent};

/// Everything a client call or callback can report
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,

    #[error("{msg_type} not allowed while {state:?}")]
    InvalidState {
        state: SessionState,
        msg_type: MessageType,
    },

    #[error("Server error ({code:?}): {message}")]
    Server { code: ErrorCode, message: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// One player's connection to a session server
pub struct MultiplayerClient {
    runtime: Handle,
    config: ClientConfig,
    transport: Option<Transport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    machine: SessionStateMachine,
    player_id: Option<String>,
    resume_key: Option<String>,
    room: Option<RoomInfo>,
    rooms: Vec<RoomSummary>,
    view: GameView,
    callbacks: Callbacks,
    disconnect_reported: bool,
    goodbye_reason: Option<String>,
}

impl MultiplayerClient {
    pub fn new(runtime: Handle) -> Self {
        Self::with_config(runtime, ClientConfig::default())
    }

    pub fn with_config(runtime: Handle, config: ClientConfig) -> Self {
        Self {
            runtime,
            config,
            transport: None,
            events: None,
            machine: SessionStateMachine::new(),
            player_id: None,
            resume_key: None,
            room: None,
            rooms: Vec::new(),
            view: GameView::new(),
            callbacks: Callbacks::default(),
            disconnect_reported: false,
            goodbye_reason: None,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Open a session with the server at `host:port`. Completion is
    /// reported through `on_connected` (or `on_error` + `on_disconnected`).
    pub fn connect(&mut self, host: &str, port: u16, name: &str) -> Result<(), ClientError> {
        if self.transport.is_some() {
            return Err(ClientError::InvalidState {
                state: self.machine.state(),
                msg_type: MessageType::Connect,
            });
        }

        self.machine = SessionStateMachine::new();
        self.player_id = None;
        self.resume_key = None;
        self.room = None;
        self.rooms.clear();
        self.view.reset();
        self.disconnect_reported = false;
        self.goodbye_reason = None;

        let (tx, rx) = mpsc::unbounded_channel();
        let hello = ConnectData::hello(name);
        let url = format!("ws://{host}:{port}/ws");
        info!(url = %url, name = %name, "Connecting");
        self.transport = Some(Transport::spawn(
            &self.runtime,
            url,
            hello,
            self.config.clone(),
            tx,
        ));
        self.events = Some(rx);
        Ok(())
    }

    /// Say goodbye and drop the connection. A mid-game disconnect forfeits.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.set_resume(None);
            let goodbye = DisconnectData {
                reason: Some("client disconnect".to_string()),
            };
            if transport.send(self.outgoing(goodbye)).is_err() {
                debug!("Connection already gone");
            }
        }
        self.events = None;
        self.close_session(None);
    }

    pub fn request_room_list(&mut self) -> Result<(), ClientError> {
        self.send(RoomListData::default())
    }

    pub fn create_room(&mut self, name: &str, game_type: GameType) -> Result<(), ClientError> {
        self.send(CreateRoomData {
            name: name.to_string(),
            game_type,
            max_players: None,
        })
    }

    pub fn join_room(&mut self, room_id: &str) -> Result<(), ClientError> {
        self.send(JoinRoomData {
            room_id: room_id.to_string(),
        })
    }

    pub fn leave_room(&mut self) -> Result<(), ClientError> {
        self.send(LeaveRoomData {})
    }

    pub fn set_ready(&mut self, is_ready: bool) -> Result<(), ClientError> {
        self.send(PlayerReadyData { is_ready })
    }

    /// Host-only explicit start
    pub fn start_game(&mut self) -> Result<(), ClientError> {
        self.send(GameStartData::default())
    }

    /// Share the cue being lined up; also shown locally until the next snapshot
    pub fn aim(&mut self, cue: CueState) -> Result<(), ClientError> {
        self.send(ShotAimData {
            cue_state: cue.clone(),
        })?;
        self.view.set_preview(cue);
        Ok(())
    }

    pub fn execute_shot(&mut self, cue: CueState) -> Result<(), ClientError> {
        self.send(ShotExecuteData { cue_state: cue })
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(ChatData {
            text: text.to_string(),
        })
    }

    /// Deliver pending network events to callbacks. Never blocks.
    /// Returns the number of events handled.
    pub fn update(&mut self) -> usize {
        let Some(events) = self.events.as_mut() else {
            return 0;
        };
        let mut batch = Vec::new();
        while let Ok(event) = events.try_recv() {
            batch.push(event);
        }

        let handled = batch.len();
        for event in batch {
            self.handle_event(event);
        }
        handled
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn room(&self) -> Option<&RoomInfo> {
        self.room.as_ref()
    }

    /// Rooms from the last `room_list` reply
    pub fn rooms(&self) -> &[RoomSummary] {
        &self.rooms
    }

    pub fn game_view(&self) -> &GameView {
        &self.view
    }

    pub fn is_my_turn(&self) -> bool {
        self.player_id
            .as_deref()
            .is_some_and(|id| self.view.is_turn_of(id))
    }

    /// Sitting at a table, in or out of a game
    pub fn is_seated(&self) -> bool {
        self.machine.state().is_seated()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Screen matching the current session state
    pub fn screen(&self) -> ScreenId {
        ScreenId::for_session(self.machine.state())
    }

    // ------------------------------------------------------------------
    // Callback registration
    // ------------------------------------------------------------------

    pub fn on_connected(&mut self, f: impl FnMut(&str) + Send + 'static) {
        self.callbacks.on_connected = Some(Box::new(f));
    }

    pub fn on_disconnected(&mut self, f: impl FnMut(Option<&str>) + Send + 'static) {
        self.callbacks.on_disconnected = Some(Box::new(f));
    }

    pub fn on_room_list(&mut self, f: impl FnMut(&[RoomSummary]) + Send + 'static) {
        self.callbacks.on_room_list = Some(Box::new(f));
    }

    pub fn on_room_update(&mut self, f: impl FnMut(&RoomInfo) + Send + 'static) {
        self.callbacks.on_room_update = Some(Box::new(f));
    }

    pub fn on_game_start(&mut self, f: impl FnMut(&RoomInfo, &GameState) + Send + 'static) {
        self.callbacks.on_game_start = Some(Box::new(f));
    }

    pub fn on_game_state(&mut self, f: impl FnMut(&GameState) + Send + 'static) {
        self.callbacks.on_game_state = Some(Box::new(f));
    }

    pub fn on_turn_change(&mut self, f: impl FnMut(&TurnChangeData) + Send + 'static) {
        self.callbacks.on_turn_change = Some(Box::new(f));
    }

    pub fn on_game_over(&mut self, f: impl FnMut(&GameOverData) + Send + 'static) {
        self.callbacks.on_game_over = Some(Box::new(f));
    }

    pub fn on_shot_aim(&mut self, f: impl FnMut(&str, &CueState) + Send + 'static) {
        self.callbacks.on_shot_aim = Some(Box::new(f));
    }

    pub fn on_chat(&mut self, f: impl FnMut(&str, &str) + Send + 'static) {
        self.callbacks.on_chat = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(&ClientError) + Send + 'static) {
        self.callbacks.on_error = Some(Box::new(f));
    }

    /// Raw feed of every server message, before the typed callbacks
    pub fn on_message(&mut self, f: impl FnMut(&Message) + Send + 'static) {
        self.callbacks.on_message = Some(Box::new(f));
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn outgoing(&self, payload: impl Into<Payload>) -> Message {
        Message::new(self.player_id.clone().unwrap_or_default(), payload)
    }

    fn send(&mut self, payload: impl Into<Payload>) -> Result<(), ClientError> {
        let payload = payload.into();
        let msg_type = payload.msg_type();
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        if !self.machine.accepts(msg_type) {
            return Err(ClientError::InvalidState {
                state: self.machine.state(),
                msg_type,
            });
        }
        let msg = self.outgoing(payload);
        codec::ensure_finite(&msg)?;
        transport.send(msg)?;
        Ok(())
    }

    fn apply(&mut self, event: SessionEvent) {
        if let Err(e) = self.machine.apply(event) {
            debug!(error = %e, "Ignoring session transition");
        }
        self.sync_resume();
    }

    /// Arm or disarm transparent reconnection for the current state
    fn sync_resume(&self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let token = match (&self.player_id, &self.room, &self.resume_key) {
            (Some(player_id), Some(room), Some(key))
                if self.config.reconnect.should_reconnect(self.machine.state()) =>
            {
                Some(ResumeToken {
                    player_id: player_id.clone(),
                    room_id: room.room_id.clone(),
                    key: key.clone(),
                })
            }
            _ => None,
        };
        transport.set_resume(token);
    }

    fn close_session(&mut self, reason: Option<&str>) {
        self.transport = None;
        self.events = None;
        if self.machine.apply(SessionEvent::Disconnected).is_err() {
            debug!("Session already closed");
        }
        self.room = None;
        self.view.reset();
        if !self.disconnect_reported {
            self.disconnect_reported = true;
            self.callbacks.disconnected(reason);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(msg) => self.handle_message(msg),
            TransportEvent::Reconnecting { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            }
            TransportEvent::Error(e) => {
                self.callbacks.error(&ClientError::Connection(e));
            }
            TransportEvent::Closed => {
                let reason = self.goodbye_reason.take();
                self.close_session(reason.as_deref());
            }
        }
    }

    fn handle_message(&mut self, msg: Message) {
        self.callbacks.message(&msg);
        let sender_id = msg.sender_id;

        match msg.payload {
            Payload::Connection(ConnectionMsg::Connect(data)) => self.handle_connect_reply(data),
            Payload::Connection(ConnectionMsg::Disconnect(data)) => {
                info!(reason = ?data.reason, "Server closed the session");
                if let Some(transport) = self.transport.as_ref() {
                    transport.set_resume(None);
                }
                self.goodbye_reason = data.reason;
            }
            Payload::Connection(_) => {}
            Payload::Lobby(msg) => match msg {
                LobbyMsg::RoomList(data) => {
                    self.rooms = data.rooms;
                    self.callbacks.room_list(&self.rooms);
                }
                LobbyMsg::RoomUpdate(data) => self.handle_room_update(data.room),
                LobbyMsg::LeaveRoom(_) => {
                    self.room = None;
                    self.view.reset();
                    self.apply(SessionEvent::LeftRoom);
                }
                LobbyMsg::GameStart(data) => self.handle_game_start(data),
                LobbyMsg::CreateRoom(_) | LobbyMsg::JoinRoom(_) | LobbyMsg::PlayerReady(_) => {
                    debug!("Ignoring client-only lobby message");
                }
            },
            Payload::Gameplay(msg) => match msg {
                GameplayMsg::GameState(state) => {
                    self.view.apply_snapshot(state);
                    if let Some(state) = self.view.snapshot() {
                        self.callbacks.game_state(state);
                    }
                }
                GameplayMsg::TurnChange(change) => self.callbacks.turn_change(&change),
                GameplayMsg::GameOver(over) => {
                    self.apply(SessionEvent::GameEnded);
                    self.callbacks.game_over(&over);
                }
                GameplayMsg::ShotAim(data) => self.callbacks.shot_aim(&sender_id, &data.cue_state),
                GameplayMsg::ShotResult(_) | GameplayMsg::ShotExecute(_) => {}
            },
            Payload::Chat(chat) => self.callbacks.chat(&sender_id, &chat.text),
            Payload::Error(err) => {
                debug!(code = ?err.code, message = %err.message, "Server error");
                self.callbacks.error(&ClientError::Server {
                    code: err.code,
                    message: err.message,
                });
            }
        }
    }

    fn handle_connect_reply(&mut self, data: ConnectData) {
        let Some(player_id) = data.player_id else {
            warn!("Connect reply without a player id");
            return;
        };
        self.player_id = Some(player_id.clone());
        // Every connection gets a fresh key; the previous one is spent
        self.resume_key = data.resume_key;

        if data.resumed {
            if self.machine.state() == SessionState::Connecting {
                self.apply(SessionEvent::Resumed);
            }
            info!(player_id = %player_id, "Seat resumed");
        } else {
            if self.machine.state() != SessionState::Connecting {
                // Resume was refused; the server gave us a fresh session
                warn!(player_id = %player_id, "Seat lost, back in the lobby");
                self.machine = SessionStateMachine::new();
                self.room = None;
                self.view.reset();
            }
            self.apply(SessionEvent::Connected);
        }

        self.sync_resume();
        self.callbacks.connected(&player_id);
    }

    fn handle_room_update(&mut self, room: RoomInfo) {
        let me = self
            .player_id
            .as_deref()
            .and_then(|id| room.player(id))
            .map(|p| p.is_ready);

        if let Some(is_ready) = me {
            match self.machine.state() {
                SessionState::Lobby => {
                    self.room = Some(room.clone());
                    self.apply(SessionEvent::EnteredRoom);
                    if is_ready {
                        self.apply(SessionEvent::ReadyChanged(true));
                    }
                }
                SessionState::InRoom if is_ready => self.apply(SessionEvent::ReadyChanged(true)),
                SessionState::ReadyWait if !is_ready => {
                    self.apply(SessionEvent::ReadyChanged(false))
                }
                _ => {}
            }
        }

        let room = self.room.insert(room);
        self.callbacks.room_update(room);
    }

    fn handle_game_start(&mut self, data: GameStartData) {
        if let Some(room) = data.room {
            self.room = Some(room);
        }
        if self.machine.state() == SessionState::InRoom {
            self.apply(SessionEvent::ReadyChanged(true));
        }
        self.apply(SessionEvent::GameStarted);
        if let Some(state) = data.game_state {
            self.view.apply_snapshot(state);
        }

        if let (Some(room), Some(state)) = (self.room.as_ref(), self.view.snapshot()) {
            self.callbacks.game_start(room, state);
        }
    }
}

impl std::fmt::Debug for MultiplayerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplayerClient")
            .field("state", &self.machine.state())
            .field("player_id", &self.player_id)
            .field("room", &self.room.as_ref().map(|r| &r.room_id))
            .finish_non_exhaustive()
    }
}
