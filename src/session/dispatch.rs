//! Routes one connection's inbound messages by protocol state

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::state::CueState;
use crate::game::sync::GameStateSynchronizer;
use crate::game::turn::TurnError;
use crate::lobby::{Departure, Room, RoomError};
use crate::ws::peers::Outbound;
use crate::ws::protocol::{
    ChatData, ConnectData, ConnectionMsg, CreateRoomData, DisconnectData, ErrorCode, GameplayMsg,
    JoinRoomData, LeaveRoomData, LobbyMsg, Message, MessageType, Payload, PingData,
    PlayerReadyData, ResumeToken, RoomListData, RoomUpdateData,
};

use super::state::{SessionEvent, SessionState, SessionStateMachine};
use super::timers::{arm_seat_reclaim, arm_turn_clock};

/// Name used when a client connects without one
const DEFAULT_PLAYER_NAME: &str = "Player";
/// Longest chat line relayed
const MAX_CHAT_LEN: usize = 500;
/// Length of the secret that reclaims a held seat
const RESUME_KEY_LEN: usize = 32;

fn new_resume_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESUME_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Whether the connection should stay up after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Tell every member of `room` about its current membership
pub(crate) fn broadcast_room_update(app: &AppState, room: &Room) {
    let update = Message::from_server(RoomUpdateData {
        room: room.info().clone(),
    });
    app.peers.broadcast(room.member_ids(), &update);
}

/// Fan out the consequences of a departure. Runs under the room lock.
pub(crate) fn announce_departure(app: &AppState, room: &mut Room, departure: &Departure) {
    if departure.room_closed {
        return;
    }
    broadcast_room_update(app, room);

    let removal = &departure.removal;
    if let Some(game) = room.game() {
        GameStateSynchronizer::new(&app.peers).publish_removal(room.info(), game, removal);
    }
    if removal.game_over.is_some() {
        room.timers.cancel_turn_clock();
    } else if removal.turn_change.is_some() {
        arm_turn_clock(app, room);
    }
}

/// Server-side session for one connection
pub struct PeerSession {
    app: AppState,
    connection_id: Uuid,
    outbound: Outbound,
    machine: SessionStateMachine,
    player_id: Option<String>,
    name: String,
    room_id: Option<String>,
    /// Issued in the connect reply; reclaims this player's seat after a drop
    resume_key: String,
    violations: u32,
}

impl PeerSession {
    pub fn new(app: AppState, connection_id: Uuid, outbound: Outbound) -> Self {
        Self {
            app,
            connection_id,
            outbound,
            machine: SessionStateMachine::new(),
            player_id: None,
            name: DEFAULT_PLAYER_NAME.to_string(),
            room_id: None,
            resume_key: new_resume_key(),
            violations: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    fn reply(&self, msg: Message) {
        if self.outbound.send(msg).is_err() {
            debug!(connection_id = %self.connection_id, "Reply dropped, connection closing");
        }
    }

    fn reply_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.reply(Message::error(code, message));
    }

    /// Count a protocol violation; too many closes the connection
    pub fn violation(&mut self, code: ErrorCode, message: impl Into<String>) -> Flow {
        self.violations += 1;
        let message = message.into();
        warn!(
            connection_id = %self.connection_id,
            player_id = ?self.player_id,
            violations = self.violations,
            code = ?code,
            "Protocol violation: {}",
            message
        );
        self.reply_error(code, message);

        if self.violations > self.app.config.max_protocol_violations {
            self.reply(Message::from_server(DisconnectData {
                reason: Some("too many protocol violations".to_string()),
            }));
            return Flow::Close;
        }
        Flow::Continue
    }

    /// Handle one decoded inbound message
    pub fn handle(&mut self, msg: Message) -> Flow {
        let msg_type = msg.msg_type();
        if !self.machine.accepts(msg_type) {
            return self.violation(
                ErrorCode::InvalidState,
                format!("{} not allowed while {:?}", msg_type, self.machine.state()),
            );
        }

        match msg.payload {
            Payload::Connection(msg) => match msg {
                ConnectionMsg::Connect(data) => self.on_connect(data),
                ConnectionMsg::Disconnect(data) => {
                    info!(player_id = ?self.player_id, reason = ?data.reason, "Client said goodbye");
                    return Flow::Close;
                }
                ConnectionMsg::Ping(ping) => {
                    self.reply(Message::from_server(ConnectionMsg::Pong(ping)));
                }
                // Keepalive bookkeeping happens in the connection task
                ConnectionMsg::Pong(_) => {}
            },
            Payload::Lobby(msg) => match msg {
                LobbyMsg::CreateRoom(data) => self.on_create_room(data),
                LobbyMsg::JoinRoom(data) => self.on_join_room(data),
                LobbyMsg::LeaveRoom(_) => self.on_leave_room(),
                LobbyMsg::RoomList(_) => self.on_room_list(),
                LobbyMsg::PlayerReady(data) => self.on_player_ready(data),
                LobbyMsg::GameStart(_) => self.on_game_start(),
                LobbyMsg::RoomUpdate(_) => return self.server_only(msg_type),
            },
            Payload::Gameplay(msg) => match msg {
                GameplayMsg::ShotAim(data) => self.on_shot_aim(&data.cue_state),
                GameplayMsg::ShotExecute(data) => self.on_shot_execute(&data.cue_state),
                GameplayMsg::ShotResult(_)
                | GameplayMsg::GameState(_)
                | GameplayMsg::TurnChange(_)
                | GameplayMsg::GameOver(_) => return self.server_only(msg_type),
            },
            Payload::Chat(chat) => self.on_chat(chat),
            Payload::Error(_) => return self.server_only(msg_type),
        }
        Flow::Continue
    }

    fn server_only(&mut self, msg_type: MessageType) -> Flow {
        self.violation(
            ErrorCode::InvalidState,
            format!("{msg_type} is sent by the server only"),
        )
    }

    /// Advance the machine on room-wide events this connection is about to
    /// deliver to its client
    pub fn observe_outbound(&mut self, msg: &Message) {
        let event = match msg.msg_type() {
            MessageType::GameStart => SessionEvent::GameStarted,
            MessageType::GameOver => SessionEvent::GameEnded,
            _ => return,
        };
        if let Err(e) = self.machine.apply(event) {
            debug!(player_id = ?self.player_id, error = %e, "Ignoring room event");
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        if let Err(e) = self.machine.apply(event) {
            warn!(player_id = ?self.player_id, error = %e, "Unexpected session transition");
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    fn on_connect(&mut self, data: ConnectData) {
        let name = data.name.trim();
        self.name = if name.is_empty() {
            DEFAULT_PLAYER_NAME.to_string()
        } else {
            name.to_string()
        };

        if let Some(token) = data.resume {
            if self.try_resume(&token) {
                return;
            }
            self.reply_error(ErrorCode::ResumeRejected, "Seat is no longer held");
        }

        let player_id = Uuid::new_v4().to_string();
        self.app
            .peers
            .register(&player_id, self.connection_id, self.outbound.clone());
        self.apply(SessionEvent::Connected);
        info!(player_id = %player_id, name = %self.name, "Player connected");

        self.reply(Message::from_server(ConnectData {
            player_id: Some(player_id.clone()),
            resume_key: Some(self.resume_key.clone()),
            ..ConnectData::hello(self.name.clone())
        }));
        self.player_id = Some(player_id);
    }

    /// Reclaim a seat held for a dropped player
    fn try_resume(&mut self, token: &ResumeToken) -> bool {
        let app = self.app.clone();
        let connection_id = self.connection_id;
        let outbound = self.outbound.clone();
        let reply = ConnectData {
            player_id: Some(token.player_id.clone()),
            resumed: true,
            resume_key: Some(self.resume_key.clone()),
            ..ConnectData::hello(self.name.clone())
        };

        let resumed = app.rooms.with_room(&token.room_id, |room| {
            if !room.in_play() || !room.resume_seat(&token.player_id, &token.key) {
                return false;
            }
            room.timers.cancel_reclaim(&token.player_id);
            app.peers.register(&token.player_id, connection_id, outbound.clone());

            let _ = outbound.send(Message::from_server(reply));
            broadcast_room_update(&app, room);
            if let Some(game) = room.game() {
                GameStateSynchronizer::new(&app.peers).send_snapshot(&token.player_id, game);
            }
            true
        });

        if resumed != Ok(true) {
            return false;
        }
        self.apply(SessionEvent::Resumed);
        self.player_id = Some(token.player_id.clone());
        self.room_id = Some(token.room_id.clone());
        info!(player_id = %token.player_id, room_id = %token.room_id, "Player resumed seat");
        true
    }

    /// Release everything this connection holds. Mid-game drops keep the
    /// seat for the reconnect grace period; anything else leaves the room.
    pub fn on_transport_closed(&mut self, graceful: bool) {
        let Some(player_id) = self.player_id.clone() else {
            self.apply(SessionEvent::Disconnected);
            return;
        };

        if let Some(room_id) = self.room_id.take() {
            let hold_seat = !graceful && self.machine.state() == SessionState::InGame;
            if hold_seat {
                self.hold_seat(&room_id, &player_id);
            } else {
                let app = self.app.clone();
                let result = app.rooms.leave_room_with(&room_id, &player_id, |room, departure| {
                    announce_departure(&app, room, departure);
                });
                if let Err(e) = result {
                    debug!(player_id = %player_id, room_id = %room_id, error = %e, "Leave on disconnect skipped");
                }
            }
        }

        self.app.peers.unregister(&player_id, self.connection_id);
        if !self.machine.is_terminal() {
            self.apply(SessionEvent::Disconnected);
        }
        info!(player_id = %player_id, graceful, "Player disconnected");
    }

    fn hold_seat(&self, room_id: &str, player_id: &str) {
        let app = self.app.clone();
        let grace = app.config.reconnect_grace;
        let held = app.rooms.with_room(room_id, |room| {
            if !room.in_play() || room.hold_seat(player_id, &self.resume_key).is_err() {
                return false;
            }
            broadcast_room_update(&app, room);
            arm_seat_reclaim(&app, room, player_id, grace);
            true
        });

        if held == Ok(true) {
            info!(player_id = %player_id, room_id = %room_id, grace_secs = grace.as_secs(), "Holding seat");
            return;
        }
        // Game ended in the meantime: plain leave
        let result = app.rooms.leave_room_with(room_id, player_id, |room, departure| {
            announce_departure(&app, room, departure);
        });
        if let Err(e) = result {
            debug!(player_id = %player_id, room_id = %room_id, error = %e, "Leave after finished game skipped");
        }
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    fn on_room_list(&self) {
        self.reply(Message::from_server(RoomListData {
            rooms: self.app.rooms.list_rooms(),
        }));
    }

    fn on_create_room(&mut self, data: CreateRoomData) {
        let Some(player_id) = self.player_id.clone() else {
            return;
        };
        let app = self.app.clone();
        let room_name = match data.name.trim() {
            "" => format!("{}'s table", self.name),
            name => name.to_string(),
        };

        let result = app.rooms.create_room_with(
            &player_id,
            &self.name,
            &room_name,
            data.game_type,
            data.max_players,
            |room| broadcast_room_update(&app, room),
        );
        match result {
            Ok(info) => {
                self.room_id = Some(info.room_id);
                self.apply(SessionEvent::EnteredRoom);
            }
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    fn on_join_room(&mut self, data: JoinRoomData) {
        let Some(player_id) = self.player_id.clone() else {
            return;
        };
        let app = self.app.clone();

        let result = app
            .rooms
            .join_room_with(&data.room_id, &player_id, &self.name, |room| {
                broadcast_room_update(&app, room)
            });
        match result {
            Ok(info) => {
                self.room_id = Some(info.room_id);
                self.apply(SessionEvent::EnteredRoom);
            }
            Err(e) => {
                debug!(player_id = %player_id, room_id = %data.room_id, error = %e, "Join rejected");
                self.reply_error(e.code(), e.to_string());
            }
        }
    }

    fn on_leave_room(&mut self) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            self.reply_error(ErrorCode::NotInRoom, RoomError::NotInRoom.to_string());
            return;
        };
        let app = self.app.clone();

        let result = app.rooms.leave_room_with(&room_id, &player_id, |room, departure| {
            announce_departure(&app, room, departure);
        });
        match result {
            Ok(_) | Err(RoomError::RoomNotFound) | Err(RoomError::NotInRoom) => {
                self.room_id = None;
                self.apply(SessionEvent::LeftRoom);
                self.reply(Message::from_server(LeaveRoomData {}));
            }
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    fn on_player_ready(&mut self, data: PlayerReadyData) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            return;
        };
        let app = self.app.clone();

        let result = app.rooms.with_room(&room_id, |room| {
            room.set_ready(&player_id, data.is_ready)?;
            broadcast_room_update(&app, room);
            if room.all_ready() {
                start_game(&app, room)?;
            }
            Ok::<_, RoomError>(())
        });
        match result.and_then(|r| r) {
            Ok(()) => self.apply(SessionEvent::ReadyChanged(data.is_ready)),
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    fn on_game_start(&mut self) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            return;
        };
        let app = self.app.clone();

        let result = app.rooms.with_room(&room_id, |room| {
            if room.info().host_id != player_id {
                return Err(RoomError::NotHost);
            }
            start_game(&app, room)
        });
        if let Err(e) = result.and_then(|r| r) {
            self.reply_error(e.code(), e.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Gameplay
    // ------------------------------------------------------------------

    fn on_shot_aim(&mut self, cue: &CueState) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            return;
        };
        let app = self.app.clone();

        let result = app.rooms.with_room(&room_id, |room| {
            let current = room
                .game()
                .filter(|g| !g.is_game_over)
                .map(|g| g.current_player_id.clone());
            match current {
                Some(current) if current == player_id => {
                    GameStateSynchronizer::new(&app.peers).relay_aim(room.info(), &player_id, cue);
                    Ok(())
                }
                Some(_) => Err(ErrorCode::OutOfTurn),
                None => Err(ErrorCode::NoActiveGame),
            }
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(code)) => self.reply_error(code, "Cannot aim now"),
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    fn on_shot_execute(&mut self, cue: &CueState) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            return;
        };
        let app = self.app.clone();

        let result = app.rooms.with_room(&room_id, |room| {
            let report = room.execute_shot(&player_id, cue, app.simulator.as_ref())?;
            if let Some(game) = room.game() {
                GameStateSynchronizer::new(&app.peers).publish_shot(room.info(), game, &report);
            }
            if report.game_over.is_some() {
                room.timers.cancel_turn_clock();
                info!(room_id = %room.id(), winner = ?report.game_over.as_ref().and_then(|g| g.winner_id.as_ref()), "Game over");
            } else if report.turn_change.is_some() {
                arm_turn_clock(&app, room);
            }
            Ok::<_, TurnError>(())
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(player_id = %player_id, error = %e, "Shot rejected");
                self.reply_error(e.code(), e.to_string());
            }
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    fn on_chat(&mut self, chat: ChatData) {
        let (Some(player_id), Some(room_id)) = (self.player_id.clone(), self.room_id.clone()) else {
            return;
        };
        let text: String = chat.text.trim().chars().take(MAX_CHAT_LEN).collect();
        if text.is_empty() {
            return;
        }
        let app = self.app.clone();
        let msg = Message::new(player_id, ChatData { text });

        if let Err(e) = app
            .rooms
            .with_room(&room_id, |room| app.peers.broadcast(room.member_ids(), &msg))
        {
            self.reply_error(e.code(), e.to_string());
        }
    }
}

/// Rack the table and announce the game. Runs under the room lock.
fn start_game(app: &AppState, room: &mut Room) -> Result<(), RoomError> {
    room.start_game()?;
    if let Some(game) = room.game() {
        info!(room_id = %room.id(), players = room.info().player_count(), "Game started");
        GameStateSynchronizer::new(&app.peers).publish_start(room.info(), game);
    }
    arm_turn_clock(app, room);
    Ok(())
}

/// Keepalive ping the connection task sends
pub fn ping(seq: u64) -> Message {
    Message::from_server(ConnectionMsg::Ping(PingData { seq }))
}
