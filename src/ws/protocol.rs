//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::state::{CueState, GameState};
use crate::util::time::unix_secs_f64;

/// Sender id stamped on server-originated messages
pub const SERVER_SENDER_ID: &str = "server";

/// Pool variants a room can be created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    #[serde(rename = "8ball")]
    EightBall,
    #[serde(rename = "9ball")]
    NineBall,
    #[serde(rename = "snooker")]
    Snooker,
}

impl Default for GameType {
    fn default() -> Self {
        Self::EightBall
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EightBall => "8ball",
            Self::NineBall => "9ball",
            Self::Snooker => "snooker",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "8ball" => Ok(Self::EightBall),
            "9ball" => Ok(Self::NineBall),
            "snooker" => Ok(Self::Snooker),
            other => Err(format!("unknown game type: {other}")),
        }
    }
}

/// Flat list of wire message types (the `msg_type` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Connection
    Connect,
    Disconnect,
    Ping,
    Pong,

    // Lobby
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    RoomList,
    RoomUpdate,
    PlayerReady,
    GameStart,

    // Gameplay
    ShotAim,
    ShotExecute,
    ShotResult,
    GameState,
    TurnChange,
    GameOver,

    // Chat
    ChatMessage,

    // Errors
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 19] = [
        Self::Connect,
        Self::Disconnect,
        Self::Ping,
        Self::Pong,
        Self::CreateRoom,
        Self::JoinRoom,
        Self::LeaveRoom,
        Self::RoomList,
        Self::RoomUpdate,
        Self::PlayerReady,
        Self::GameStart,
        Self::ShotAim,
        Self::ShotExecute,
        Self::ShotResult,
        Self::GameState,
        Self::TurnChange,
        Self::GameOver,
        Self::ChatMessage,
        Self::Error,
    ];

    /// Wire name of this type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::CreateRoom => "create_room",
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::RoomList => "room_list",
            Self::RoomUpdate => "room_update",
            Self::PlayerReady => "player_ready",
            Self::GameStart => "game_start",
            Self::ShotAim => "shot_aim",
            Self::ShotExecute => "shot_execute",
            Self::ShotResult => "shot_result",
            Self::GameState => "game_state",
            Self::TurnChange => "turn_change",
            Self::GameOver => "game_over",
            Self::ChatMessage => "chat_message",
            Self::Error => "error",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A message exchanged between server and clients
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender_id: String,
    pub payload: Payload,
    /// Unix seconds when the message was built
    pub timestamp: f64,
}

impl Message {
    /// Build a message stamped with the current time
    pub fn new(sender_id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            sender_id: sender_id.into(),
            payload: payload.into(),
            timestamp: unix_secs_f64(),
        }
    }

    /// Build a server-originated message
    pub fn from_server(payload: impl Into<Payload>) -> Self {
        Self::new(SERVER_SENDER_ID, payload)
    }

    /// Error reply with a stable code
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::from_server(ErrorData {
            code,
            message: message.into(),
        })
    }

    pub fn msg_type(&self) -> MessageType {
        self.payload.msg_type()
    }
}

/// Message payload, one sum type per category
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Connection(ConnectionMsg),
    Lobby(LobbyMsg),
    Gameplay(GameplayMsg),
    Chat(ChatData),
    Error(ErrorData),
}

impl Payload {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Payload::Connection(msg) => match msg {
                ConnectionMsg::Connect(_) => MessageType::Connect,
                ConnectionMsg::Disconnect(_) => MessageType::Disconnect,
                ConnectionMsg::Ping(_) => MessageType::Ping,
                ConnectionMsg::Pong(_) => MessageType::Pong,
            },
            Payload::Lobby(msg) => match msg {
                LobbyMsg::CreateRoom(_) => MessageType::CreateRoom,
                LobbyMsg::JoinRoom(_) => MessageType::JoinRoom,
                LobbyMsg::LeaveRoom(_) => MessageType::LeaveRoom,
                LobbyMsg::RoomList(_) => MessageType::RoomList,
                LobbyMsg::RoomUpdate(_) => MessageType::RoomUpdate,
                LobbyMsg::PlayerReady(_) => MessageType::PlayerReady,
                LobbyMsg::GameStart(_) => MessageType::GameStart,
            },
            Payload::Gameplay(msg) => match msg {
                GameplayMsg::ShotAim(_) => MessageType::ShotAim,
                GameplayMsg::ShotExecute(_) => MessageType::ShotExecute,
                GameplayMsg::ShotResult(_) => MessageType::ShotResult,
                GameplayMsg::GameState(_) => MessageType::GameState,
                GameplayMsg::TurnChange(_) => MessageType::TurnChange,
                GameplayMsg::GameOver(_) => MessageType::GameOver,
            },
            Payload::Chat(_) => MessageType::ChatMessage,
            Payload::Error(_) => MessageType::Error,
        }
    }
}

/// Connection lifecycle messages
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMsg {
    Connect(ConnectData),
    Disconnect(DisconnectData),
    Ping(PingData),
    Pong(PingData),
}

/// Lobby and room messages
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyMsg {
    CreateRoom(CreateRoomData),
    JoinRoom(JoinRoomData),
    LeaveRoom(LeaveRoomData),
    RoomList(RoomListData),
    RoomUpdate(RoomUpdateData),
    PlayerReady(PlayerReadyData),
    GameStart(GameStartData),
}

/// In-game messages
#[derive(Debug, Clone, PartialEq)]
pub enum GameplayMsg {
    ShotAim(ShotAimData),
    ShotExecute(ShotExecuteData),
    ShotResult(ShotResultData),
    GameState(GameState),
    TurnChange(TurnChangeData),
    GameOver(GameOverData),
}

macro_rules! impl_into_payload {
    ($($data:ty => $category:ident($inner:ident::$variant:ident);)*) => {
        $(
            impl From<$data> for Payload {
                fn from(data: $data) -> Self {
                    Payload::$category($inner::$variant(data))
                }
            }
        )*
    };
}

impl_into_payload! {
    ConnectData => Connection(ConnectionMsg::Connect);
    DisconnectData => Connection(ConnectionMsg::Disconnect);
    CreateRoomData => Lobby(LobbyMsg::CreateRoom);
    JoinRoomData => Lobby(LobbyMsg::JoinRoom);
    LeaveRoomData => Lobby(LobbyMsg::LeaveRoom);
    RoomListData => Lobby(LobbyMsg::RoomList);
    RoomUpdateData => Lobby(LobbyMsg::RoomUpdate);
    PlayerReadyData => Lobby(LobbyMsg::PlayerReady);
    GameStartData => Lobby(LobbyMsg::GameStart);
    ShotAimData => Gameplay(GameplayMsg::ShotAim);
    ShotExecuteData => Gameplay(GameplayMsg::ShotExecute);
    ShotResultData => Gameplay(GameplayMsg::ShotResult);
    GameState => Gameplay(GameplayMsg::GameState);
    TurnChangeData => Gameplay(GameplayMsg::TurnChange);
    GameOverData => Gameplay(GameplayMsg::GameOver);
}

impl From<ChatData> for Payload {
    fn from(data: ChatData) -> Self {
        Payload::Chat(data)
    }
}

impl From<ErrorData> for Payload {
    fn from(data: ErrorData) -> Self {
        Payload::Error(data)
    }
}

impl From<ConnectionMsg> for Payload {
    fn from(msg: ConnectionMsg) -> Self {
        Payload::Connection(msg)
    }
}

impl From<LobbyMsg> for Payload {
    fn from(msg: LobbyMsg) -> Self {
        Payload::Lobby(msg)
    }
}

impl From<GameplayMsg> for Payload {
    fn from(msg: GameplayMsg) -> Self {
        Payload::Gameplay(msg)
    }
}

// ============================================================================
// Payload data
// ============================================================================

/// Seat a reconnecting client asks to reclaim. `key` is the secret the
/// server issued on the connection that held the seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub player_id: String,
    pub room_id: String,
    pub key: String,
}

/// Handshake. Clients send their display name (and optionally a seat to
/// resume); the server answers with the assigned player id and the key
/// that reclaims the seat if this connection drops mid-game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectData {
    pub name: String,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub resume: Option<ResumeToken>,
    #[serde(default)]
    pub resumed: bool,
    #[serde(default)]
    pub resume_key: Option<String>,
}

impl ConnectData {
    /// Plain client hello
    pub fn hello(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            player_id: None,
            resume: None,
            resumed: false,
            resume_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DisconnectData {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Keepalive ping; the pong echoes the ping's sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingData {
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomData {
    pub name: String,
    pub game_type: GameType,
    #[serde(default)]
    pub max_players: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomData {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LeaveRoomData {}

/// Request (empty) or reply (listing) for open rooms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoomListData {
    #[serde(default)]
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUpdateData {
    pub room: RoomInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReadyData {
    pub is_ready: bool,
}

/// Host start request (empty) or server announcement (room + initial state)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GameStartData {
    #[serde(default)]
    pub room: Option<RoomInfo>,
    #[serde(default)]
    pub game_state: Option<GameState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotAimData {
    pub cue_state: CueState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotExecuteData {
    pub cue_state: CueState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotResultData {
    pub shooter_id: String,
    pub cue_state: CueState,
    /// Turn and shot counters after the shot was applied
    pub turn_number: u32,
    pub shot_number: u32,
    pub turn_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnChangeData {
    pub current_player_id: String,
    pub turn_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOverData {
    #[serde(default)]
    pub winner_id: Option<String>,
    pub score: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatData {
    pub text: String,
}

/// Stable error codes returned to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RoomFull,
    RoomNotFound,
    GameAlreadyStarted,
    AlreadyInRoom,
    NotInRoom,
    RoomLimitReached,
    NotHost,
    PlayersNotReady,
    OutOfTurn,
    NoActiveGame,
    GameFinished,
    InvalidState,
    MalformedMessage,
    RateLimited,
    ResumeRejected,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: String,
}

// ============================================================================
// Room descriptions
// ============================================================================

/// Information about a player seated in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: String,
    pub name: String,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default = "default_connected")]
    pub is_connected: bool,
}

fn default_connected() -> bool {
    true
}

impl PlayerInfo {
    pub fn new(player_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            name: name.into(),
            is_ready: false,
            is_host: false,
            is_connected: true,
        }
    }
}

/// Information about a game room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub room_name: String,
    pub host_id: String,
    /// Join order; doubles as turn order
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub game_type: GameType,
    #[serde(default)]
    pub is_started: bool,
}

impl RoomInfo {
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.players.iter().map(|p| p.player_id.clone()).collect()
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.clone(),
            room_name: self.room_name.clone(),
            player_count: self.players.len(),
            max_players: self.max_players,
            game_type: self.game_type,
        }
    }
}

/// Lobby listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub room_name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub game_type: GameType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_names_roundtrip() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_wire(t.as_str()), Some(t));
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(MessageType::from_wire("teleport"), None);
    }

    #[test]
    fn test_payload_type_matches_variant() {
        let msg = Message::from_server(ChatData { text: "gg".into() });
        assert_eq!(msg.msg_type(), MessageType::ChatMessage);
        assert_eq!(msg.sender_id, SERVER_SENDER_ID);

        let err = Message::error(ErrorCode::RoomFull, "room is full");
        assert_eq!(err.msg_type(), MessageType::Error);
    }

    #[test]
    fn test_game_type_wire_names() {
        assert_eq!(serde_json::to_string(&GameType::NineBall).unwrap(), "\"9ball\"");
        assert_eq!("snooker".parse::<GameType>().unwrap(), GameType::Snooker);
        assert!("10ball".parse::<GameType>().is_err());
    }

    #[test]
    fn test_error_codes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::OutOfTurn).unwrap();
        assert_eq!(json, "\"out_of_turn\"");
    }

    #[test]
    fn test_room_summary() {
        let room = RoomInfo {
            room_id: "r1".into(),
            room_name: "Friendly".into(),
            host_id: "a".into(),
            players: vec![PlayerInfo::new("a", "Alice")],
            max_players: 2,
            game_type: GameType::NineBall,
            is_started: false,
        };
        let summary = room.summary();
        assert_eq!(summary.player_count, 1);
        assert!(!room.is_full());
    }
}
