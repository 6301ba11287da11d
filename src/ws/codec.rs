//! Wire codec: JSON envelope `{msg_type, sender_id, data, timestamp}`

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::protocol::{
    ConnectionMsg, GameplayMsg, LobbyMsg, Message, MessageType, Payload,
};

/// Decoding failures. The offending message is dropped; the connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {msg_type} payload: {source}")]
    InvalidPayload {
        msg_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// Encoding failures. Nothing is written for the message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Non-finite number in {0} message")]
    NonFinite(MessageType),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    msg_type: &'a str,
    sender_id: &'a str,
    data: Value,
    timestamp: f64,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    msg_type: String,
    sender_id: String,
    data: Value,
    timestamp: f64,
}

/// Serialize a message to its JSON text form
pub fn encode_text(msg: &Message) -> Result<String, EncodeError> {
    ensure_finite(msg)?;
    let envelope = EnvelopeOut {
        msg_type: msg.msg_type().as_str(),
        sender_id: &msg.sender_id,
        data: payload_to_value(&msg.payload)?,
        timestamp: msg.timestamp,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Serialize a message to bytes
pub fn encode(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    encode_text(msg).map(String::into_bytes)
}

/// JSON would write NaN and infinities as `null`, which no peer can decode
pub fn ensure_finite(msg: &Message) -> Result<(), EncodeError> {
    let finite = msg.timestamp.is_finite()
        && match &msg.payload {
            Payload::Gameplay(GameplayMsg::ShotAim(d)) => d.cue_state.is_finite(),
            Payload::Gameplay(GameplayMsg::ShotExecute(d)) => d.cue_state.is_finite(),
            Payload::Gameplay(GameplayMsg::ShotResult(d)) => d.cue_state.is_finite(),
            Payload::Gameplay(GameplayMsg::GameState(state)) => state.is_finite(),
            Payload::Lobby(LobbyMsg::GameStart(d)) => {
                d.game_state.as_ref().map_or(true, |s| s.is_finite())
            }
            _ => true,
        };
    if finite {
        Ok(())
    } else {
        Err(EncodeError::NonFinite(msg.msg_type()))
    }
}

/// Parse a message from bytes
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let envelope: EnvelopeIn = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
    from_envelope(envelope)
}

/// Parse a message from JSON text
pub fn decode_text(text: &str) -> Result<Message, DecodeError> {
    let envelope: EnvelopeIn = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    from_envelope(envelope)
}

fn from_envelope(envelope: EnvelopeIn) -> Result<Message, DecodeError> {
    let msg_type = MessageType::from_wire(&envelope.msg_type)
        .ok_or(DecodeError::UnknownType(envelope.msg_type))?;

    let payload = payload_from_value(msg_type, envelope.data)
        .map_err(|source| DecodeError::InvalidPayload { msg_type, source })?;

    Ok(Message {
        sender_id: envelope.sender_id,
        payload,
        timestamp: envelope.timestamp,
    })
}

fn payload_to_value(payload: &Payload) -> Result<Value, serde_json::Error> {
    match payload {
        Payload::Connection(msg) => match msg {
            ConnectionMsg::Connect(d) => serde_json::to_value(d),
            ConnectionMsg::Disconnect(d) => serde_json::to_value(d),
            ConnectionMsg::Ping(d) | ConnectionMsg::Pong(d) => serde_json::to_value(d),
        },
        Payload::Lobby(msg) => match msg {
            LobbyMsg::CreateRoom(d) => serde_json::to_value(d),
            LobbyMsg::JoinRoom(d) => serde_json::to_value(d),
            LobbyMsg::LeaveRoom(d) => serde_json::to_value(d),
            LobbyMsg::RoomList(d) => serde_json::to_value(d),
            LobbyMsg::RoomUpdate(d) => serde_json::to_value(d),
            LobbyMsg::PlayerReady(d) => serde_json::to_value(d),
            LobbyMsg::GameStart(d) => serde_json::to_value(d),
        },
        Payload::Gameplay(msg) => match msg {
            GameplayMsg::ShotAim(d) => serde_json::to_value(d),
            GameplayMsg::ShotExecute(d) => serde_json::to_value(d),
            GameplayMsg::ShotResult(d) => serde_json::to_value(d),
            GameplayMsg::GameState(d) => serde_json::to_value(d),
            GameplayMsg::TurnChange(d) => serde_json::to_value(d),
            GameplayMsg::GameOver(d) => serde_json::to_value(d),
        },
        Payload::Chat(d) => serde_json::to_value(d),
        Payload::Error(d) => serde_json::to_value(d),
    }
}

fn take<T: DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

fn payload_from_value(msg_type: MessageType, data: Value) -> Result<Payload, serde_json::Error> {
    // Payload-less messages may arrive with `data: null`
    let data = match data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    let payload = match msg_type {
        MessageType::Connect => ConnectionMsg::Connect(take(data)?).into(),
        MessageType::Disconnect => ConnectionMsg::Disconnect(take(data)?).into(),
        MessageType::Ping => ConnectionMsg::Ping(take(data)?).into(),
        MessageType::Pong => ConnectionMsg::Pong(take(data)?).into(),
        MessageType::CreateRoom => LobbyMsg::CreateRoom(take(data)?).into(),
        MessageType::JoinRoom => LobbyMsg::JoinRoom(take(data)?).into(),
        MessageType::LeaveRoom => LobbyMsg::LeaveRoom(take(data)?).into(),
        MessageType::RoomList => LobbyMsg::RoomList(take(data)?).into(),
        MessageType::RoomUpdate => LobbyMsg::RoomUpdate(take(data)?).into(),
        MessageType::PlayerReady => LobbyMsg::PlayerReady(take(data)?).into(),
        MessageType::GameStart => LobbyMsg::GameStart(take(data)?).into(),
        MessageType::ShotAim => GameplayMsg::ShotAim(take(data)?).into(),
        MessageType::ShotExecute => GameplayMsg::ShotExecute(take(data)?).into(),
        MessageType::ShotResult => GameplayMsg::ShotResult(take(data)?).into(),
        MessageType::GameState => GameplayMsg::GameState(take(data)?).into(),
        MessageType::TurnChange => GameplayMsg::TurnChange(take(data)?).into(),
        MessageType::GameOver => GameplayMsg::GameOver(take(data)?).into(),
        MessageType::ChatMessage => Payload::Chat(take(data)?),
        MessageType::Error => Payload::Error(take(data)?),
    };
    Ok(payload)
}
