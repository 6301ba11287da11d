//! WebSocket upgrade handler and per-connection task

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::session::dispatch::{ping, Flow, PeerSession};
use crate::util::rate_limit::PeerRateLimiter;

use super::codec::{self, DecodeError};
use super::keepalive::{Keepalive, KeepaliveAction};
use super::protocol::{ConnectionMsg, ErrorCode, Message, Payload};
use super::ConnectionError;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Why the connection task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Client said goodbye or was kicked; the seat is released
    Graceful,
    /// Transport went away; a mid-game seat is held
    Dropped,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let mut session = PeerSession::new(state.clone(), connection_id, outbound_tx);
    let mut keepalive = Keepalive::new(state.config.ping_interval, state.config.max_missed_pongs);
    let rate_limiter = PeerRateLimiter::new(state.config.message_rate_limit);

    let period = keepalive.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            inbound = ws_stream.next() => {
                let decoded = match inbound {
                    Some(Ok(WsMessage::Text(text))) => codec::decode_text(&text),
                    Some(Ok(WsMessage::Binary(bytes))) => codec::decode(&bytes),
                    // Transport-level ping/pong is answered by the websocket layer
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(connection_id = %connection_id, "Client closed transport");
                        break Exit::Dropped;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break Exit::Dropped;
                    }
                };

                if !rate_limiter.check_message() {
                    if session.violation(ErrorCode::RateLimited, "Too many messages") == Flow::Close {
                        break Exit::Graceful;
                    }
                    continue;
                }

                if route_inbound(&mut session, &mut keepalive, decoded) == Flow::Close {
                    break Exit::Graceful;
                }
            }
            Some(msg) = outbound_rx.recv() => {
                session.observe_outbound(&msg);
                if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                    debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                    break Exit::Dropped;
                }
            }
            _ = ticker.tick() => {
                match keepalive.on_tick() {
                    KeepaliveAction::SendPing(seq) => {
                        if let Err(e) = send_msg(&mut ws_sink, &ping(seq)).await {
                            debug!(connection_id = %connection_id, error = %e, "Ping failed");
                            break Exit::Dropped;
                        }
                    }
                    KeepaliveAction::TimedOut => {
                        warn!(
                            connection_id = %connection_id,
                            player_id = ?session.player_id(),
                            error = %ConnectionError::Timeout,
                            "Keepalive expired"
                        );
                        break Exit::Dropped;
                    }
                    KeepaliveAction::Idle => {}
                }
            }
        }
    };
    keepalive.stop();

    // Deliver whatever is already queued (errors, the final disconnect)
    while let Ok(msg) = outbound_rx.try_recv() {
        if send_msg(&mut ws_sink, &msg).await.is_err() {
            break;
        }
    }
    let _ = ws_sink.close().await;

    session.on_transport_closed(exit == Exit::Graceful);
    info!(connection_id = %connection_id, exit = ?exit, "WebSocket connection closed");
}

/// Feed one decoded frame to the session
fn route_inbound(
    session: &mut PeerSession,
    keepalive: &mut Keepalive,
    decoded: Result<Message, DecodeError>,
) -> Flow {
    match decoded {
        Ok(msg) => {
            if let Payload::Connection(ConnectionMsg::Pong(pong)) = &msg.payload {
                if !keepalive.on_pong(pong.seq) {
                    debug!(seq = pong.seq, "Pong for unknown ping");
                }
            }
            session.handle(msg)
        }
        Err(e) => {
            warn!(player_id = ?session.player_id(), error = %e, "Failed to decode client message");
            session.violation(ErrorCode::MalformedMessage, e.to_string())
        }
    }
}

/// Send a message over WebSocket. A message that cannot be encoded is
/// dropped; the connection stays up.
async fn send_msg(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    msg: &Message,
) -> Result<(), ConnectionError> {
    let json = match codec::encode_text(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(msg_type = %msg.msg_type(), error = %e, "Dropping unencodable message");
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(json))
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))
}
