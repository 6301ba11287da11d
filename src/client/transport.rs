//! Client connection task: one WebSocket, keepalive, and mid-game resume

use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::ws::codec;
use crate::ws::keepalive::{Keepalive, KeepaliveAction};
use crate::ws::protocol::{ConnectData, ConnectionMsg, Message, Payload, PingData, ResumeToken};
use crate::ws::ConnectionError;

/// Upper bound on a single connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the connection task reports to the client
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded server message (keepalive traffic excluded)
    Message(Message),
    /// The link dropped mid-game; attempt `attempt` starts after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// A terminal connection failure
    Error(ConnectionError),
    /// The task has stopped; no further events follow
    Closed,
}

/// Why one socket's session ended
enum Exit {
    /// The owning client dropped its handle
    LocalClose,
    /// The server said goodbye; never resumed
    Goodbye,
    Failed(ConnectionError),
}

/// Owning side of a client connection. Dropping it closes the connection
/// after queued messages are flushed and stops any pending reconnect.
pub struct Transport {
    outbound: mpsc::UnboundedSender<Message>,
    resume: watch::Sender<Option<ResumeToken>>,
    task: JoinHandle<()>,
}

impl Transport {
    /// Dial `url` on `runtime`; `hello` is sent first on every socket
    pub fn spawn(
        runtime: &Handle,
        url: String,
        hello: ConnectData,
        config: ClientConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (resume, resume_rx) = watch::channel(None);
        let task = runtime.spawn(run(url, hello, config, outbound_rx, resume_rx, events));
        Self {
            outbound,
            resume,
            task,
        }
    }

    pub fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound.send(msg).map_err(|_| ConnectionError::Closed)
    }

    /// Seat to reclaim if the link drops; `None` disables reconnection
    pub fn set_resume(&self, token: Option<ResumeToken>) {
        self.resume.send_replace(token);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop immediately without flushing
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run(
    url: String,
    hello: ConnectData,
    config: ClientConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    resume_rx: watch::Receiver<Option<ResumeToken>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut keepalive = Keepalive::new(config.ping_interval, config.max_missed_pongs);
    let mut pending: VecDeque<Message> = VecDeque::new();

    let mut socket = match open(&url).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(url = %url, error = %e, "Connection failed");
            finish(&events, Some(e));
            return;
        }
    };
    info!(url = %url, "Connected to server");
    pending.push_front(Message::new(String::new(), hello.clone()));

    loop {
        let exit = drive(socket, &mut outbound_rx, &mut keepalive, &mut pending, &events).await;
        let error = match exit {
            Exit::LocalClose => {
                debug!("Connection closed by client");
                finish(&events, None);
                return;
            }
            Exit::Goodbye => {
                info!("Server ended the session");
                finish(&events, None);
                return;
            }
            Exit::Failed(e) => e,
        };

        let token = resume_rx.borrow().clone();
        let Some(token) = token else {
            warn!(error = %error, "Connection lost");
            finish(&events, Some(error));
            return;
        };

        warn!(error = %error, room_id = %token.room_id, "Connection lost mid-game, reconnecting");
        socket = match reconnect(&url, &config, &mut outbound_rx, &mut pending, &events).await {
            Ok(socket) => socket,
            Err(Exit::Failed(e)) => {
                warn!(error = %e, "Giving up on reconnection");
                finish(&events, Some(e));
                return;
            }
            Err(_) => {
                finish(&events, None);
                return;
            }
        };
        info!(player_id = %token.player_id, "Reconnected, resuming seat");

        // Anything queued while offline goes out after the resume handshake
        let resume_hello = ConnectData {
            resume: Some(token.clone()),
            ..hello.clone()
        };
        pending.push_front(Message::new(token.player_id, resume_hello));
    }
}

fn finish(events: &mpsc::UnboundedSender<TransportEvent>, error: Option<ConnectionError>) {
    if let Some(e) = error {
        let _ = events.send(TransportEvent::Error(e));
    }
    let _ = events.send(TransportEvent::Closed);
}

async fn open(url: &str) -> Result<WsStream, ConnectionError> {
    match timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Err(_) => Err(ConnectionError::Timeout),
        Ok(Err(tungstenite::Error::Io(e))) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(ConnectionError::Refused(e.to_string()))
        }
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Ok(Ok((socket, _response))) => Ok(socket),
    }
}

/// Back off and redial until the policy is exhausted. Outbound messages
/// arriving meanwhile are kept for the next socket.
async fn reconnect(
    url: &str,
    config: &ClientConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
    pending: &mut VecDeque<Message>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<WsStream, Exit> {
    let mut last_error = ConnectionError::Closed;
    let mut attempt = 1;

    while let Some(delay) = config.reconnect.jittered_delay(attempt) {
        let _ = events.send(TransportEvent::Reconnecting { attempt, delay });

        let wake = tokio::time::sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => break,
                msg = outbound_rx.recv() => match msg {
                    Some(msg) => pending.push_back(msg),
                    None => return Err(Exit::LocalClose),
                },
            }
        }

        match open(url).await {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!(attempt, error = %e, "Reconnect attempt failed");
                last_error = e;
            }
        }
        attempt += 1;
    }

    Err(Exit::Failed(last_error))
}

/// Pump one socket until it ends
async fn drive(
    socket: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
    keepalive: &mut Keepalive,
    pending: &mut VecDeque<Message>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Exit {
    let (mut sink, mut stream) = socket.split();
    keepalive.reset();

    while let Some(msg) = pending.pop_front() {
        if let Err(e) = send_msg(&mut sink, &msg).await {
            pending.push_front(msg);
            return Exit::Failed(e);
        }
    }

    let period = keepalive.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let decoded = match inbound {
                    Some(Ok(WsMessage::Text(text))) => codec::decode_text(&text),
                    Some(Ok(WsMessage::Binary(bytes))) => codec::decode(&bytes),
                    Some(Ok(WsMessage::Close(_))) | None => return Exit::Failed(ConnectionError::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Exit::Failed(ConnectionError::Transport(e.to_string())),
                };
                let msg = match decoded {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable server message");
                        continue;
                    }
                };

                if let Payload::Connection(ConnectionMsg::Ping(ping)) = msg.payload {
                    let pong = Message::new(String::new(), ConnectionMsg::Pong(ping));
                    if let Err(e) = send_msg(&mut sink, &pong).await {
                        return Exit::Failed(e);
                    }
                    continue;
                }
                if let Payload::Connection(ConnectionMsg::Pong(pong)) = msg.payload {
                    keepalive.on_pong(pong.seq);
                    continue;
                }

                let goodbye = matches!(msg.payload, Payload::Connection(ConnectionMsg::Disconnect(_)));
                let _ = events.send(TransportEvent::Message(msg));
                if goodbye {
                    let _ = sink.close().await;
                    return Exit::Goodbye;
                }
            }
            outbound = outbound_rx.recv() => match outbound {
                Some(msg) => {
                    if let Err(e) = send_msg(&mut sink, &msg).await {
                        pending.push_front(msg);
                        return Exit::Failed(e);
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return Exit::LocalClose;
                }
            },
            _ = ticker.tick() => match keepalive.on_tick() {
                KeepaliveAction::SendPing(seq) => {
                    let ping = Message::new(String::new(), ConnectionMsg::Ping(PingData { seq }));
                    if let Err(e) = send_msg(&mut sink, &ping).await {
                        return Exit::Failed(e);
                    }
                }
                KeepaliveAction::TimedOut => return Exit::Failed(ConnectionError::Timeout),
                KeepaliveAction::Idle => {}
            },
        }
    }
}

async fn send_msg<S>(sink: &mut S, msg: &Message) -> Result<(), ConnectionError>
where
    S: futures::Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
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

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::ws::protocol::ChatData;
    use crate::ws::reconnect::ReconnectPolicy;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn recv(socket: &mut ServerSocket) -> Message {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return codec::decode_text(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    }

    fn connect_data(msg: &Message) -> &ConnectData {
        match &msg.payload {
            Payload::Connection(ConnectionMsg::Connect(data)) => data,
            other => panic!("expected connect, got {other:?}"),
        }
    }

    fn quick_retry() -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
                jitter: 0.0,
            },
            ..ClientConfig::default()
        }
    }

    fn token() -> ResumeToken {
        ResumeToken {
            player_id: "a".into(),
            room_id: "r1".into(),
            key: "k3y".into(),
        }
    }

    fn hello() -> ConnectData {
        ConnectData::hello("Alice")
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_refused_connection_reports_once_then_closes() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                ..ReconnectPolicy::default()
            },
            ..ClientConfig::default()
        };
        let transport = Transport::spawn(
            &Handle::current(),
            format!("ws://{addr}/ws"),
            hello(),
            config,
            tx,
        );

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Closed));
        assert!(rx.recv().await.is_none());
        assert!(transport.send(Message::new("", hello())).is_err());
    }

    #[tokio::test]
    async fn test_mid_game_drop_resumes_and_keeps_queued_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Transport::spawn(
            &Handle::current(),
            format!("ws://{addr}/ws"),
            hello(),
            quick_retry(),
            tx,
        );
        transport.set_resume(Some(token()));

        let mut first = accept(&listener).await;
        assert!(connect_data(&recv(&mut first).await).resume.is_none());
        drop(first);

        match next_event(&mut rx).await {
            TransportEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(20));
            }
            other => panic!("expected reconnecting, got {other:?}"),
        }
        transport
            .send(Message::new("a", ChatData { text: "still here".into() }))
            .unwrap();

        let mut second = accept(&listener).await;
        let resume = recv(&mut second).await;
        assert_eq!(resume.sender_id, "a");
        assert_eq!(connect_data(&resume).resume, Some(token()));
        let queued = recv(&mut second).await;
        assert_eq!(
            queued.payload,
            Payload::Chat(ChatData { text: "still here".into() })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lobby_drop_is_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = Transport::spawn(
            &Handle::current(),
            format!("ws://{addr}/ws"),
            hello(),
            quick_retry(),
            tx,
        );

        let mut socket = accept(&listener).await;
        recv(&mut socket).await;
        drop(socket);

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Closed));
        assert!(rx.recv().await.is_none());
        assert!(
            tokio::time::timeout(Duration::from_millis(300), listener.accept())
                .await
                .is_err(),
            "no redial without a resume token"
        );
    }
}
