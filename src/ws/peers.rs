//! Routing table from player ids to their connection's outbound queue

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::protocol::Message;

/// Sending half of a connection's FIFO outbound queue
pub type Outbound = mpsc::UnboundedSender<Message>;

#[derive(Clone)]
struct PeerHandle {
    connection_id: Uuid,
    tx: Outbound,
}

/// Live connections by player id
#[derive(Default)]
pub struct PeerDirectory {
    peers: DashMap<String, PeerHandle>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `player_id` to this connection, replacing any previous one
    pub fn register(&self, player_id: &str, connection_id: Uuid, tx: Outbound) {
        self.peers
            .insert(player_id.to_string(), PeerHandle { connection_id, tx });
    }

    /// Remove the route if it still belongs to `connection_id`.
    /// A resumed session may already have replaced it.
    pub fn unregister(&self, player_id: &str, connection_id: Uuid) -> bool {
        self.peers
            .remove_if(player_id, |_, h| h.connection_id == connection_id)
            .is_some()
    }

    pub fn is_online(&self, player_id: &str) -> bool {
        self.peers.contains_key(player_id)
    }

    /// Queue a message for one player. Returns false if they are offline.
    pub fn send(&self, player_id: &str, msg: Message) -> bool {
        let Some(tx) = self.peers.get(player_id).map(|h| h.tx.clone()) else {
            trace!(player_id = %player_id, msg_type = %msg.msg_type(), "Dropping message for offline player");
            return false;
        };
        tx.send(msg).is_ok()
    }

    /// Queue a message for every listed player
    pub fn broadcast<'a>(&self, recipients: impl IntoIterator<Item = &'a str>, msg: &Message) {
        for player_id in recipients {
            self.send(player_id, msg.clone());
        }
    }

    /// Queue a message for every listed player but one
    pub fn broadcast_except<'a>(
        &self,
        recipients: impl IntoIterator<Item = &'a str>,
        except: &str,
        msg: &Message,
    ) {
        self.broadcast(recipients.into_iter().filter(|id| *id != except), msg);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
