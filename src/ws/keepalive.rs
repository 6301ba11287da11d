//! Ping/pong liveness tracking shared by server connections and the client

use std::time::Duration;

/// Default ping period
pub const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Unanswered pings tolerated before the peer is declared dead
pub const MAX_MISSED_PONGS: u32 = 3;
/// Shortest ping period accepted
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// What the owner should do on a keepalive tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Send a ping carrying this sequence number
    SendPing(u64),
    /// Peer missed too many pongs; tear the connection down
    TimedOut,
    /// Already timed out or stopped; nothing to do
    Idle,
}

/// Counts unanswered pings. Timeout is latched: it is reported once.
#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    max_missed: u32,
    outstanding: u32,
    next_seq: u64,
    /// Highest sequence number answered so far
    acked: u64,
    timed_out: bool,
    stopped: bool,
}

impl Keepalive {
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            max_missed: max_missed.max(1),
            outstanding: 0,
            next_seq: 0,
            acked: 0,
            timed_out: false,
            stopped: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call once per interval
    pub fn on_tick(&mut self) -> KeepaliveAction {
        if self.timed_out || self.stopped {
            return KeepaliveAction::Idle;
        }
        if self.outstanding >= self.max_missed {
            self.timed_out = true;
            return KeepaliveAction::TimedOut;
        }
        self.outstanding += 1;
        self.next_seq += 1;
        KeepaliveAction::SendPing(self.next_seq)
    }

    /// A pong answers its own ping and every earlier one; later pings stay
    /// outstanding. Stale or unknown sequence numbers are ignored.
    pub fn on_pong(&mut self, seq: u64) -> bool {
        if self.timed_out || seq <= self.acked || seq > self.next_seq {
            return false;
        }
        self.acked = seq;
        self.outstanding = u32::try_from(self.next_seq - seq).unwrap_or(u32::MAX);
        true
    }

    /// Stop pinging without reporting a timeout (orderly shutdown)
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Start over after a reconnect
    pub fn reset(&mut self) {
        self.outstanding = 0;
        self.acked = self.next_seq;
        self.timed_out = false;
        self.stopped = false;
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::new(PING_INTERVAL, MAX_MISSED_PONGS)
    }
}
