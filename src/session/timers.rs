//! Room timers: the optional shot clock and held-seat expiry

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::sync::GameStateSynchronizer;
use crate::lobby::Room;

use super::dispatch::announce_departure;

/// Background timers owned by one room. Dropping the room aborts them.
#[derive(Debug, Default)]
pub struct RoomTimers {
    turn_clock: Option<JoinHandle<()>>,
    reclaims: HashMap<String, JoinHandle<()>>,
}

impl RoomTimers {
    pub fn set_turn_clock(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.turn_clock.replace(handle) {
            old.abort();
        }
    }

    pub fn cancel_turn_clock(&mut self) {
        if let Some(old) = self.turn_clock.take() {
            old.abort();
        }
    }

    pub fn has_turn_clock(&self) -> bool {
        self.turn_clock.is_some()
    }

    pub fn set_reclaim(&mut self, player_id: &str, handle: JoinHandle<()>) {
        if let Some(old) = self.reclaims.insert(player_id.to_string(), handle) {
            old.abort();
        }
    }

    /// Returns whether a pending reclaim was cancelled
    pub fn cancel_reclaim(&mut self, player_id: &str) -> bool {
        match self.reclaims.remove(player_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending_reclaims(&self) -> usize {
        self.reclaims.len()
    }

    pub fn cancel_all(&mut self) {
        self.cancel_turn_clock();
        for (_, handle) in self.reclaims.drain() {
            handle.abort();
        }
    }
}

impl Drop for RoomTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn spawn_timer<F>(task: F) -> Option<JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(task)),
        Err(_) => {
            warn!("No runtime available, timer not started");
            None
        }
    }
}

/// Start the shot clock for the current turn, if one is configured.
/// A clock that fires after the turn already moved on does nothing.
pub fn arm_turn_clock(app: &AppState, room: &mut Room) {
    let Some(limit) = app.config.turn_time_limit else {
        return;
    };
    let Some(turn_number) = room.game().filter(|g| !g.is_game_over).map(|g| g.turn_number) else {
        room.timers.cancel_turn_clock();
        return;
    };

    let app_for_task = app.clone();
    let room_id = room.id().to_string();
    let handle = spawn_timer(async move {
        tokio::time::sleep(limit).await;
        let app = app_for_task;
        let _ = app.rooms.with_room(&room_id, |room| {
            let Some(change) = room.expire_turn(turn_number) else {
                return;
            };
            info!(room_id = %room_id, next = %change.current_player_id, "Turn clock expired");
            if let Some(game) = room.game() {
                GameStateSynchronizer::new(&app.peers).publish_turn_change(room.info(), game, &change);
            }
            arm_turn_clock(&app, room);
        });
    });
    if let Some(handle) = handle {
        room.timers.set_turn_clock(handle);
    }
}

/// Hold `player_id`'s seat for `grace`; if they are still away when it
/// expires they are removed from the room.
pub fn arm_seat_reclaim(app: &AppState, room: &mut Room, player_id: &str, grace: Duration) {
    let app_for_task = app.clone();
    let room_id = room.id().to_string();
    let pid = player_id.to_string();
    let handle = spawn_timer(async move {
        tokio::time::sleep(grace).await;
        let app = app_for_task;
        let result = app
            .rooms
            .reclaim_seat_with(&room_id, &pid, |room, departure| {
                announce_departure(&app, room, departure);
            });
        match result {
            Ok(Some(_)) => info!(room_id = %room_id, player_id = %pid, "Held seat released"),
            Ok(None) => debug!(room_id = %room_id, player_id = %pid, "Player returned before seat expiry"),
            Err(e) => debug!(room_id = %room_id, player_id = %pid, error = %e, "Seat reclaim skipped"),
        }
    });
    if let Some(handle) = handle {
        room.timers.set_reclaim(player_id, handle);
    }
}
