//! In-memory room registry with per-room locking

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{GameType, RoomInfo, RoomSummary};

use super::room::{Departure, Room, RoomError, MIN_PLAYERS_TO_START};

/// Default seats in a new room
pub const DEFAULT_MAX_PLAYERS: usize = 2;

pub type SharedRoom = Arc<Mutex<Room>>;

/// Owns every room. Membership changes for one room are serialized by that
/// room's lock; distinct rooms never contend.
pub struct RoomRegistry {
    rooms: DashMap<String, SharedRoom>,
    /// Slots taken against `max_rooms`; reserved before a room is inserted
    slots: AtomicUsize,
    next_seq: AtomicU64,
    max_rooms: usize,
    max_players_cap: usize,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize, max_players_cap: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            slots: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            max_rooms,
            max_players_cap: max_players_cap.max(MIN_PLAYERS_TO_START),
        }
    }

    pub fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Seated players across all rooms
    pub fn player_count(&self) -> usize {
        self.snapshot_rooms()
            .iter()
            .map(|r| r.lock().info().player_count())
            .sum()
    }

    fn clamp_players(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(DEFAULT_MAX_PLAYERS)
            .clamp(MIN_PLAYERS_TO_START, self.max_players_cap)
    }

    fn insert_room(&self, room: Room) -> Result<SharedRoom, RoomError> {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.max_rooms).then_some(taken + 1)
            })
            .map_err(|_| RoomError::RoomLimitReached)?;
        let room_id = room.id().to_string();
        let shared = Arc::new(Mutex::new(room));
        self.rooms.insert(room_id, shared.clone());
        Ok(shared)
    }

    fn new_room(&self, room_name: &str, game_type: GameType, max_players: Option<usize>) -> Room {
        Room::new(
            Uuid::new_v4().to_string(),
            room_name,
            game_type,
            self.clamp_players(max_players),
            self.next_seq.fetch_add(1, Ordering::Relaxed),
        )
    }

    /// Create a room with `creator_id` as its only player and host
    pub fn create_room(
        &self,
        creator_id: &str,
        creator_name: &str,
        room_name: &str,
        game_type: GameType,
        max_players: Option<usize>,
    ) -> Result<RoomInfo, RoomError> {
        self.create_room_with(creator_id, creator_name, room_name, game_type, max_players, |_| {})
    }

    /// `create_room`, running `on_commit` under the new room's lock
    pub fn create_room_with(
        &self,
        creator_id: &str,
        creator_name: &str,
        room_name: &str,
        game_type: GameType,
        max_players: Option<usize>,
        on_commit: impl FnOnce(&Room),
    ) -> Result<RoomInfo, RoomError> {
        let mut room = self.new_room(room_name, game_type, max_players);
        room.add_player(creator_id, creator_name)?;

        let shared = self.insert_room(room)?;
        let room = shared.lock();
        info!(room_id = %room.id(), host = %creator_id, game_type = %game_type, "Room created");
        on_commit(&room);
        Ok(room.info().clone())
    }

    /// Open an empty standing room; its first joiner becomes host
    pub fn open_room(
        &self,
        room_name: &str,
        game_type: GameType,
        max_players: Option<usize>,
    ) -> Result<RoomInfo, RoomError> {
        let mut room = self.new_room(room_name, game_type, max_players);
        room.mark_standing();
        let shared = self.insert_room(room)?;
        let room = shared.lock();
        info!(room_id = %room.id(), room_name = %room_name, "Standing room opened");
        Ok(room.info().clone())
    }

    pub fn join_room(&self, room_id: &str, player_id: &str, name: &str) -> Result<RoomInfo, RoomError> {
        self.join_room_with(room_id, player_id, name, |_| {})
    }

    /// `join_room`, running `on_commit` under the room lock. The capacity
    /// check and the insert happen under the same lock.
    pub fn join_room_with(
        &self,
        room_id: &str,
        player_id: &str,
        name: &str,
        on_commit: impl FnOnce(&Room),
    ) -> Result<RoomInfo, RoomError> {
        let shared = self.get(room_id).ok_or(RoomError::RoomNotFound)?;
        let mut room = shared.lock();
        room.add_player(player_id, name)?;
        debug!(room_id = %room_id, player_id = %player_id, players = room.info().player_count(), "Player joined");
        on_commit(&room);
        Ok(room.info().clone())
    }

    pub fn leave_room(&self, room_id: &str, player_id: &str) -> Result<Departure, RoomError> {
        self.leave_room_with(room_id, player_id, |_, _| {})
    }

    /// `leave_room`, running `on_commit` under the room lock. An emptied
    /// room is closed and unlisted before the lock is released.
    pub fn leave_room_with(
        &self,
        room_id: &str,
        player_id: &str,
        on_commit: impl FnOnce(&mut Room, &Departure),
    ) -> Result<Departure, RoomError> {
        self.remove_member(room_id, player_id, |_| true, on_commit)?
            .ok_or(RoomError::NotInRoom)
    }

    /// Remove `player_id` only if they are still marked disconnected.
    /// Returns `Ok(None)` when they came back in the meantime.
    pub fn reclaim_seat_with(
        &self,
        room_id: &str,
        player_id: &str,
        on_commit: impl FnOnce(&mut Room, &Departure),
    ) -> Result<Option<Departure>, RoomError> {
        self.remove_member(
            room_id,
            player_id,
            |room| room.info().player(player_id).is_some_and(|p| !p.is_connected),
            on_commit,
        )
    }

    fn remove_member(
        &self,
        room_id: &str,
        player_id: &str,
        precondition: impl FnOnce(&Room) -> bool,
        on_commit: impl FnOnce(&mut Room, &Departure),
    ) -> Result<Option<Departure>, RoomError> {
        let shared = self.get(room_id).ok_or(RoomError::RoomNotFound)?;
        let mut room = shared.lock();
        if room.is_closed() {
            return Err(RoomError::RoomNotFound);
        }
        if !precondition(&room) {
            return Ok(None);
        }
        let departure = room.remove_player(player_id)?;
        debug!(room_id = %room_id, player_id = %player_id, "Player left");

        if departure.room_closed {
            if self
                .rooms
                .remove_if(room_id, |_, r| Arc::ptr_eq(r, &shared))
                .is_some()
            {
                self.slots.fetch_sub(1, Ordering::AcqRel);
            }
            info!(room_id = %room_id, "Room destroyed");
        }
        on_commit(&mut room, &departure);

        let reopen = departure.room_closed && room.is_standing();
        let (room_name, game_type, max_players) = {
            let info = room.info();
            (info.room_name.clone(), info.game_type, info.max_players)
        };
        drop(room);

        if reopen {
            // Standing tables come back empty under a fresh id
            if let Err(e) = self.open_room(&room_name, game_type, Some(max_players)) {
                warn!(room_name = %room_name, error = %e, "Failed to reopen standing room");
            }
        }
        Ok(Some(departure))
    }

    /// Run `f` under the room lock
    pub fn with_room<R>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> R) -> Result<R, RoomError> {
        let shared = self.get(room_id).ok_or(RoomError::RoomNotFound)?;
        let mut room = shared.lock();
        if room.is_closed() {
            return Err(RoomError::RoomNotFound);
        }
        Ok(f(&mut room))
    }

    pub fn set_ready(&self, room_id: &str, player_id: &str, is_ready: bool) -> Result<RoomInfo, RoomError> {
        self.with_room(room_id, |room| {
            room.set_ready(player_id, is_ready)?;
            Ok(room.info().clone())
        })?
    }

    /// Rooms that have not started, oldest first
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut open: Vec<(u64, RoomSummary)> = self
            .snapshot_rooms()
            .iter()
            .filter_map(|shared| {
                let room = shared.lock();
                room.is_open()
                    .then(|| (room.created_seq(), room.info().summary()))
            })
            .collect();
        open.sort_by_key(|(seq, _)| *seq);
        open.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Clone the room handles out so no map shard stays locked while a room
    /// lock is taken
    fn snapshot_rooms(&self) -> Vec<SharedRoom> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(16, 8)
    }

    #[test]
    fn test_create_room() {
        let reg = registry();
        let info = reg
            .create_room("a", "Alice", "Friendly", GameType::EightBall, None)
            .unwrap();
        assert_eq!(info.host_id, "a");
        assert_eq!(info.player_ids(), vec!["a".to_string()]);
        assert_eq!(info.max_players, 2);
        assert!(!info.is_started);
        assert_eq!(reg.room_count(), 1);
    }

    #[test]
    fn test_max_players_is_clamped() {
        let reg = registry();
        let big = reg
            .create_room("a", "A", "Big", GameType::NineBall, Some(100))
            .unwrap();
        assert_eq!(big.max_players, 8);
        let small = reg
            .create_room("b", "B", "Small", GameType::NineBall, Some(0))
            .unwrap();
        assert_eq!(small.max_players, 2);
    }

    #[test]
    fn test_room_limit() {
        let reg = RoomRegistry::new(1, 2);
        assert_ok!(reg.create_room("a", "A", "One", GameType::EightBall, None));
        let err = assert_err!(reg.create_room("b", "B", "Two", GameType::EightBall, None));
        assert_eq!(err, RoomError::RoomLimitReached);
    }

    #[test]
    fn test_concurrent_creates_respect_room_limit() {
        for _ in 0..50 {
            let reg = Arc::new(RoomRegistry::new(3, 2));
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let handles: Vec<_> = (0..threads)
                .map(|i| {
                    let reg = reg.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        reg.create_room(&format!("p{i}"), "P", "T", GameType::EightBall, None)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let ok = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(ok, 3);
            assert!(results
                .iter()
                .filter(|r| r.is_err())
                .all(|r| matches!(r, Err(RoomError::RoomLimitReached))));
            assert_eq!(reg.room_count(), 3);
        }
    }

    #[test]
    fn test_destroyed_room_frees_its_slot() {
        let reg = RoomRegistry::new(1, 2);
        let room = assert_ok!(reg.create_room("a", "A", "One", GameType::EightBall, None));
        assert_ok!(reg.leave_room(&room.room_id, "a"));
        assert_eq!(reg.room_count(), 0);
        assert_ok!(reg.create_room("b", "B", "Two", GameType::EightBall, None));
        assert_err!(reg.create_room("c", "C", "Three", GameType::EightBall, None));
    }

    #[test]
    fn test_join_unknown_room() {
        let reg = registry();
        assert_eq!(
            reg.join_room("nope", "a", "A").unwrap_err(),
            RoomError::RoomNotFound
        );
    }

    #[test]
    fn test_concurrent_joins_fill_exactly() {
        let reg = Arc::new(registry());
        let room = reg.open_room("Race", GameType::EightBall, Some(2)).unwrap();

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let reg = reg.clone();
                let barrier = barrier.clone();
                let room_id = room.room_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    reg.join_room(&room_id, &format!("p{i}"), "Player")
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(RoomError::RoomFull)))
            .count();
        assert_eq!(ok, 2);
        assert_eq!(full, threads - 2);

        let shared = reg.get(&room.room_id).unwrap();
        let info = shared.lock().info().clone();
        assert_eq!(info.player_count(), 2);
        assert_eq!(info.players.iter().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn test_host_transfer_on_leave() {
        let reg = registry();
        let room = reg
            .create_room("a", "Alice", "T", GameType::EightBall, None)
            .unwrap();
        reg.join_room(&room.room_id, "b", "Bob").unwrap();

        let departure = reg.leave_room(&room.room_id, "a").unwrap();
        assert_eq!(departure.new_host.as_deref(), Some("b"));

        let shared = reg.get(&room.room_id).unwrap();
        let info = shared.lock().info().clone();
        assert_eq!(info.host_id, "b");
        assert!(info.players[0].is_host);
    }

    #[test]
    fn test_last_leave_destroys_and_unlists() {
        let reg = registry();
        let room = reg
            .create_room("a", "Alice", "Solo", GameType::Snooker, None)
            .unwrap();
        assert_eq!(reg.list_rooms().len(), 1);

        let departure = reg.leave_room(&room.room_id, "a").unwrap();
        assert!(departure.room_closed);
        assert!(reg.get(&room.room_id).is_none());
        assert!(reg.list_rooms().is_empty());
        assert_eq!(
            reg.join_room(&room.room_id, "b", "Bob").unwrap_err(),
            RoomError::RoomNotFound
        );
    }

    #[test]
    fn test_leave_when_not_member() {
        let reg = registry();
        let room = reg
            .create_room("a", "Alice", "T", GameType::EightBall, None)
            .unwrap();
        assert_eq!(
            reg.leave_room(&room.room_id, "z").unwrap_err(),
            RoomError::NotInRoom
        );
    }

    #[test]
    fn test_list_rooms_newest_last_and_hides_started() {
        let reg = registry();
        let first = reg
            .create_room("a", "A", "First", GameType::EightBall, None)
            .unwrap();
        let second = reg
            .create_room("b", "B", "Second", GameType::NineBall, None)
            .unwrap();
        let third = reg
            .create_room("c", "C", "Third", GameType::Snooker, None)
            .unwrap();

        let names: Vec<String> = reg.list_rooms().into_iter().map(|r| r.room_name).collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);

        reg.join_room(&second.room_id, "d", "D").unwrap();
        reg.set_ready(&second.room_id, "b", true).unwrap();
        reg.set_ready(&second.room_id, "d", true).unwrap();
        reg.with_room(&second.room_id, |room| room.start_game().map(|_| ()))
            .unwrap()
            .unwrap();

        let listed: Vec<String> = reg.list_rooms().into_iter().map(|r| r.room_id).collect();
        assert_eq!(listed, vec![first.room_id, third.room_id]);
    }

    #[test]
    fn test_standing_room_reopens_when_emptied() {
        let reg = registry();
        let room = reg.open_room("Hall", GameType::NineBall, None).unwrap();
        let info = reg.join_room(&room.room_id, "a", "Alice").unwrap();
        assert_eq!(info.host_id, "a");

        reg.leave_room(&room.room_id, "a").unwrap();
        assert!(reg.get(&room.room_id).is_none());

        let listed = reg.list_rooms();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].room_name, "Hall");
        assert_ne!(listed[0].room_id, room.room_id);
        assert_eq!(listed[0].player_count, 0);
    }

    #[test]
    fn test_commit_hook_runs_under_lock() {
        let reg = registry();
        let room = reg
            .create_room("a", "Alice", "T", GameType::EightBall, None)
            .unwrap();
        let mut seen = Vec::new();
        reg.join_room_with(&room.room_id, "b", "Bob", |r| {
            seen = r.info().player_ids();
        })
        .unwrap();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reclaim_only_removes_absent_players() {
        let reg = registry();
        let room = reg
            .create_room("a", "Alice", "T", GameType::EightBall, None)
            .unwrap();
        reg.join_room(&room.room_id, "b", "Bob").unwrap();
        reg.with_room(&room.room_id, |r| r.set_connected("b", false))
            .unwrap()
            .unwrap();

        let kept = assert_ok!(reg.reclaim_seat_with(&room.room_id, "a", |_, _| {}));
        assert!(kept.is_none());

        let departure = reg
            .reclaim_seat_with(&room.room_id, "b", |_, _| {})
            .unwrap()
            .unwrap();
        assert_eq!(departure.player.player_id, "b");
        assert_eq!(reg.get(&room.room_id).unwrap().lock().info().player_ids(), vec!["a".to_string()]);
    }
}
