//! Room registry: maps room ids to shared room state.
//!
//! Rooms spring into existence on first reference through
//! [`RoomRegistry::get_or_create`]; that is the only way a room is created.
//! They live until the registry is dropped or [`RoomRegistry::evict_idle`]
//! removes them. An evicted room is marked retired so a caller still holding
//! its handle knows to fetch a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::room::Room;

/// Shared handle to one room. The mutex serializes every operation on it.
pub type RoomHandle = Arc<Mutex<Room>>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomHandle>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the room for `room_id`, creating an empty one if needed.
    pub async fn get_or_create(&self, room_id: &str) -> RoomHandle {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Another task may have created it between the two locks.
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let room = Arc::new(Mutex::new(Room::new(room_id)));
        rooms.insert(room_id.to_owned(), room.clone());
        log::debug!("Created room {room_id}");
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Drop rooms that have no members and no activity for `max_idle`.
    ///
    /// Returns the number of rooms removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut idle = Vec::new();
        for (id, room) in rooms.iter() {
            // A room busy with an operation is not idle.
            if let Ok(mut room) = room.try_lock() {
                if room.is_idle(max_idle) {
                    room.retire();
                    idle.push(id.clone());
                }
            }
        }
        for id in &idle {
            rooms.remove(id);
            log::info!("Evicted idle room {id}");
        }
        idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionId;

    #[tokio::test]
    async fn test_get_or_create_returns_same_room() {
        let registry = RoomRegistry::new();
        let a = registry.get_or_create("R1").await;
        let b = registry.get_or_create("R1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(a.lock().await.id(), "R1");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let r1 = registry.get_or_create("R1").await;
        let r2 = registry.get_or_create("R2").await;
        assert!(!Arc::ptr_eq(&r1, &r2));

        let mut ids = registry.room_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["R1".to_string(), "R2".to_string()]);
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let registry = RoomRegistry::new();
        assert!(registry.get("nope").await.is_none());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get_or_create("R1").await }));
        }
        let mut rooms = Vec::new();
        for h in handles {
            rooms.push(h.await.unwrap());
        }
        assert!(rooms.iter().all(|r| Arc::ptr_eq(r, &rooms[0])));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_evict_idle_skips_occupied_rooms() {
        let registry = RoomRegistry::new();
        let occupied = registry.get_or_create("busy").await;
        occupied.lock().await.join(ConnectionId::new());
        registry.get_or_create("empty").await;

        let empty = registry.get("empty").await.unwrap();
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 1);
        assert!(empty.lock().await.is_retired());
        assert!(registry.get("busy").await.is_some());
        assert!(registry.get("empty").await.is_none());
    }

    #[tokio::test]
    async fn test_evict_idle_respects_ttl() {
        let registry = RoomRegistry::new();
        registry.get_or_create("R1").await;
        assert_eq!(registry.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(registry.room_count().await, 1);
    }
}
