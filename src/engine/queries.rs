use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn room_exists(&self, id: RoomId) -> bool {
        self.inner.rooms.contains_key(&id)
    }

    pub async fn room(&self, id: RoomId) -> Option<Room> {
        let shared = self.shared_room(id)?;
        let guard = shared.read().await;
        (!guard.deleted).then(|| guard.room.clone())
    }

    /// All rooms, ordered by id.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let shared: Vec<_> = self.inner.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(shared.len());
        for rs in shared {
            let guard = rs.read().await;
            if !guard.deleted {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn booking(&self, id: BookingId) -> Option<Booking> {
        let room_id = self.room_of(id)?;
        let shared = self.shared_room(room_id)?;
        let guard = shared.read().await;
        guard.get(id).cloned()
    }

    /// Bookings of one room, ascending by start time, ties broken by id.
    pub async fn bookings_for_room(&self, room_id: RoomId) -> Result<Vec<Booking>, EngineError> {
        let shared = self
            .shared_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = shared.read().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(guard.bookings.clone())
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn booking_count(&self) -> usize {
        self.inner.booking_index.len()
    }
}
