use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{CommitLocks, Engine, EngineError, SharedRoomState, WalCommand};

fn normalize_room_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidRoomName("name must not be empty"));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::InvalidRoomName("name too long"));
    }
    Ok(name.to_string())
}

impl Engine {
    pub async fn create_room(&self, name: &str) -> Result<Room, EngineError> {
        self.create_room_inner(name, false).await
    }

    /// Create the room unless one with this name already exists. Used to
    /// seed the catalog at startup.
    pub async fn ensure_room(&self, name: &str) -> Result<Room, EngineError> {
        self.create_room_inner(name, true).await
    }

    async fn create_room_inner(&self, name: &str, if_missing: bool) -> Result<Room, EngineError> {
        let name = normalize_room_name(name)?;
        let gate = self.gate().await;
        let catalog = self.lock_catalog().await;

        let existing = self.inner.room_names.get(&name).map(|e| *e.value());
        if let Some(id) = existing {
            if if_missing {
                return Ok(Room { id, name });
            }
            return Err(EngineError::DuplicateRoomName(name));
        }
        if self.inner.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = self.allocate_room_id();
        let event = Event::RoomCreated {
            id,
            name: name.clone(),
        };
        let locks = CommitLocks {
            gate,
            catalog: Some(catalog),
            room: None,
        };
        self.commit(locks, vec![event]).await?;
        info!(room_id = %id, %name, "room created");
        Ok(Room { id, name })
    }

    /// Delete a room and every booking it holds. Returns how many bookings
    /// went with it.
    pub async fn delete_room(&self, id: RoomId) -> Result<usize, EngineError> {
        let gate = self.gate().await;
        let catalog = self.lock_catalog().await;
        let room = self.lock_room(id).await?;
        let cascaded = room.bookings.len();

        let locks = CommitLocks {
            gate,
            catalog: Some(catalog),
            room: Some(room),
        };
        self.commit(locks, vec![Event::RoomDeleted { id }]).await?;
        info!(room_id = %id, cascaded, "room deleted");
        Ok(cascaded)
    }

    /// Conflict-checked insert. The room stays write-locked from the overlap
    /// scan until the booking is durable and visible.
    pub async fn insert_booking(&self, room_id: RoomId, span: Span) -> Result<Booking, EngineError> {
        let span = validate_span(span.start, span.end)?;
        let gate = self.gate().await;
        let room = self.lock_room(room_id).await?;
        if room.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }
        check_no_conflict(&room, &span)?;

        let booking = Booking {
            id: self.allocate_booking_id(),
            room_id,
            start_time: span.start,
            end_time: span.end,
            created_at: self.stamp_created_at(),
        };
        let event = Event::BookingConfirmed {
            id: booking.id,
            room_id,
            span,
            created_at: booking.created_at,
        };
        let locks = CommitLocks {
            gate,
            catalog: None,
            room: Some(room),
        };
        self.commit(locks, vec![event]).await?;
        debug!(booking_id = %booking.id, %room_id, start = span.start, end = span.end, "booking confirmed");
        Ok(booking)
    }

    /// Remove a booking, returning what was removed.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let gate = self.gate().await;
        let room_id = self.room_of(id).ok_or(EngineError::BookingNotFound(id))?;
        let room = match self.lock_room(room_id).await {
            Err(EngineError::RoomNotFound(_)) => return Err(EngineError::BookingNotFound(id)),
            other => other?,
        };
        let booking = room.get(id).cloned().ok_or(EngineError::BookingNotFound(id))?;

        let locks = CommitLocks {
            gate,
            catalog: None,
            room: Some(room),
        };
        self.commit(locks, vec![Event::BookingCancelled { id, room_id }])
            .await?;
        debug!(booking_id = %id, %room_id, "booking cancelled");
        Ok(booking)
    }

    /// Rewrite the WAL as a checkpoint plus the live rooms and bookings.
    /// Returns the number of events written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        // Exclusive gate: no commit is in flight, so no room is write-locked.
        let _gate = self.inner.commit_gate.write().await;

        let mut rooms: Vec<(RoomId, SharedRoomState)> = self
            .inner
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rooms.sort_by_key(|(id, _)| *id);

        let mut events = vec![self.checkpoint()];
        for (_, shared) in rooms {
            let rs = shared.read().await;
            events.push(Event::RoomCreated {
                id: rs.room.id,
                name: rs.room.name.clone(),
            });
            events.extend(rs.bookings.iter().map(|b| Event::BookingConfirmed {
                id: b.id,
                room_id: b.room_id,
                span: b.span(),
                created_at: b.created_at,
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.inner
            .wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
