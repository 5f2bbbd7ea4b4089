use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::debug;

use crate::model::*;

use super::{CommitLocks, Engine, EngineError};

/// A unit of work scoped to a single room.
///
/// The first booking touched binds the transaction to that booking's room,
/// which stays write-locked until commit or drop. Writes are staged and
/// become durable and visible only on `commit`. Dropping the transaction
/// discards them.
pub struct EngineTransaction {
    engine: Engine,
    gate: OwnedRwLockReadGuard<()>,
    room: Option<OwnedRwLockWriteGuard<RoomState>>,
    staged: Vec<Event>,
}

impl Engine {
    pub async fn begin_transaction(&self) -> EngineTransaction {
        EngineTransaction {
            engine: self.clone(),
            gate: self.gate().await,
            room: None,
            staged: Vec::new(),
        }
    }
}

impl EngineTransaction {
    /// The room this transaction is bound to, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        self.room.as_ref().map(|g| g.room.id)
    }

    fn cancelled_here(&self, id: BookingId) -> bool {
        self.staged
            .iter()
            .any(|e| matches!(e, Event::BookingCancelled { id: staged, .. } if *staged == id))
    }

    /// Lock the booking's room on first use. `None` if the booking is unknown.
    async fn bind(&mut self, id: BookingId) -> Result<Option<&RoomState>, EngineError> {
        let Some(room_id) = self.engine.room_of(id) else {
            return Ok(None);
        };
        match self.room_id() {
            Some(held) if held != room_id => {
                return Err(EngineError::CrossRoomTransaction {
                    held,
                    requested: room_id,
                });
            }
            Some(_) => {}
            None => match self.engine.lock_room(room_id).await {
                Ok(guard) => self.room = Some(guard),
                Err(EngineError::RoomNotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            },
        }
        Ok(self.room.as_deref())
    }

    /// Read a booking as this transaction sees it, staged deletes included.
    pub async fn find_by_id(&mut self, id: BookingId) -> Result<Option<Booking>, EngineError> {
        if self.cancelled_here(id) {
            return Ok(None);
        }
        Ok(self.bind(id).await?.and_then(|rs| rs.get(id)).cloned())
    }

    pub async fn delete_by_id(&mut self, id: BookingId) -> Result<(), EngineError> {
        if self.cancelled_here(id) {
            return Err(EngineError::BookingNotFound(id));
        }
        let room_id = match self.bind(id).await? {
            Some(rs) if rs.get(id).is_some() => rs.room.id,
            _ => return Err(EngineError::BookingNotFound(id)),
        };
        self.staged.push(Event::BookingCancelled { id, room_id });
        Ok(())
    }

    pub async fn commit(self) -> Result<(), EngineError> {
        let EngineTransaction {
            engine,
            gate,
            room,
            staged,
        } = self;
        if staged.is_empty() {
            return Ok(());
        }
        let count = staged.len();
        let locks = CommitLocks {
            gate,
            catalog: None,
            room,
        };
        engine.commit(locks, staged).await?;
        debug!(events = count, "transaction committed");
        Ok(())
    }

    pub fn rollback(self) {
        if !self.staged.is_empty() {
            debug!(events = self.staged.len(), "transaction rolled back");
        }
    }
}
