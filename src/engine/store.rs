use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::model::*;

use super::{Engine, EngineError, EngineTransaction};

/// Storage capability behind the booking service.
///
/// `insert` is the exclusion constraint: it must atomically reject any span
/// that overlaps an existing booking of the same room, however many callers
/// race on that room.
#[async_trait]
pub trait BookingStore: Send + Sync {
    type Transaction: StoreTransaction;

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, EngineError>;

    /// Fails with `EngineError::Conflict` when an overlapping booking exists.
    async fn insert(&self, room_id: RoomId, span: Span) -> Result<Booking, EngineError>;

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, EngineError>;

    /// Ascending by start time, ties broken by id.
    async fn find_by_room(&self, room_id: RoomId) -> Result<Vec<Booking>, EngineError>;

    async fn delete_by_id(&self, id: BookingId) -> Result<(), EngineError>;

    async fn begin(&self) -> Result<Self::Transaction, EngineError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_by_id(&mut self, id: BookingId) -> Result<Option<Booking>, EngineError>;

    async fn delete_by_id(&mut self, id: BookingId) -> Result<(), EngineError>;

    async fn commit(self) -> Result<(), EngineError>;

    fn rollback(self);
}

/// Run `f` inside a transaction: commit if it returns `Ok`, roll back
/// otherwise. Errors raised by `f` itself roll back too.
///
/// Do not call the store's own mutating methods from inside `f`; go through
/// the transaction handle.
pub async fn with_transaction<S, T, E, F>(store: &S, f: F) -> Result<T, E>
where
    S: BookingStore + ?Sized,
    T: Send,
    E: From<EngineError> + Send,
    F: for<'t> FnOnce(&'t mut S::Transaction) -> BoxFuture<'t, Result<T, E>> + Send,
{
    let mut tx = store.begin().await?;
    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            tx.rollback();
            Err(e)
        }
    }
}

#[async_trait]
impl BookingStore for Engine {
    type Transaction = EngineTransaction;

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, EngineError> {
        Ok(Engine::room_exists(self, room_id))
    }

    async fn insert(&self, room_id: RoomId, span: Span) -> Result<Booking, EngineError> {
        self.insert_booking(room_id, span).await
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, EngineError> {
        Ok(self.booking(id).await)
    }

    async fn find_by_room(&self, room_id: RoomId) -> Result<Vec<Booking>, EngineError> {
        self.bookings_for_room(room_id).await
    }

    async fn delete_by_id(&self, id: BookingId) -> Result<(), EngineError> {
        self.cancel_booking(id).await.map(|_| ())
    }

    async fn begin(&self) -> Result<Self::Transaction, EngineError> {
        Ok(self.begin_transaction().await)
    }
}

#[async_trait]
impl StoreTransaction for EngineTransaction {
    async fn find_by_id(&mut self, id: BookingId) -> Result<Option<Booking>, EngineError> {
        EngineTransaction::find_by_id(self, id).await
    }

    async fn delete_by_id(&mut self, id: BookingId) -> Result<(), EngineError> {
        EngineTransaction::delete_by_id(self, id).await
    }

    async fn commit(self) -> Result<(), EngineError> {
        EngineTransaction::commit(self).await
    }

    fn rollback(self) {
        EngineTransaction::rollback(self)
    }
}
