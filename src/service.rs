use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::engine::{BookingStore, EngineError, StoreTransaction, with_transaction};
use crate::model::*;
use crate::observability::{OPERATION_DURATION_SECONDS, OPERATIONS_TOTAL};
use crate::time::now_ms;
use crate::validate::{ValidationError, ValidationPolicy, validate_booking_window};

/// Stable, machine-readable error kinds for transports to map onto status
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    RoomNotFound,
    BookingNotFound,
    BookingConflict,
    StorageUnavailable,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::RoomNotFound => "room_not_found",
            ErrorKind::BookingNotFound => "booking_not_found",
            ErrorKind::BookingConflict => "booking_conflict",
            ErrorKind::StorageUnavailable => "storage_unavailable",
        }
    }

    /// Status an HTTP front end would answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::RoomNotFound | ErrorKind::BookingNotFound => 404,
            ErrorKind::BookingConflict => 409,
            ErrorKind::StorageUnavailable => 500,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::StorageUnavailable)
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Room with id {0} not found")]
    RoomNotFound(RoomId),
    #[error("Booking with id {0} not found")]
    BookingNotFound(BookingId),
    #[error("Booking overlaps with an existing booking for this room")]
    BookingConflict,
    /// Engine detail stays behind `source()`; it never reaches `Display`.
    #[error("storage unavailable while trying to {context}")]
    StorageUnavailable {
        context: &'static str,
        #[source]
        source: EngineError,
    },
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) => ErrorKind::Validation,
            BookingError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            BookingError::BookingNotFound(_) => ErrorKind::BookingNotFound,
            BookingError::BookingConflict => ErrorKind::BookingConflict,
            BookingError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
        }
    }

    /// Translate a store outcome. `context` names the operation for logs.
    pub fn from_store(context: &'static str, err: EngineError) -> Self {
        match err {
            EngineError::Conflict(_) => BookingError::BookingConflict,
            EngineError::RoomNotFound(id) => BookingError::RoomNotFound(id),
            EngineError::BookingNotFound(id) => BookingError::BookingNotFound(id),
            EngineError::InvalidSpan { .. } => {
                BookingError::Validation(ValidationError::StartNotBeforeEnd)
            }
            EngineError::LimitExceeded(what) => {
                BookingError::Validation(ValidationError::OutOfRange(what))
            }
            source => BookingError::StorageUnavailable { context, source },
        }
    }
}

impl From<EngineError> for BookingError {
    fn from(err: EngineError) -> Self {
        BookingError::from_store("access storage", err)
    }
}

/// Booking use-cases: validate, check the room, delegate the atomic
/// check-and-insert to the store.
pub struct BookingService<S> {
    store: Arc<S>,
    policy: ValidationPolicy,
    now: fn() -> Ms,
}

impl<S> Clone for BookingService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
            now: self.now,
        }
    }
}

impl<S: BookingStore> BookingService<S> {
    pub fn new(store: Arc<S>, policy: ValidationPolicy) -> Self {
        Self {
            store,
            policy,
            now: now_ms,
        }
    }

    /// Replace the wall clock used for the future-start rule.
    pub fn with_clock(mut self, now: fn() -> Ms) -> Self {
        self.now = now;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_booking(
        &self,
        room_id: RoomId,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.try_create(room_id, start, end).await;
        match &result {
            Ok(booking) => info!(booking_id = %booking.id, %room_id, "booking created"),
            Err(e) => log_failure("create_booking", e),
        }
        record("create_booking", started, &result);
        result
    }

    async fn try_create(&self, room_id: RoomId, start: Ms, end: Ms) -> Result<Booking, BookingError> {
        let span = validate_booking_window(start, end, (self.now)(), &self.policy)?;
        let exists = self
            .store
            .room_exists(room_id)
            .await
            .map_err(|e| BookingError::from_store("check room", e))?;
        if !exists {
            return Err(BookingError::RoomNotFound(room_id));
        }
        self.store
            .insert(room_id, span)
            .await
            .map_err(|e| BookingError::from_store("insert booking", e))
    }

    pub async fn list_bookings(&self, room_id: RoomId) -> Result<Vec<Booking>, BookingError> {
        let started = Instant::now();
        let result = self.try_list(room_id).await;
        if let Err(e) = &result {
            log_failure("list_bookings", e);
        }
        record("list_bookings", started, &result);
        result
    }

    async fn try_list(&self, room_id: RoomId) -> Result<Vec<Booking>, BookingError> {
        let exists = self
            .store
            .room_exists(room_id)
            .await
            .map_err(|e| BookingError::from_store("check room", e))?;
        if !exists {
            return Err(BookingError::RoomNotFound(room_id));
        }
        self.store
            .find_by_room(room_id)
            .await
            .map_err(|e| BookingError::from_store("list bookings", e))
    }

    /// Delete inside one transaction: the lookup and the removal see the
    /// same state.
    pub async fn delete_booking(&self, id: BookingId) -> Result<(), BookingError> {
        let started = Instant::now();
        let result = with_transaction(self.store.as_ref(), |tx| {
            Box::pin(async move {
                let found = tx
                    .find_by_id(id)
                    .await
                    .map_err(|e| BookingError::from_store("find booking", e))?;
                if found.is_none() {
                    return Err(BookingError::BookingNotFound(id));
                }
                tx.delete_by_id(id)
                    .await
                    .map_err(|e| BookingError::from_store("delete booking", e))
            })
        })
        .await;
        match &result {
            Ok(()) => info!(booking_id = %id, "booking deleted"),
            Err(e) => log_failure("delete_booking", e),
        }
        record("delete_booking", started, &result);
        result
    }
}

fn log_failure(operation: &'static str, err: &BookingError) {
    match err {
        BookingError::StorageUnavailable { source, .. } => {
            error!(operation, error = %err, cause = %source, "storage failure");
        }
        BookingError::BookingConflict => warn!(operation, "{err}"),
        _ => info!(operation, kind = err.kind().code(), "{err}"),
    }
}

fn record<T>(operation: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().code(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
