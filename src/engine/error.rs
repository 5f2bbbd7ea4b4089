use thiserror::Error;

use crate::model::{BookingId, Ms, RoomId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("room name already taken: {0:?}")]
    DuplicateRoomName(String),
    #[error("invalid room name: {0}")]
    InvalidRoomName(&'static str),
    #[error("invalid span: start {start} is not before end {end}")]
    InvalidSpan { start: Ms, end: Ms },
    #[error("conflict with booking: {0}")]
    Conflict(BookingId),
    #[error("transaction is bound to room {held}, cannot touch room {requested}")]
    CrossRoomTransaction { held: RoomId, requested: RoomId },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
