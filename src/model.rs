use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Shared endpoints do not count: `[10, 11)` and `[11, 12)` are disjoint.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub i64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// A confirmed reservation. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    #[serde(with = "crate::time::rfc3339")]
    pub start_time: Ms,
    #[serde(with = "crate::time::rfc3339")]
    pub end_time: Ms,
    #[serde(with = "crate::time::rfc3339")]
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `(start_time, id)`.
    pub bookings: Vec<Booking>,
    /// Set once the room's deletion has been committed. Writers that were
    /// queued on the lock see this and back off.
    pub deleted: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            deleted: false,
        }
    }

    /// Insert maintaining sort order by `(start_time, id)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.start_time, booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.start_time, b.id))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self
            .bookings
            .partition_point(|b| b.start_time < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_time > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
    },
    /// Cascades: every booking of the room goes with it.
    RoomDeleted {
        id: RoomId,
    },
    BookingConfirmed {
        id: BookingId,
        room_id: RoomId,
        span: Span,
        created_at: Ms,
    },
    BookingCancelled {
        id: BookingId,
        room_id: RoomId,
    },
    /// Sequence watermarks written at the head of a compacted WAL, so ids of
    /// deleted rooms and bookings are never handed out again.
    Checkpoint {
        next_room_id: i64,
        next_booking_id: i64,
        last_created_at: Ms,
    },
}

impl Event {
    /// The room whose lock must be held to apply this event.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Event::RoomDeleted { id } => Some(*id),
            Event::BookingConfirmed { room_id, .. } | Event::BookingCancelled { room_id, .. } => {
                Some(*room_id)
            }
            Event::RoomCreated { .. } | Event::Checkpoint { .. } => None,
        }
    }
}
