use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

/// Earliest accepted booking instant (the Unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
/// A single booking may not span more than a leap year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
