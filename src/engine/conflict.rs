use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKING_CONFLICTS_TOTAL;

use super::EngineError;

/// Store-side guard on a requested window, independent of any caller policy.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Caller must hold the room's write lock across this check and the commit.
pub(crate) fn check_no_conflict(rs: &RoomState, span: &Span) -> Result<(), EngineError> {
    if let Some(existing) = rs.overlapping(span).next() {
        metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}
