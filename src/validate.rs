use thiserror::Error;

use crate::model::{Ms, Span};
use crate::time::is_minute_aligned;

/// Which optional time-window rules apply. Ordering (`start < end`) is
/// always enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Reject bookings whose start is at or before "now".
    pub require_future_start: bool,
    /// Reject start/end times with non-zero seconds or sub-seconds.
    pub require_minute_alignment: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            require_future_start: true,
            require_minute_alignment: true,
        }
    }
}

impl ValidationPolicy {
    pub fn permissive() -> Self {
        Self {
            require_future_start: false,
            require_minute_alignment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Start time must be before end time")]
    StartNotBeforeEnd,
    #[error("Start time must be in the future")]
    StartNotInFuture,
    #[error("Booking times must be aligned to full minutes")]
    NotMinuteAligned,
    #[error("Booking window out of range: {0}")]
    OutOfRange(&'static str),
}

/// Check a requested window before any storage access. Rules run in a fixed
/// order and the first failure wins.
pub fn validate_booking_window(
    start: Ms,
    end: Ms,
    now: Ms,
    policy: &ValidationPolicy,
) -> Result<Span, ValidationError> {
    if start >= end {
        return Err(ValidationError::StartNotBeforeEnd);
    }
    if policy.require_future_start && start <= now {
        return Err(ValidationError::StartNotInFuture);
    }
    if policy.require_minute_alignment && !(is_minute_aligned(start) && is_minute_aligned(end)) {
        return Err(ValidationError::NotMinuteAligned);
    }
    Ok(Span::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000;
    const H: Ms = 60 * M;
    const TEN_AM: Ms = 1_767_261_600_000; // 2026-01-01T10:00:00Z
    const BEFORE: Ms = TEN_AM - 24 * H;

    #[test]
    fn accepts_well_formed_future_window() {
        let span = validate_booking_window(TEN_AM, TEN_AM + H, BEFORE, &ValidationPolicy::default())
            .unwrap();
        assert_eq!(span, Span::new(TEN_AM, TEN_AM + H));
    }

    #[test]
    fn start_equal_to_end_is_rejected() {
        let result = validate_booking_window(TEN_AM, TEN_AM, BEFORE, &ValidationPolicy::default());
        assert_eq!(result, Err(ValidationError::StartNotBeforeEnd));
    }

    #[test]
    fn ordering_is_checked_first() {
        // Reversed, in the past and misaligned: ordering still wins.
        let result = validate_booking_window(
            TEN_AM + 30_001,
            TEN_AM,
            TEN_AM + 24 * H,
            &ValidationPolicy::default(),
        );
        assert_eq!(result, Err(ValidationError::StartNotBeforeEnd));
    }

    #[test]
    fn past_or_present_start_is_rejected() {
        let policy = ValidationPolicy::default();
        assert_eq!(
            validate_booking_window(TEN_AM, TEN_AM + H, TEN_AM, &policy),
            Err(ValidationError::StartNotInFuture)
        );
        assert_eq!(
            validate_booking_window(TEN_AM, TEN_AM + H, TEN_AM + M, &policy),
            Err(ValidationError::StartNotInFuture)
        );
    }

    #[test]
    fn future_check_precedes_alignment() {
        let result = validate_booking_window(
            TEN_AM + 30_000,
            TEN_AM + H,
            TEN_AM + H,
            &ValidationPolicy::default(),
        );
        assert_eq!(result, Err(ValidationError::StartNotInFuture));
    }

    #[test]
    fn misaligned_start_or_end_is_rejected() {
        let policy = ValidationPolicy::default();
        assert_eq!(
            validate_booking_window(TEN_AM + 30_000, TEN_AM + H, BEFORE, &policy),
            Err(ValidationError::NotMinuteAligned)
        );
        assert_eq!(
            validate_booking_window(TEN_AM, TEN_AM + H + 1, BEFORE, &policy),
            Err(ValidationError::NotMinuteAligned)
        );
    }

    #[test]
    fn permissive_policy_only_checks_ordering() {
        let policy = ValidationPolicy::permissive();
        assert!(validate_booking_window(TEN_AM + 1, TEN_AM + 2, TEN_AM + H, &policy).is_ok());
        assert_eq!(
            validate_booking_window(TEN_AM + 2, TEN_AM + 1, TEN_AM + H, &policy),
            Err(ValidationError::StartNotBeforeEnd)
        );
    }
}
