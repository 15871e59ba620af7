use crate::model::{Ms, Span, SpaceState};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Structural checks on a requested interval. The in-the-future check is
/// separate because only admission cares about it.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidInterval("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidInterval("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::InvalidInterval("span too wide"));
    }
    Ok(())
}

/// The exclusivity invariant: no live booking on the space may overlap
/// the requested span. Terminal bookings (canceled, rejected, completed)
/// stay in history but never block.
///
/// Caller must hold the space's write lock — this check and the insert
/// that follows it are one atomic unit.
pub(crate) fn check_no_conflict(ss: &SpaceState, span: &Span) -> Result<(), EngineError> {
    for booking in ss.overlapping_bookings(span) {
        if booking.is_live() {
            return Err(EngineError::Conflict(booking.id));
        }
    }
    Ok(())
}
