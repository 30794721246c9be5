use chrono::NaiveDate;

use crate::model::{Interval, ResourceState, TimeOfDay};

use super::EngineError;

/// Normalize-and-validate a candidate slot. Both bounds must parse (loose
/// `H:M:S` forms accepted) and start must precede end.
pub(crate) fn validate_interval(start: &str, end: &str) -> Result<Interval, EngineError> {
    let invalid = || EngineError::InvalidInterval {
        start: start.to_string(),
        end: end.to_string(),
    };
    let s = TimeOfDay::parse(start).ok_or_else(invalid)?;
    let e = TimeOfDay::parse(end).ok_or_else(invalid)?;
    if s >= e {
        return Err(invalid());
    }
    Ok(Interval::new(s, e))
}

/// Conflict check for a candidate slot on `(resource, date)`.
///
/// Scans the date's bookings (a binary-searched slice of the sorted vector)
/// and rejects on the first confirmed overlap. Cancelled bookings never
/// block; adjacent slots never conflict (half-open semantics). Callers must
/// hold the resource write lock so check-then-insert is one atomic unit.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    date: NaiveDate,
    candidate: &Interval,
) -> Result<(), EngineError> {
    for booking in rs.bookings_on(date) {
        if booking.is_confirmed() && booking.interval.overlaps(candidate) {
            return Err(EngineError::SlotUnavailable(booking.id));
        }
    }
    Ok(())
}
