use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Check the bounds of a candidate span and build it.
pub(crate) fn validate_span(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    if start > end {
        return Err(EngineError::Validation(format!(
            "end {end} is before start {start}"
        )));
    }
    if start.year() < MIN_VALID_YEAR || end.year() > MAX_VALID_YEAR {
        return Err(EngineError::Validation("date out of range".into()));
    }
    let span = DateSpan::new(start, end);
    if span.days() > MAX_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("borrow period too long"));
    }
    Ok(span)
}

/// First approved request on the item whose span overlaps `span`, skipping `exclude`.
///
/// Only compares. Whether the answer is authoritative depends on the lock the
/// caller holds on `item` while calling this.
pub(crate) fn find_conflict<'a>(
    item: &'a ItemState,
    span: &DateSpan,
    exclude: Option<RequestId>,
) -> Option<&'a BorrowRequest> {
    item.overlapping(span).find(|r| {
        r.status == RequestStatus::Approved && Some(r.id) != exclude && r.span.overlaps(span)
    })
}
