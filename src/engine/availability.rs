use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::calendar;
use crate::model::{DayException, Span, TimeRange, WeekSchedule};

use super::EngineError;

// ── Availability Resolution ───────────────────────────────────────

/// Resolve one date's open hours. Pure: repeated calls with identical
/// inputs return identical results.
///
/// An exception wholly overrides the weekday pattern — `Closed` yields
/// nothing, `Open(ranges)` yields exactly those ranges, and only when no
/// exception exists does the weekday's recurring pattern apply.
pub fn resolve_day<'a>(
    schedule: &'a WeekSchedule,
    exceptions: &'a BTreeMap<NaiveDate, DayException>,
    date: NaiveDate,
) -> &'a [TimeRange] {
    match exceptions.get(&date) {
        Some(DayException::Closed) => &[],
        Some(DayException::Open(ranges)) => ranges,
        None => schedule.ranges_for(date.weekday()),
    }
}

/// Concrete open spans for an inclusive date range, for display and
/// search. Ranges touching across midnight are merged.
pub fn open_spans(
    schedule: &WeekSchedule,
    exceptions: &BTreeMap<NaiveDate, DayException>,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let mut date = from;
    while date <= to {
        for range in resolve_day(schedule, exceptions, date) {
            spans.push(Span::new(
                calendar::ms_at(date, range.start_min),
                calendar::ms_at(date, range.end_min),
            ));
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    merge_touching(&spans)
}

/// Require every calendar day the span touches to contain its sub-interval
/// in a single open range of that day.
pub fn covers_span(
    schedule: &WeekSchedule,
    exceptions: &BTreeMap<NaiveDate, DayException>,
    span: &Span,
) -> Result<(), EngineError> {
    for slice in calendar::day_slices(span) {
        let open = resolve_day(schedule, exceptions, slice.date);
        let covered = open.iter().any(|r| r.covers(slice.start_min, slice.end_min));
        if !covered {
            return Err(EngineError::NotAvailable(slice.date));
        }
    }
    Ok(())
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_touching(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}
