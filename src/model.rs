use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type. The axis is naive local
/// wall-clock time; calendar decomposition lives in [`crate::calendar`].
pub type Ms = i64;

/// Money in minor currency units. All arithmetic rounds to whole cents.
pub type Cents = i64;

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

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Minutes-of-day range `[start_min, end_min)`, `0 <= start < end <= 1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_min: u16,
    pub end_min: u16,
}

impl TimeRange {
    pub fn new(start_min: u16, end_min: u16) -> Self {
        debug_assert!(start_min < end_min, "TimeRange start must be before end");
        Self { start_min, end_min }
    }

    pub fn contains_minute(&self, minute: u16) -> bool {
        self.start_min <= minute && minute < self.end_min
    }

    /// True when `[start, end)` (minutes) fits entirely inside this range.
    pub fn covers(&self, start: u16, end: u16) -> bool {
        self.start_min <= start && end <= self.end_min
    }
}

/// Check a day's ranges: each well-formed, within the day, sorted, disjoint.
pub fn validate_ranges(ranges: &[TimeRange]) -> Result<(), &'static str> {
    if ranges.len() > crate::limits::MAX_RANGES_PER_DAY {
        return Err("too many ranges for one day");
    }
    let mut prev_end = 0u16;
    for r in ranges {
        if r.start_min >= r.end_min {
            return Err("range start must be before end");
        }
        if r.end_min > 1440 {
            return Err("range extends past midnight");
        }
        if r.start_min < prev_end {
            return Err("ranges must be sorted and non-overlapping");
        }
        prev_end = r.end_min;
    }
    Ok(())
}

/// Recurring weekly open hours, Monday-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub days: [Vec<TimeRange>; 7],
}

impl WeekSchedule {
    /// A schedule with no open hours at all.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn ranges_for(&self, weekday: chrono::Weekday) -> &[TimeRange] {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        for day in &self.days {
            validate_ranges(day)?;
        }
        Ok(())
    }
}

/// Date-specific exception. `Open` wholly replaces the weekday pattern
/// for that date — no merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayException {
    Closed,
    Open(Vec<TimeRange>),
}

/// Applicability predicate of a pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleKind {
    /// Booking starts inside this minutes-of-day window.
    TimeOfDay { window: TimeRange },
    /// Booking starts on a flagged weekday (Monday-first).
    DayOfWeek { days: [bool; 7] },
    /// Booking starts on a date in `[from, to]` (inclusive).
    DateWindow { from: NaiveDate, to: NaiveDate },
    /// Booking lasts at least this long.
    MinDuration { min_ms: Ms },
    /// Always applicable while active; factor is a percentage off.
    Discount,
}

impl RuleKind {
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::TimeOfDay { .. } => "time_based",
            RuleKind::DayOfWeek { .. } => "day_based",
            RuleKind::DateWindow { .. } => "date_based",
            RuleKind::MinDuration { .. } => "duration_based",
            RuleKind::Discount => "discount",
        }
    }
}

/// A live pricing rule. Rules are evaluated in stored order; the stored
/// order is creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRule {
    pub id: Ulid,
    pub kind: RuleKind,
    /// Multiplier for predicate kinds, percentage off for `Discount`.
    pub factor: f64,
    pub active: bool,
}

/// One frozen breakdown entry: which rule fired and what it did to the
/// running price. `base + Σ effect_on_price = total` by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub rule_id: Ulid,
    pub rule_type: String,
    pub factor: f64,
    pub effect_on_price: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub space_id: Ulid,
    pub requester_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub total_price: Cents,
    /// Point-in-time ledger; never recomputed from live rules.
    pub breakdown: Vec<AppliedRule>,
    pub access_code: u32,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub created_at: Ms,
}

impl Booking {
    /// Live bookings hold the space; terminal ones are history.
    pub fn is_live(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Per-space aggregate: calendar, pricing rules, and the full booking
/// history. Bookings are kept sorted by `span.start` and never removed —
/// cancellation and rejection are states, not deletions.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub base_price: Cents,
    pub schedule: WeekSchedule,
    pub exceptions: BTreeMap<NaiveDate, DayException>,
    pub rules: Vec<PriceRule>,
    pub bookings: Vec<Booking>,
}

impl SpaceState {
    pub fn new(
        id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        base_price: Cents,
        schedule: WeekSchedule,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            base_price,
            schedule,
            exceptions: BTreeMap::new(),
            rules: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window, any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping_bookings(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn rule(&self, id: Ulid) -> Option<&PriceRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// The event types — flat where possible. This is both the WAL record
/// format and the domain-event vocabulary broadcast to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpaceRegistered {
        id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        base_price: Cents,
        schedule: WeekSchedule,
    },
    SpaceRemoved {
        id: Ulid,
    },
    ScheduleReplaced {
        space_id: Ulid,
        schedule: WeekSchedule,
    },
    ExceptionSet {
        space_id: Ulid,
        date: NaiveDate,
        exception: DayException,
    },
    ExceptionCleared {
        space_id: Ulid,
        date: NaiveDate,
    },
    RuleAdded {
        id: Ulid,
        space_id: Ulid,
        kind: RuleKind,
        factor: f64,
        active: bool,
    },
    RuleUpdated {
        id: Ulid,
        space_id: Ulid,
        kind: RuleKind,
        factor: f64,
        active: bool,
    },
    RuleRemoved {
        id: Ulid,
        space_id: Ulid,
    },
    BasePriceChanged {
        space_id: Ulid,
        base_price: Cents,
    },
    /// Carries the full frozen booking — breakdown included — so the
    /// event log is the booking's immutable ledger entry.
    BookingRequested {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        space_id: Ulid,
    },
    BookingRejected {
        id: Ulid,
        space_id: Ulid,
    },
    BookingCanceled {
        id: Ulid,
        space_id: Ulid,
    },
    CheckedIn {
        id: Ulid,
        space_id: Ulid,
        at: Ms,
    },
    CheckedOut {
        id: Ulid,
        space_id: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        space_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub base_price: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            space_id: Ulid::new(),
            requester_id: Ulid::new(),
            span: Span::new(start, end),
            status: BookingStatus::Pending,
            total_price: 500,
            breakdown: Vec::new(),
            access_code: 123_456,
            checked_in_at: None,
            checked_out_at: None,
            created_at: 0,
        }
    }

    fn empty_space() -> SpaceState {
        SpaceState::new(Ulid::new(), Ulid::new(), None, 500, WeekSchedule::closed())
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn time_range_covers() {
        let r = TimeRange::new(540, 1080); // 09:00–18:00
        assert!(r.covers(540, 1080));
        assert!(r.covers(600, 660));
        assert!(!r.covers(500, 600));
        assert!(!r.covers(600, 1081));
    }

    #[test]
    fn validate_ranges_rejects_overlap() {
        let ok = vec![TimeRange::new(0, 360), TimeRange::new(360, 720)];
        assert!(validate_ranges(&ok).is_ok());

        let overlapping = vec![TimeRange::new(0, 400), TimeRange::new(360, 720)];
        assert!(validate_ranges(&overlapping).is_err());

        let unsorted = vec![TimeRange::new(600, 720), TimeRange::new(0, 360)];
        assert!(validate_ranges(&unsorted).is_err());

        let past_midnight = vec![TimeRange { start_min: 1400, end_min: 1441 }];
        assert!(validate_ranges(&past_midnight).is_err());
    }

    #[test]
    fn schedule_weekday_lookup() {
        let mut schedule = WeekSchedule::closed();
        schedule.days[0] = vec![TimeRange::new(540, 1080)];
        assert_eq!(
            schedule.ranges_for(chrono::Weekday::Mon),
            &[TimeRange::new(540, 1080)]
        );
        assert!(schedule.ranges_for(chrono::Weekday::Tue).is_empty());
    }

    #[test]
    fn booking_ordering() {
        let mut ss = empty_space();
        ss.insert_booking(dummy_booking(300, 400));
        ss.insert_booking(dummy_booking(100, 200));
        ss.insert_booking(dummy_booking(200, 300));
        assert_eq!(ss.bookings[0].span.start, 100);
        assert_eq!(ss.bookings[1].span.start, 200);
        assert_eq!(ss.bookings[2].span.start, 300);
    }

    #[test]
    fn overlapping_bookings_skips_disjoint() {
        let mut ss = empty_space();
        ss.insert_booking(dummy_booking(100, 200));
        ss.insert_booking(dummy_booking(450, 600));
        ss.insert_booking(dummy_booking(1000, 1100));

        let query = Span::new(500, 800);
        let hits: Vec<_> = ss.overlapping_bookings(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Booking ending exactly at query.start is NOT overlapping (half-open)
        let mut ss = empty_space();
        ss.insert_booking(dummy_booking(100, 200));
        let hits: Vec<_> = ss.overlapping_bookings(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn liveness_by_status() {
        let mut b = dummy_booking(0, 100);
        for (status, live) in [
            (BookingStatus::Pending, true),
            (BookingStatus::Confirmed, true),
            (BookingStatus::Canceled, false),
            (BookingStatus::Completed, false),
            (BookingStatus::Rejected, false),
        ] {
            b.status = status;
            assert_eq!(b.is_live(), live, "{}", status.as_str());
        }
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            booking: dummy_booking(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn exception_event_roundtrip() {
        let event = Event::ExceptionSet {
            space_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            exception: DayException::Open(vec![TimeRange::new(600, 720)]),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
