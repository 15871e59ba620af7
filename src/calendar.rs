//! Decomposition of the `Ms` axis into calendar days and minutes-of-day.
//!
//! Spans stay raw milliseconds everywhere; only the availability resolver
//! and the pricing predicates need to know what date or weekday an instant
//! falls on, and they come here for it.

use chrono::NaiveDate;

use crate::model::{Ms, Span};

pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_DAY: Ms = 86_400_000;
pub const MINUTES_PER_DAY: u16 = 1440;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

pub fn date_of(ms: Ms) -> NaiveDate {
    epoch() + chrono::Duration::days(ms.div_euclid(MS_PER_DAY))
}

pub fn minute_of_day(ms: Ms) -> u16 {
    (ms.rem_euclid(MS_PER_DAY) / MS_PER_MINUTE) as u16
}

/// Timestamp of `date` at `minute` minutes past midnight.
pub fn ms_at(date: NaiveDate, minute: u16) -> Ms {
    let days = date.signed_duration_since(epoch()).num_days();
    days * MS_PER_DAY + Ms::from(minute) * MS_PER_MINUTE
}

/// One calendar day's share of a multi-day span, in minutes-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySlice {
    pub date: NaiveDate,
    pub start_min: u16,
    pub end_min: u16,
}

/// Split a span at midnight boundaries. A day fully inside the span
/// yields `0..1440`. Sub-minute edges widen outward (start floors, end
/// ceils) so a slice never claims less coverage than the span needs.
pub fn day_slices(span: &Span) -> Vec<DaySlice> {
    let mut slices = Vec::new();
    let mut cur = span.start;
    while cur < span.end {
        let day_start = cur.div_euclid(MS_PER_DAY) * MS_PER_DAY;
        let day_end = day_start + MS_PER_DAY;
        let seg_end = span.end.min(day_end);
        let start_min = ((cur - day_start) / MS_PER_MINUTE) as u16;
        let end_min = if seg_end == day_end {
            MINUTES_PER_DAY
        } else {
            ((seg_end - day_start + MS_PER_MINUTE - 1) / MS_PER_MINUTE) as u16
        };
        slices.push(DaySlice {
            date: date_of(cur),
            start_min,
            end_min,
        });
        cur = seg_end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(date_of(0), d(1970, 1, 1));
        assert_eq!(minute_of_day(0), 0);
    }

    #[test]
    fn ms_at_roundtrips() {
        let date = d(2030, 1, 7);
        let ms = ms_at(date, 540); // 09:00
        assert_eq!(date_of(ms), date);
        assert_eq!(minute_of_day(ms), 540);
    }

    #[test]
    fn weekday_of_known_date() {
        // 2030-01-07 is a Monday.
        assert_eq!(d(2030, 1, 7).weekday(), chrono::Weekday::Mon);
        assert_eq!(d(2030, 1, 5).weekday(), chrono::Weekday::Sat);
    }

    #[test]
    fn single_day_slice() {
        let span = Span::new(ms_at(d(2030, 1, 7), 540), ms_at(d(2030, 1, 7), 1080));
        let slices = day_slices(&span);
        assert_eq!(
            slices,
            vec![DaySlice {
                date: d(2030, 1, 7),
                start_min: 540,
                end_min: 1080,
            }]
        );
    }

    #[test]
    fn midnight_spanning_slices() {
        // 22:00 Monday to 06:00 Tuesday
        let span = Span::new(ms_at(d(2030, 1, 7), 1320), ms_at(d(2030, 1, 8), 360));
        let slices = day_slices(&span);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], DaySlice { date: d(2030, 1, 7), start_min: 1320, end_min: 1440 });
        assert_eq!(slices[1], DaySlice { date: d(2030, 1, 8), start_min: 0, end_min: 360 });
    }

    #[test]
    fn full_interior_day() {
        // Monday noon to Wednesday noon: Tuesday must be 0..1440
        let span = Span::new(ms_at(d(2030, 1, 7), 720), ms_at(d(2030, 1, 9), 720));
        let slices = day_slices(&span);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[1], DaySlice { date: d(2030, 1, 8), start_min: 0, end_min: 1440 });
    }

    #[test]
    fn end_exactly_at_midnight() {
        let span = Span::new(ms_at(d(2030, 1, 7), 1320), ms_at(d(2030, 1, 8), 0));
        let slices = day_slices(&span);
        assert_eq!(
            slices,
            vec![DaySlice { date: d(2030, 1, 7), start_min: 1320, end_min: 1440 }]
        );
    }

    #[test]
    fn sub_minute_edges_widen() {
        let base = ms_at(d(2030, 1, 7), 540);
        // 09:00:30 → 17:59:30 needs coverage 09:00 → 18:00
        let span = Span::new(base + 30_000, ms_at(d(2030, 1, 7), 1079) + 30_000);
        let slices = day_slices(&span);
        assert_eq!(slices[0].start_min, 540);
        assert_eq!(slices[0].end_min, 1080);
    }
}
