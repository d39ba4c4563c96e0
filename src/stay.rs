use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{BookingMode, Minute, Span, Stay};

/// Start of `date` on the minute line.
pub fn day_start(date: NaiveDate) -> Minute {
    date.num_days_from_ce() as i64 * MINUTES_PER_DAY
}

fn minute_of_day_floor(t: NaiveTime) -> Minute {
    (t.num_seconds_from_midnight() / 60) as Minute
}

fn minute_of_day_ceil(t: NaiveTime) -> Minute {
    t.num_seconds_from_midnight().div_ceil(60) as Minute
}

impl Stay {
    pub fn nightly(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Stay::Nightly { check_in, check_out }
    }

    pub fn hourly(date: NaiveDate, from: NaiveTime, to: NaiveTime) -> Self {
        Stay::Hourly { date, from, to }
    }

    pub fn mode(&self) -> BookingMode {
        match self {
            Stay::Nightly { .. } => BookingMode::Nightly,
            Stay::Hourly { .. } => BookingMode::Hourly,
        }
    }

    /// First calendar date the stay touches.
    pub fn first_date(&self) -> NaiveDate {
        match *self {
            Stay::Nightly { check_in, .. } => check_in,
            Stay::Hourly { date, .. } => date,
        }
    }

    /// Instant the stay begins. A nightly stay begins at the start of its check-in day.
    pub fn check_in_instant(&self) -> NaiveDateTime {
        match *self {
            Stay::Nightly { check_in, .. } => check_in.and_time(NaiveTime::MIN),
            Stay::Hourly { date, from, .. } => date.and_time(from),
        }
    }

    pub fn check_out_instant(&self) -> NaiveDateTime {
        match *self {
            Stay::Nightly { check_out, .. } => check_out.and_time(NaiveTime::MIN),
            Stay::Hourly { date, to, .. } => date.and_time(to),
        }
    }

    /// Enforce the shape invariants of the stay.
    ///
    /// Nightly: `check_out > check_in` and at most `MAX_NIGHTS` nights.
    /// Hourly: `to > from` on the same date (no cross-midnight spans) and a
    /// duration within `[3h, 12h]`, both bounds inclusive.
    pub fn validate(self) -> Result<Stay, EngineError> {
        match self {
            Stay::Nightly { check_in, check_out } => {
                if check_out <= check_in {
                    return Err(EngineError::Validation(format!(
                        "check-out {check_out} must be after check-in {check_in}"
                    )));
                }
                let nights = (check_out - check_in).num_days();
                if !(MIN_NIGHTS..=MAX_NIGHTS).contains(&nights) {
                    return Err(EngineError::InvalidDuration(format!(
                        "{nights} nights outside [{MIN_NIGHTS}, {MAX_NIGHTS}]"
                    )));
                }
            }
            Stay::Hourly { from, to, .. } => {
                if to <= from {
                    return Err(EngineError::Validation(format!(
                        "day-use stay must end after it starts on the same date ({from}..{to})"
                    )));
                }
                let secs = (to - from).num_seconds();
                if !(MIN_DAY_USE_SECS..=MAX_DAY_USE_SECS).contains(&secs) {
                    return Err(EngineError::InvalidDuration(format!(
                        "day-use of {:.2}h outside [{}h, {}h]",
                        secs as f64 / 3600.0,
                        MIN_DAY_USE_MINUTES / 60,
                        MAX_DAY_USE_MINUTES / 60
                    )));
                }
            }
        }
        Ok(self)
    }

    /// Reject stays that start in the past relative to the server clock.
    pub fn ensure_not_past(&self, now: NaiveDateTime) -> Result<(), EngineError> {
        match *self {
            Stay::Nightly { check_in, .. } if check_in < now.date() => Err(EngineError::Validation(
                format!("check-in {check_in} is before today {}", now.date()),
            )),
            Stay::Hourly { .. } if self.check_in_instant() < now => Err(EngineError::Validation(
                format!("day-use start {} has already passed", self.check_in_instant()),
            )),
            _ => Ok(()),
        }
    }

    /// Whether two stays on the same room exclude each other.
    ///
    /// Nightly vs nightly: `[check_in, check_out)` date ranges intersect, so a
    /// checkout and a check-in on the same day never collide. Hourly vs hourly:
    /// same date and `[from, to)` ranges intersect. Nightly vs hourly: the
    /// day-use date falls anywhere in `[check_in, check_out]`; a nightly stay
    /// blocks every hour of its check-in and checkout days.
    pub fn overlaps(&self, other: &Stay) -> bool {
        match (*self, *other) {
            (
                Stay::Nightly { check_in: a_in, check_out: a_out },
                Stay::Nightly { check_in: b_in, check_out: b_out },
            ) => a_in < b_out && b_in < a_out,
            (
                Stay::Hourly { date: a_date, from: a_from, to: a_to },
                Stay::Hourly { date: b_date, from: b_from, to: b_to },
            ) => a_date == b_date && a_from < b_to && b_from < a_to,
            (Stay::Nightly { check_in, check_out }, Stay::Hourly { date, .. })
            | (Stay::Hourly { date, .. }, Stay::Nightly { check_in, check_out }) => {
                check_in <= date && date <= check_out
            }
        }
    }

    /// Superset of everything this stay can conflict with, on the minute line.
    /// Nightly footprints include the whole checkout day.
    pub fn footprint(&self) -> Span {
        match *self {
            Stay::Nightly { check_in, check_out } => {
                Span::new(day_start(check_in), day_start(check_out) + MINUTES_PER_DAY)
            }
            Stay::Hourly { date, from, to } => {
                let base = day_start(date);
                let start = base + minute_of_day_floor(from);
                let end = (base + minute_of_day_ceil(to)).max(start + 1);
                Span::new(start, end)
            }
        }
    }

    /// Nights this stay occupies on the day-number line (`num_days_from_ce`).
    /// A day-use stay occupies the night of its date.
    pub fn night_span(&self) -> Span {
        match *self {
            Stay::Nightly { check_in, check_out } => Span::new(
                check_in.num_days_from_ce() as i64,
                check_out.num_days_from_ce() as i64,
            ),
            Stay::Hourly { date, .. } => {
                let d = date.num_days_from_ce() as i64;
                Span::new(d, d + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn nightly(a: u32, b: u32) -> Stay {
        Stay::nightly(date(2024, 1, a), date(2024, 1, b))
    }

    fn hourly(d: u32, from: (u32, u32), to: (u32, u32)) -> Stay {
        Stay::hourly(date(2024, 1, d), time(from.0, from.1), time(to.0, to.1))
    }

    #[test]
    fn nightly_requires_checkout_after_checkin() {
        assert!(nightly(10, 12).validate().is_ok());
        assert!(matches!(nightly(10, 10).validate(), Err(EngineError::Validation(_))));
        assert!(matches!(nightly(12, 10).validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn nightly_length_capped() {
        let thirty = Stay::nightly(date(2024, 1, 1), date(2024, 1, 31));
        assert!(thirty.validate().is_ok());
        let thirty_one = Stay::nightly(date(2024, 1, 1), date(2024, 2, 1));
        assert!(matches!(thirty_one.validate(), Err(EngineError::InvalidDuration(_))));
    }

    #[test]
    fn hourly_duration_bounds_inclusive() {
        assert!(hourly(10, (9, 0), (12, 0)).validate().is_ok()); // exactly 3h
        assert!(hourly(10, (8, 0), (20, 0)).validate().is_ok()); // exactly 12h
        // 2.9h and 12.1h
        assert!(matches!(
            hourly(10, (9, 0), (11, 54)).validate(),
            Err(EngineError::InvalidDuration(_))
        ));
        assert!(matches!(
            hourly(10, (8, 0), (20, 6)).validate(),
            Err(EngineError::InvalidDuration(_))
        ));
    }

    #[test]
    fn hourly_rejects_cross_midnight_and_empty() {
        assert!(matches!(
            hourly(10, (20, 0), (2, 0)).validate(),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            hourly(10, (9, 0), (9, 0)).validate(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn nightly_back_to_back_do_not_overlap() {
        assert!(!nightly(10, 12).overlaps(&nightly(12, 14)));
        assert!(!nightly(12, 14).overlaps(&nightly(10, 12)));
        assert!(nightly(10, 13).overlaps(&nightly(12, 14)));
        assert!(nightly(10, 20).overlaps(&nightly(12, 14)));
    }

    #[test]
    fn hourly_same_date_half_open() {
        assert!(hourly(10, (9, 0), (13, 0)).overlaps(&hourly(10, (12, 0), (16, 0))));
        assert!(!hourly(10, (9, 0), (13, 0)).overlaps(&hourly(10, (13, 0), (17, 0))));
        assert!(!hourly(10, (9, 0), (13, 0)).overlaps(&hourly(11, (9, 0), (13, 0))));
    }

    #[test]
    fn nightly_blocks_whole_days_including_checkout() {
        let stay = nightly(10, 12);
        assert!(stay.overlaps(&hourly(10, (14, 0), (18, 0))));
        assert!(stay.overlaps(&hourly(11, (9, 0), (13, 0))));
        // checkout day is blocked for day-use
        assert!(stay.overlaps(&hourly(12, (15, 0), (19, 0))));
        assert!(hourly(12, (15, 0), (19, 0)).overlaps(&stay));
        assert!(!stay.overlaps(&hourly(13, (9, 0), (13, 0))));
        assert!(!stay.overlaps(&hourly(9, (9, 0), (13, 0))));
    }

    #[test]
    fn footprint_covers_every_conflict() {
        let stay = nightly(10, 12);
        let fp = stay.footprint();
        assert_eq!(fp.len(), 3 * MINUTES_PER_DAY);
        let checkout_day_use = hourly(12, (15, 0), (19, 0));
        assert!(fp.overlaps(&checkout_day_use.footprint()));

        let day_use = hourly(10, (9, 30), (13, 0));
        assert_eq!(day_use.footprint().len(), 210);
    }

    #[test]
    fn check_in_instants() {
        assert_eq!(nightly(10, 12).check_in_instant(), date(2024, 1, 10).and_time(NaiveTime::MIN));
        assert_eq!(
            hourly(10, (9, 30), (13, 0)).check_in_instant(),
            date(2024, 1, 10).and_time(time(9, 30))
        );
    }

    #[test]
    fn past_stays_rejected() {
        let now = date(2024, 1, 10).and_time(time(11, 0));
        assert!(nightly(10, 12).ensure_not_past(now).is_ok()); // today is fine
        assert!(nightly(9, 12).ensure_not_past(now).is_err());
        assert!(hourly(10, (12, 0), (16, 0)).ensure_not_past(now).is_ok());
        assert!(hourly(10, (10, 0), (14, 0)).ensure_not_past(now).is_err());
    }

    #[test]
    fn night_spans() {
        assert_eq!(nightly(10, 12).night_span().len(), 2);
        assert_eq!(hourly(10, (9, 0), (13, 0)).night_span().len(), 1);
    }
}
