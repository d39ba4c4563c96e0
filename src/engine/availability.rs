use chrono::{Datelike, NaiveDate};

use crate::limits::MINUTES_PER_DAY;
use crate::model::*;
use crate::stay::day_start;

// ── Free-night computation ────────────────────────────────────────

/// Maximal runs of nights in `range` that a one-night stay could take.
///
/// A night `d` is blocked by a nightly hold covering it, and by a day-use hold
/// on `d` or `d + 1` (a nightly stay blocks its checkout day for day-use).
/// Adjacent free nights can always be booked together.
pub fn free_nights(rs: &RoomState, range: DateRange) -> Vec<DateRange> {
    let base = [range_to_days(range)];
    let blocked = blocked_nights(rs, range);
    subtract_intervals(&base, &blocked)
        .into_iter()
        .filter_map(days_to_range)
        .collect()
}

/// Nights (day numbers) blocked by holds touching `range`, sorted and merged.
pub fn blocked_nights(rs: &RoomState, range: DateRange) -> Vec<Span> {
    let window = Span::new(
        day_start(range.from),
        day_start(range.to) + MINUTES_PER_DAY,
    );
    let mut blocked: Vec<Span> = rs
        .overlapping(&window)
        .map(|h| match h.stay {
            Stay::Nightly { .. } => h.stay.night_span(),
            Stay::Hourly { date, .. } => {
                let d = date.num_days_from_ce() as i64;
                Span::new(d - 1, d + 1)
            }
        })
        .collect();
    blocked.sort_by_key(|s| s.start);
    merge_overlapping(&blocked)
}

fn range_to_days(range: DateRange) -> Span {
    Span::new(
        range.from.num_days_from_ce() as i64,
        range.to.num_days_from_ce() as i64,
    )
}

fn days_to_range(span: Span) -> Option<DateRange> {
    let from = NaiveDate::from_num_days_from_ce_opt(i32::try_from(span.start).ok()?)?;
    let to = NaiveDate::from_num_days_from_ce_opt(i32::try_from(span.end).ok()?)?;
    Some(DateRange { from, to })
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
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

/// Subtract sorted, disjoint `to_remove` from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
