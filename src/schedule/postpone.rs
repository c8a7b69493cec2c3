use super::blocked::BlockedDateIndex;
use super::pattern::WeeklyPattern;
use super::sync::{OccurrenceRow, OccurrenceUpdate};
use super::{weekday_of, ScheduleError};
use chrono::{Duration, NaiveDate};
use serde_json::json;

/// Days to scan before concluding the pattern never matches. A weekly
/// pattern with at least one weekday always matches within 7 days, so
/// hitting this bound means corrupt data.
pub const PATTERN_SEARCH_DAYS: i64 = 14;
/// Additional days allowed to get past a run of blocked pattern days.
pub const BLOCKED_SEARCH_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBounds {
    pub pattern_days: i64,
    pub blocked_days: i64,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            pattern_days: PATTERN_SEARCH_DAYS,
            blocked_days: BLOCKED_SEARCH_DAYS,
        }
    }
}

/// The next pattern-matching, non-blocked day strictly after `after`.
/// Bounded in two phases: finding any pattern day at all, then walking
/// past blocked pattern days. Exhausting either bound fails the whole
/// operation without mutating anything.
pub fn next_slot(
    pattern: &WeeklyPattern,
    blocked: &BlockedDateIndex,
    after: NaiveDate,
    bounds: SearchBounds,
) -> Result<NaiveDate, ScheduleError> {
    let mut day = after;
    let mut candidate: Option<NaiveDate> = None;
    for _ in 0..bounds.pattern_days {
        day += Duration::days(1);
        if pattern.matches_weekday(weekday_of(day)) {
            candidate = Some(day);
            break;
        }
    }
    let Some(mut day) = candidate else {
        return Err(ScheduleError::new(
            "search_exhausted",
            format!(
                "no pattern day within {} days after {}",
                bounds.pattern_days, after
            ),
        )
        .with_details(json!({ "after": after.format(super::DATE_FMT).to_string() })));
    };

    let limit = day + Duration::days(bounds.blocked_days);
    while blocked.is_blocked(day) {
        loop {
            day += Duration::days(1);
            if day > limit {
                return Err(ScheduleError::new(
                    "search_exhausted",
                    format!(
                        "every pattern day within {} days after {} is blocked",
                        bounds.blocked_days, after
                    ),
                )
                .with_details(json!({ "after": after.format(super::DATE_FMT).to_string() })));
            }
            if pattern.matches_weekday(weekday_of(day)) {
                break;
            }
        }
    }
    Ok(day)
}

#[derive(Debug, Clone)]
pub struct PostponePlan {
    /// First entry is the postponed occurrence itself; the rest are the
    /// cascaded shifts in ascending date order.
    pub updates: Vec<OccurrenceUpdate>,
    pub new_start: chrono::NaiveDateTime,
}

/// Moves `target` to the next valid slot after its current date, then
/// re-threads every occurrence of the same instance scheduled on or
/// after the target's new date one pattern step forward from its own
/// date. Relative order is preserved; all dates move strictly forward.
pub fn plan_postpone(
    pattern: &WeeklyPattern,
    target: &OccurrenceRow,
    others: &[OccurrenceRow],
    blocked: &BlockedDateIndex,
    bounds: SearchBounds,
) -> Result<PostponePlan, ScheduleError> {
    let new_date = next_slot(pattern, blocked, target.scheduled_start.date(), bounds)?;
    // normalize() guarantees the slot exists for a pattern weekday.
    let slot = pattern
        .slot_for(weekday_of(new_date))
        .ok_or_else(|| ScheduleError::new("malformed_pattern", "pattern day has no time slot"))?;
    let new_start = new_date.and_time(slot.start);

    let mut updates = vec![OccurrenceUpdate {
        occurrence_id: target.id.clone(),
        lesson_number: target.lesson_number,
        scheduled_start: new_start,
        scheduled_end: new_date.and_time(slot.end),
    }];

    let mut cascade: Vec<&OccurrenceRow> = others
        .iter()
        .filter(|o| o.id != target.id && o.scheduled_start.date() >= new_date)
        .collect();
    cascade.sort_by(|a, b| {
        a.scheduled_start
            .cmp(&b.scheduled_start)
            .then_with(|| a.id.cmp(&b.id))
    });

    for row in cascade {
        let shifted = next_slot(pattern, blocked, row.scheduled_start.date(), bounds)?;
        let slot = pattern
            .slot_for(weekday_of(shifted))
            .ok_or_else(|| ScheduleError::new("malformed_pattern", "pattern day has no time slot"))?;
        updates.push(OccurrenceUpdate {
            occurrence_id: row.id.clone(),
            lesson_number: row.lesson_number,
            scheduled_start: shifted.and_time(slot.start),
            scheduled_end: shifted.and_time(slot.end),
        });
    }

    Ok(PostponePlan { updates, new_start })
}
