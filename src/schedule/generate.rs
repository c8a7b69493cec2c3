use super::blocked::BlockedDateIndex;
use super::lessons::LessonRef;
use super::pattern::WeeklyPattern;
use super::weekday_of;
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// One concrete meeting produced by a generation run; the store assigns
/// the occurrence id when it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOccurrence {
    pub lesson_id: String,
    pub lesson_number: i64,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
}

/// Greedy forward scan: the Nth pattern-matching, non-blocked day (in
/// date order) receives the Nth lesson (in source order). One lesson
/// per matching day; dates are strictly increasing with lesson number
/// by construction.
///
/// `end` = None walks until the lessons are exhausted. The blocked set
/// is finite, so the walk terminates for any nonempty pattern; an empty
/// pattern yields nothing rather than scanning forever.
pub fn generate_occurrences(
    pattern: &WeeklyPattern,
    lessons: &[LessonRef],
    start: NaiveDate,
    end: Option<NaiveDate>,
    blocked: &BlockedDateIndex,
) -> Vec<GeneratedOccurrence> {
    if lessons.is_empty() || pattern.days_of_week.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(lessons.len());
    let mut cursor = start;
    let mut lesson_cursor = 0usize;

    while lesson_cursor < lessons.len() {
        if let Some(end) = end {
            if cursor > end {
                break;
            }
        }
        let weekday = weekday_of(cursor);
        if pattern.matches_weekday(weekday) && !blocked.is_blocked(cursor) {
            // normalize() guarantees a slot for every pattern weekday.
            if let Some(slot) = pattern.slot_for(weekday) {
                out.push(GeneratedOccurrence {
                    lesson_id: lessons[lesson_cursor].id.clone(),
                    lesson_number: (lesson_cursor + 1) as i64,
                    scheduled_start: cursor.and_time(slot.start),
                    scheduled_end: cursor.and_time(slot.end),
                });
                lesson_cursor += 1;
            }
        }
        cursor += Duration::days(1);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::blocked::BlockedSpan;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn mon_wed_pattern() -> WeeklyPattern {
        WeeklyPattern::normalize(&json!({
            "daysOfWeek": [1, 3],
            "timeSlots": {
                "1": { "start": "08:00", "end": "08:45" },
                "3": { "start": "08:00", "end": "08:45" }
            },
            "totalLessons": 3,
            "lessonDurationMinutes": 45
        }))
        .unwrap()
    }

    fn lessons(n: usize) -> Vec<LessonRef> {
        (0..n)
            .map(|i| LessonRef {
                id: format!("lesson-{}", i + 1),
                title: format!("Lesson {}", i + 1),
                order_index: i as i64,
                course_instance_id: None,
            })
            .collect()
    }

    #[test]
    fn assigns_lessons_to_matching_days_in_order() {
        // 2024-01-01 was a Monday.
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &lessons(3),
            d(2024, 1, 1),
            Some(d(2024, 1, 31)),
            &BlockedDateIndex::default(),
        );
        assert_eq!(out.len(), 3);
        let dates: Vec<NaiveDate> = out.iter().map(|o| o.scheduled_start.date()).collect();
        assert_eq!(dates, vec![d(2024, 1, 1), d(2024, 1, 3), d(2024, 1, 8)]);
        assert_eq!(out[0].lesson_number, 1);
        assert_eq!(out[2].lesson_number, 3);
        assert_eq!(
            out[0].scheduled_start.time(),
            chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
        assert_eq!(
            out[0].scheduled_end.time(),
            chrono::NaiveTime::from_hms_opt(8, 45, 0).unwrap()
        );
    }

    #[test]
    fn skips_blocked_days() {
        let blocked = BlockedDateIndex::build(&[BlockedSpan {
            start: d(2024, 1, 3),
            end: None,
        }]);
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &lessons(3),
            d(2024, 1, 1),
            Some(d(2024, 1, 31)),
            &blocked,
        );
        let dates: Vec<NaiveDate> = out.iter().map(|o| o.scheduled_start.date()).collect();
        assert_eq!(dates, vec![d(2024, 1, 1), d(2024, 1, 8), d(2024, 1, 10)]);
    }

    #[test]
    fn empty_lesson_list_yields_empty_output() {
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &[],
            d(2024, 1, 1),
            Some(d(2024, 1, 31)),
            &BlockedDateIndex::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn range_exhaustion_gives_partial_output() {
        // Only Jan 1 and Jan 3 fall inside the range.
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &lessons(5),
            d(2024, 1, 1),
            Some(d(2024, 1, 4)),
            &BlockedDateIndex::default(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn open_ended_range_runs_until_lessons_exhausted() {
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &lessons(10),
            d(2024, 1, 1),
            None,
            &BlockedDateIndex::default(),
        );
        assert_eq!(out.len(), 10);
        for pair in out.windows(2) {
            assert!(pair[0].scheduled_start < pair[1].scheduled_start);
        }
    }

    #[test]
    fn start_date_itself_can_match() {
        let out = generate_occurrences(
            &mon_wed_pattern(),
            &lessons(1),
            d(2024, 1, 1),
            None,
            &BlockedDateIndex::default(),
        );
        assert_eq!(out[0].scheduled_start.date(), d(2024, 1, 1));
    }

    #[test]
    fn per_day_slots_are_respected() {
        let pattern = WeeklyPattern::normalize(&json!({
            "daysOfWeek": [1, 3],
            "timeSlots": {
                "1": { "start": "08:00", "end": "08:45" },
                "3": { "start": "13:30", "end": "14:15" }
            },
            "lessonDurationMinutes": 45
        }))
        .unwrap();
        let out = generate_occurrences(
            &pattern,
            &lessons(2),
            d(2024, 1, 1),
            None,
            &BlockedDateIndex::default(),
        );
        assert_eq!(
            out[1].scheduled_start.time(),
            chrono::NaiveTime::from_hms_opt(13, 30, 0).unwrap()
        );
    }
}
