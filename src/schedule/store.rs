use super::blocked::BlockedSpan;
use super::generate::GeneratedOccurrence;
use super::lessons::LessonRef;
use super::pattern::WeeklyPattern;
use super::postpone::PostponePlan;
use super::sync::{CleanupStep, OccurrenceRow, SyncPlan};
use super::{DATETIME_FMT, DATE_FMT};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FMT).ok()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FMT).ok()
}

/// Raw persisted pattern for one course instance, or None. The caller
/// runs it through [`WeeklyPattern::normalize`]; nothing downstream
/// touches the stored JSON directly.
pub fn read_pattern_raw(
    conn: &Connection,
    course_instance_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT days_of_week_json, time_slots_json, total_lessons, lesson_duration_minutes
         FROM schedule_patterns
         WHERE course_instance_id = ?",
        [course_instance_id],
        |r| {
            let days_raw: String = r.get(0)?;
            let slots_raw: String = r.get(1)?;
            let total_lessons: Option<i64> = r.get(2)?;
            let duration: i64 = r.get(3)?;
            Ok(json!({
                "daysOfWeek": serde_json::from_str::<serde_json::Value>(&days_raw)
                    .unwrap_or_else(|_| json!([])),
                "timeSlots": serde_json::from_str::<serde_json::Value>(&slots_raw)
                    .unwrap_or_else(|_| json!({})),
                "totalLessons": total_lessons,
                "lessonDurationMinutes": duration,
            }))
        },
    )
    .optional()
}

/// Persists the canonical form; keyed uniquely by course instance.
pub fn upsert_pattern(
    conn: &Connection,
    course_instance_id: &str,
    pattern: &WeeklyPattern,
) -> rusqlite::Result<()> {
    let canonical = pattern.to_json();
    let days = canonical
        .get("daysOfWeek")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "[]".to_string());
    let slots = canonical
        .get("timeSlots")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());
    conn.execute(
        "INSERT INTO schedule_patterns(
            course_instance_id, days_of_week_json, time_slots_json, total_lessons, lesson_duration_minutes
         ) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(course_instance_id) DO UPDATE SET
            days_of_week_json = excluded.days_of_week_json,
            time_slots_json = excluded.time_slots_json,
            total_lessons = excluded.total_lessons,
            lesson_duration_minutes = excluded.lesson_duration_minutes",
        params![
            course_instance_id,
            days,
            slots,
            pattern.total_lessons,
            pattern.lesson_duration_minutes
        ],
    )?;
    Ok(())
}

fn occurrence_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<OccurrenceRow> {
    let id: String = r.get(0)?;
    let lesson_id: String = r.get(1)?;
    let lesson_number: i64 = r.get(2)?;
    let start_raw: String = r.get(3)?;
    let end_raw: String = r.get(4)?;
    let scheduled_start = parse_datetime(&start_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("bad scheduled_start {:?}", start_raw).into(),
        )
    })?;
    let scheduled_end = parse_datetime(&end_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("bad scheduled_end {:?}", end_raw).into(),
        )
    })?;
    Ok(OccurrenceRow {
        id,
        lesson_id,
        lesson_number,
        scheduled_start,
        scheduled_end,
    })
}

pub fn read_occurrences(
    conn: &Connection,
    course_instance_id: &str,
) -> rusqlite::Result<Vec<OccurrenceRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_id, lesson_number, scheduled_start, scheduled_end
         FROM physical_schedules
         WHERE course_instance_id = ?
         ORDER BY scheduled_start, id",
    )?;
    let rows = stmt.query_map([course_instance_id], occurrence_from_row)?;
    rows.collect()
}

/// One occurrence plus its owning course instance.
pub fn read_occurrence(
    conn: &Connection,
    occurrence_id: &str,
) -> rusqlite::Result<Option<(OccurrenceRow, String)>> {
    conn.query_row(
        "SELECT id, lesson_id, lesson_number, scheduled_start, scheduled_end, course_instance_id
         FROM physical_schedules
         WHERE id = ?",
        [occurrence_id],
        |r| {
            let row = occurrence_from_row(r)?;
            let instance: String = r.get(5)?;
            Ok((row, instance))
        },
    )
    .optional()
}

/// Lesson collection read: `course_instance_id` None selects the
/// course's template lessons, Some selects that instance's own lessons.
pub fn read_lessons(
    conn: &Connection,
    course_id: &str,
    course_instance_id: Option<&str>,
) -> rusqlite::Result<Vec<LessonRef>> {
    let sql = match course_instance_id {
        None => {
            "SELECT id, title, sort_order, course_instance_id
             FROM lessons
             WHERE course_id = ? AND course_instance_id IS NULL
             ORDER BY sort_order, id"
        }
        Some(_) => {
            "SELECT id, title, sort_order, course_instance_id
             FROM lessons
             WHERE course_id = ? AND course_instance_id = ?
             ORDER BY sort_order, id"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let map = |r: &rusqlite::Row<'_>| -> rusqlite::Result<LessonRef> {
        Ok(LessonRef {
            id: r.get(0)?,
            title: r.get(1)?,
            order_index: r.get(2)?,
            course_instance_id: r.get(3)?,
        })
    };
    let rows = match course_instance_id {
        None => stmt.query_map([course_id], map)?,
        Some(instance) => stmt.query_map([course_id, instance], map)?,
    };
    rows.collect()
}

pub fn read_blocked_spans(conn: &Connection) -> rusqlite::Result<Vec<BlockedSpan>> {
    let mut stmt =
        conn.prepare("SELECT start_date, end_date FROM blocked_dates ORDER BY start_date, id")?;
    let rows = stmt.query_map([], |r| {
        let start_raw: String = r.get(0)?;
        let end_raw: Option<String> = r.get(1)?;
        Ok((start_raw, end_raw))
    })?;
    let mut spans = Vec::new();
    for row in rows {
        let (start_raw, end_raw) = row?;
        // Unparseable reference rows are skipped rather than poisoning
        // every scheduling operation.
        let Some(start) = parse_date(&start_raw) else {
            log::warn!("skipping blocked date with bad start_date {:?}", start_raw);
            continue;
        };
        let end = match end_raw {
            None => None,
            Some(raw) => match parse_date(&raw) {
                Some(d) => Some(d),
                None => {
                    log::warn!("skipping blocked date with bad end_date {:?}", raw);
                    continue;
                }
            },
        };
        spans.push(BlockedSpan { start, end });
    }
    Ok(spans)
}

fn run_cleanup_steps(
    conn: &Connection,
    course_instance_id: &str,
    steps: &[CleanupStep],
) -> rusqlite::Result<()> {
    for step in steps {
        match step {
            CleanupStep::TaskRecords { lesson_id } => {
                conn.execute(
                    "DELETE FROM lesson_task_records
                     WHERE course_instance_id = ? AND lesson_id = ?",
                    params![course_instance_id, lesson_id],
                )?;
            }
        }
    }
    Ok(())
}

/// Executes a sync plan. Dependents are deleted before their occurrence
/// rows, deletes before updates and inserts; the caller wraps this in a
/// transaction so a rejected write leaves nothing half-applied.
pub fn apply_sync_plan(
    conn: &Connection,
    course_instance_id: &str,
    plan: &SyncPlan,
) -> rusqlite::Result<(usize, usize, usize)> {
    for removal in &plan.deletes {
        run_cleanup_steps(conn, course_instance_id, &removal.cleanup)?;
        conn.execute(
            "DELETE FROM physical_schedules WHERE id = ?",
            [&removal.occurrence_id],
        )?;
    }
    for update in &plan.updates {
        conn.execute(
            "UPDATE physical_schedules
             SET lesson_number = ?, scheduled_start = ?, scheduled_end = ?
             WHERE id = ?",
            params![
                update.lesson_number,
                format_datetime(update.scheduled_start),
                format_datetime(update.scheduled_end),
                update.occurrence_id
            ],
        )?;
    }
    for occ in &plan.creates {
        insert_occurrence(conn, course_instance_id, occ)?;
    }
    Ok((plan.creates.len(), plan.updates.len(), plan.deletes.len()))
}

pub fn insert_occurrence(
    conn: &Connection,
    course_instance_id: &str,
    occ: &GeneratedOccurrence,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO physical_schedules(
            id, course_instance_id, lesson_id, lesson_number, scheduled_start, scheduled_end
         ) VALUES(?, ?, ?, ?, ?, ?)",
        params![
            id,
            course_instance_id,
            occ.lesson_id,
            occ.lesson_number,
            format_datetime(occ.scheduled_start),
            format_datetime(occ.scheduled_end)
        ],
    )?;
    Ok(id)
}

/// Executes a postpone plan: in-place updates only, in plan order.
pub fn apply_postpone_plan(conn: &Connection, plan: &PostponePlan) -> rusqlite::Result<usize> {
    for update in &plan.updates {
        conn.execute(
            "UPDATE physical_schedules
             SET scheduled_start = ?, scheduled_end = ?
             WHERE id = ?",
            params![
                format_datetime(update.scheduled_start),
                format_datetime(update.scheduled_end),
                update.occurrence_id
            ],
        )?;
    }
    Ok(plan.updates.len())
}
