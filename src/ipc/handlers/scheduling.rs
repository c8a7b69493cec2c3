use crate::db;
use crate::ipc::error::{err, err_schedule, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::blocked::BlockedDateIndex;
use crate::schedule::generate::{generate_occurrences, GeneratedOccurrence};
use crate::schedule::lessons::{resolve_lesson_source, LessonMode, LessonRef};
use crate::schedule::pattern::WeeklyPattern;
use crate::schedule::postpone::{plan_postpone, SearchBounds};
use crate::schedule::sync::plan_sync;
use crate::schedule::{store, DATE_FMT};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};

struct InstanceRow {
    course_id: String,
    lesson_mode: LessonMode,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
}

fn load_instance(conn: &Connection, instance_id: &str) -> Result<Option<InstanceRow>, String> {
    let row = conn
        .query_row(
            "SELECT course_id, lesson_mode, start_date, end_date
             FROM course_instances
             WHERE id = ?",
            [instance_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|e| e.to_string())?;
    let Some((course_id, mode_raw, start_raw, end_raw)) = row else {
        return Ok(None);
    };
    let lesson_mode = LessonMode::parse(&mode_raw)
        .ok_or_else(|| format!("stored lesson mode {:?} is invalid", mode_raw))?;
    let start_date = store::parse_date(&start_raw)
        .ok_or_else(|| format!("stored start date {:?} is invalid", start_raw))?;
    let end_date = match end_raw {
        None => None,
        Some(raw) => Some(
            store::parse_date(&raw).ok_or_else(|| format!("stored end date {:?} is invalid", raw))?,
        ),
    };
    Ok(Some(InstanceRow {
        course_id,
        lesson_mode,
        start_date,
        end_date,
    }))
}

fn load_lesson_source(
    conn: &Connection,
    instance: &InstanceRow,
    instance_id: &str,
) -> rusqlite::Result<Vec<LessonRef>> {
    let template = match instance.lesson_mode {
        LessonMode::CustomOnly => Vec::new(),
        _ => store::read_lessons(conn, &instance.course_id, None)?,
    };
    let custom = match instance.lesson_mode {
        LessonMode::Template => Vec::new(),
        _ => store::read_lessons(conn, &instance.course_id, Some(instance_id))?,
    };
    Ok(resolve_lesson_source(instance.lesson_mode, template, custom))
}

/// Blocked dates and the pattern are re-read on every operation; they
/// may change between calls.
fn load_blocked_index(conn: &Connection) -> rusqlite::Result<BlockedDateIndex> {
    let spans = store::read_blocked_spans(conn)?;
    Ok(BlockedDateIndex::build(&spans))
}

fn search_bounds(conn: &Connection) -> SearchBounds {
    let mut bounds = SearchBounds::default();
    if let Ok(Some(setup)) = db::settings_get_json(conn, "setup.scheduling") {
        if let Some(n) = setup.get("patternSearchDays").and_then(|v| v.as_i64()) {
            if n > 0 {
                bounds.pattern_days = n;
            }
        }
        if let Some(n) = setup.get("blockedSearchDays").and_then(|v| v.as_i64()) {
            if n > 0 {
                bounds.blocked_days = n;
            }
        }
    }
    bounds
}

fn default_lesson_duration(conn: &Connection) -> i64 {
    db::settings_get_json(conn, "setup.scheduling")
        .ok()
        .flatten()
        .and_then(|v| v.get("defaultLessonDurationMinutes").and_then(|n| n.as_i64()))
        .filter(|n| *n > 0)
        .unwrap_or(45)
}

fn occurrence_json(occ: &GeneratedOccurrence) -> JsonValue {
    json!({
        "lessonId": occ.lesson_id,
        "lessonNumber": occ.lesson_number,
        "scheduledStart": store::format_datetime(occ.scheduled_start),
        "scheduledEnd": store::format_datetime(occ.scheduled_end),
    })
}

/// Warnings surfaced (never silently resolved) when the advisory target
/// count or the date range disagrees with what was actually generated.
fn generation_warnings(
    pattern: &WeeklyPattern,
    lesson_count: usize,
    generated_count: usize,
) -> Vec<JsonValue> {
    let mut warnings = Vec::new();
    if generated_count < lesson_count {
        warnings.push(json!({
            "code": "shortfall",
            "lessonCount": lesson_count,
            "scheduledCount": generated_count,
        }));
    }
    if let Some(total) = pattern.total_lessons {
        if total != lesson_count as i64 {
            warnings.push(json!({
                "code": "totalLessonsMismatch",
                "totalLessons": total,
                "lessonCount": lesson_count,
            }));
        }
    }
    warnings
}

fn handle_get_pattern(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::read_pattern_raw(conn, &instance_id) {
        Ok(Some(raw)) => ok(&req.id, json!({ "pattern": raw })),
        Ok(None) => ok(&req.id, json!({ "pattern": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_upsert_pattern(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match load_instance(conn, &instance_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "course instance not found", None),
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    }
    let Some(raw) = req.params.get("pattern") else {
        return err(&req.id, "bad_params", "missing pattern", None);
    };

    // Fill the setup default before the single normalization pass so
    // the stored form is always complete.
    let mut raw = raw.clone();
    if raw.get("lessonDurationMinutes").map(|v| v.is_null()).unwrap_or(true) {
        if let Some(obj) = raw.as_object_mut() {
            obj.insert(
                "lessonDurationMinutes".to_string(),
                json!(default_lesson_duration(conn)),
            );
        }
    }
    let pattern = match WeeklyPattern::normalize(&raw) {
        Ok(p) => p,
        Err(e) => return err_schedule(&req.id, e),
    };
    if let Err(e) = store::upsert_pattern(conn, &instance_id, &pattern) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "pattern": pattern.to_json() }))
}

/// Loads everything one generation run needs. Errors come back as a
/// ready-to-send reply.
fn load_generation_inputs(
    conn: &Connection,
    req: &Request,
    instance_id: &str,
) -> Result<(InstanceRow, WeeklyPattern, Vec<LessonRef>, BlockedDateIndex), serde_json::Value> {
    let instance = match load_instance(conn, instance_id) {
        Ok(Some(v)) => v,
        Ok(None) => return Err(err(&req.id, "not_found", "course instance not found", None)),
        Err(m) => return Err(err(&req.id, "db_query_failed", m, None)),
    };
    let raw = match store::read_pattern_raw(conn, instance_id) {
        Ok(Some(v)) => v,
        Ok(None) => {
            return Err(err(
                &req.id,
                "not_found",
                "no schedule pattern for course instance",
                None,
            ))
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let pattern = match WeeklyPattern::normalize(&raw) {
        Ok(p) => p,
        Err(e) => return Err(err_schedule(&req.id, e)),
    };
    let lessons = match load_lesson_source(conn, &instance, instance_id) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let blocked = match load_blocked_index(conn) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    Ok((instance, pattern, lessons, blocked))
}

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (instance, pattern, lessons, blocked) =
        match load_generation_inputs(conn, req, &instance_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
    let generated = generate_occurrences(
        &pattern,
        &lessons,
        instance.start_date,
        instance.end_date,
        &blocked,
    );
    let warnings = generation_warnings(&pattern, lessons.len(), generated.len());
    ok(
        &req.id,
        json!({
            "occurrences": generated.iter().map(occurrence_json).collect::<Vec<_>>(),
            "warnings": warnings,
        }),
    )
}

fn handle_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (instance, pattern, lessons, blocked) =
        match load_generation_inputs(conn, req, &instance_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
    let generated = generate_occurrences(
        &pattern,
        &lessons,
        instance.start_date,
        instance.end_date,
        &blocked,
    );
    let existing = match store::read_occurrences(conn, &instance_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let plan = plan_sync(&generated, &existing);
    let warnings = generation_warnings(&pattern, lessons.len(), generated.len());

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let (created, updated, deleted) = match store::apply_sync_plan(&tx, &instance_id, &plan) {
        Ok(counts) => counts,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    log::info!(
        "schedule applied for instance {}: {} created, {} updated, {} deleted",
        instance_id,
        created,
        updated,
        deleted
    );
    ok(
        &req.id,
        json!({
            "created": created,
            "updated": updated,
            "deleted": deleted,
            "warnings": warnings,
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT ps.id, ps.lesson_id, ps.lesson_number, ps.scheduled_start, ps.scheduled_end, l.title
         FROM physical_schedules ps
         JOIN lessons l ON l.id = ps.lesson_id
         WHERE ps.course_instance_id = ?
         ORDER BY ps.scheduled_start, ps.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&instance_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lessonId": r.get::<_, String>(1)?,
                "lessonNumber": r.get::<_, i64>(2)?,
                "scheduledStart": r.get::<_, String>(3)?,
                "scheduledEnd": r.get::<_, String>(4)?,
                "lessonTitle": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(occurrences) => ok(&req.id, json!({ "occurrences": occurrences })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_postpone(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let occurrence_id = match required_str(req, "physicalScheduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (target, instance_id) = match store::read_occurrence(conn, &occurrence_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "occurrence not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let raw = match store::read_pattern_raw(conn, &instance_id) {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "no schedule pattern for course instance",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pattern = match WeeklyPattern::normalize(&raw) {
        Ok(p) => p,
        Err(e) => return err_schedule(&req.id, e),
    };
    let others = match store::read_occurrences(conn, &instance_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let blocked = match load_blocked_index(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // The whole cascade is planned before anything is written, so an
    // exhausted search bound mutates nothing.
    let plan = match plan_postpone(&pattern, &target, &others, &blocked, search_bounds(conn)) {
        Ok(p) => p,
        Err(e) => return err_schedule(&req.id, e),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let updated = match store::apply_postpone_plan(&tx, &plan) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    log::info!(
        "occurrence {} postponed to {}, {} occurrence(s) re-threaded",
        occurrence_id,
        plan.new_start.format(DATE_FMT),
        updated
    );
    ok(
        &req.id,
        json!({
            "updatedCount": updated,
            "newStart": store::format_datetime(plan.new_start),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.getPattern" => Some(handle_get_pattern(state, req)),
        "schedule.upsertPattern" => Some(handle_upsert_pattern(state, req)),
        "schedule.preview" => Some(handle_preview(state, req)),
        "schedule.apply" => Some(handle_apply(state, req)),
        "schedule.list" => Some(handle_list(state, req)),
        "schedule.postpone" => Some(handle_postpone(state, req)),
        _ => None,
    }
}
