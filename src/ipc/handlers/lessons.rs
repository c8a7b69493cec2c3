use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_i64, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn next_sort_order(
    conn: &Connection,
    course_id: &str,
    course_instance_id: Option<&str>,
) -> Result<i64, String> {
    let result: i64 = match course_instance_id {
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM lessons
                 WHERE course_id = ? AND course_instance_id IS NULL",
                [course_id],
                |r| r.get(0),
            )
            .map_err(|e| e.to_string())?,
        Some(instance) => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM lessons
                 WHERE course_id = ? AND course_instance_id = ?",
                params![course_id, instance],
                |r| r.get(0),
            )
            .map_err(|e| e.to_string())?,
    };
    Ok(result.max(0))
}

fn lesson_to_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "courseId": r.get::<_, String>(1)?,
        "courseInstanceId": r.get::<_, Option<String>>(2)?,
        "sortOrder": r.get::<_, i64>(3)?,
        "title": r.get::<_, String>(4)?,
        "detail": r.get::<_, String>(5)?,
        "durationMinutes": r.get::<_, Option<i64>>(6)?,
    }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_instance_id = match parse_opt_string(req.params.get("courseInstanceId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("courseInstanceId {}", m), None),
    };

    let sql = match course_instance_id {
        None => {
            "SELECT id, course_id, course_instance_id, sort_order, title, detail, duration_minutes
             FROM lessons
             WHERE course_id = ? AND course_instance_id IS NULL
             ORDER BY sort_order, id"
        }
        Some(_) => {
            "SELECT id, course_id, course_instance_id, sort_order, title, detail, duration_minutes
             FROM lessons
             WHERE course_id = ? AND course_instance_id = ?
             ORDER BY sort_order, id"
        }
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match course_instance_id {
        None => stmt.query_map([&course_id], lesson_to_json),
        Some(ref instance) => stmt.query_map(params![course_id, instance], lesson_to_json),
    };
    let lessons = match rows.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "lessons": lessons }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let course_instance_id = match parse_opt_string(req.params.get("courseInstanceId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("courseInstanceId {}", m), None),
    };
    if let Some(ref instance) = course_instance_id {
        let belongs = conn
            .query_row(
                "SELECT 1 FROM course_instances WHERE id = ? AND course_id = ?",
                params![instance, course_id],
                |_r| Ok(()),
            )
            .optional();
        match belongs {
            Ok(Some(())) => {}
            Ok(None) => {
                return err(
                    &req.id,
                    "not_found",
                    "course instance not found for course",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let detail = match parse_opt_string(req.params.get("detail")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("detail {}", m), None),
    };
    let duration_minutes = match parse_opt_i64(req.params.get("durationMinutes")) {
        Ok(Some(v)) if v > 0 => Some(v),
        Ok(Some(_)) => return err(&req.id, "bad_params", "durationMinutes must be > 0", None),
        Ok(None) => None,
        Err(m) => return err(&req.id, "bad_params", format!("durationMinutes {}", m), None),
    };
    let sort_order = match parse_opt_i64(req.params.get("sortOrder")) {
        Ok(Some(v)) if v >= 0 => v,
        Ok(Some(_)) => return err(&req.id, "bad_params", "sortOrder must be >= 0", None),
        Ok(None) => match next_sort_order(conn, &course_id, course_instance_id.as_deref()) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        },
        Err(m) => return err(&req.id, "bad_params", format!("sortOrder {}", m), None),
    };

    let lesson_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, course_id, course_instance_id, sort_order, title, detail, duration_minutes)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![
            lesson_id,
            course_id,
            course_instance_id,
            sort_order,
            title,
            detail,
            duration_minutes
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "lessonId": lesson_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut fields: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "patch.title must be a non-empty string", None);
                };
                fields.push("title = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.to_string()));
            }
            "detail" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.detail must be string", None);
                };
                fields.push("detail = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.to_string()));
            }
            "durationMinutes" => {
                fields.push("duration_minutes = ?".to_string());
                if v.is_null() {
                    values.push(rusqlite::types::Value::Null);
                } else if let Some(n) = v.as_i64() {
                    if n <= 0 {
                        return err(&req.id, "bad_params", "patch.durationMinutes must be > 0", None);
                    }
                    values.push(rusqlite::types::Value::Integer(n));
                } else {
                    return err(
                        &req.id,
                        "bad_params",
                        "patch.durationMinutes must be integer or null",
                        None,
                    );
                }
            }
            "sortOrder" => {
                let Some(n) = v.as_i64().filter(|n| *n >= 0) else {
                    return err(&req.id, "bad_params", "patch.sortOrder must be >= 0", None);
                };
                fields.push("sort_order = ?".to_string());
                values.push(rusqlite::types::Value::Integer(n));
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(rusqlite::types::Value::Text(lesson_id));
    let sql = format!("UPDATE lessons SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "lesson not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Dependency order: task records -> occurrences -> the lesson row.
    let steps = [
        "DELETE FROM lesson_task_records WHERE lesson_id = ?",
        "DELETE FROM physical_schedules WHERE lesson_id = ?",
        "DELETE FROM lessons WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&lesson_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_instance_id = match parse_opt_string(req.params.get("courseInstanceId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("courseInstanceId {}", m), None),
    };
    let Some(ids) = req.params.get("lessonIdOrder").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing lessonIdOrder", None);
    };
    let mut provided: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for v in ids {
        let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "lessonIdOrder must be non-empty strings", None);
        };
        if seen.insert(s.to_string()) {
            provided.push(s.to_string());
        }
    }

    let sql = match course_instance_id {
        None => {
            "SELECT id FROM lessons
             WHERE course_id = ? AND course_instance_id IS NULL
             ORDER BY sort_order, id"
        }
        Some(_) => {
            "SELECT id FROM lessons
             WHERE course_id = ? AND course_instance_id = ?
             ORDER BY sort_order, id"
        }
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_id = |r: &rusqlite::Row<'_>| r.get::<_, String>(0);
    let existing = match course_instance_id {
        None => stmt.query_map([&course_id], map_id),
        Some(ref instance) => stmt.query_map(params![course_id, instance], map_id),
    };
    let existing = match existing.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing_set: HashSet<String> = existing.iter().cloned().collect();
    for id in &provided {
        if !existing_set.contains(id) {
            return err(
                &req.id,
                "bad_params",
                format!("lesson id not found for scope: {}", id),
                None,
            );
        }
    }
    let mut final_order = provided;
    for id in existing {
        if !final_order.contains(&id) {
            final_order.push(id);
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (idx, id) in final_order.iter().enumerate() {
        if let Err(e) = tx.execute(
            "UPDATE lessons SET sort_order = ? WHERE id = ?",
            params![idx as i64, id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_list(state, req)),
        "lessons.create" => Some(handle_create(state, req)),
        "lessons.update" => Some(handle_update(state, req)),
        "lessons.delete" => Some(handle_delete(state, req)),
        "lessons.reorder" => Some(handle_reorder(state, req)),
        _ => None,
    }
}
