use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.description,
           (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id AND l.course_instance_id IS NULL) AS template_lesson_count,
           (SELECT COUNT(*) FROM course_instances ci WHERE ci.course_id = c.id) AS instance_count
         FROM courses c
         ORDER BY c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "templateLessonCount": r.get::<_, i64>(3)?,
                "instanceCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = conn
        .query_row(
            "SELECT id, name, description FROM courses WHERE id = ?",
            [&course_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "description": r.get::<_, String>(2)?,
                }))
            },
        )
        .optional();
    match row {
        Ok(Some(course)) => ok(&req.id, json!({ "course": course })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, name, description) VALUES(?, ?, ?)",
        params![course_id, name, description],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
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
            "name" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "patch.name must be a non-empty string", None);
                };
                fields.push("name = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.to_string()));
            }
            "description" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.description must be string", None);
                };
                fields.push("description = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.to_string()));
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(rusqlite::types::Value::Text(course_id));
    let sql = format!("UPDATE courses SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "course not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match row_exists(
        conn,
        "SELECT 1 FROM course_instances WHERE course_id = ? LIMIT 1",
        &course_id,
    ) {
        Ok(true) => {
            return err(&req.id, "in_use", "course still has instances", None);
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Dependency order: task records -> occurrences -> lessons -> course.
    // With no instances left these can only be template-lesson leftovers.
    let steps = [
        "DELETE FROM lesson_task_records WHERE lesson_id IN (SELECT id FROM lessons WHERE course_id = ?)",
        "DELETE FROM physical_schedules WHERE lesson_id IN (SELECT id FROM lessons WHERE course_id = ?)",
        "DELETE FROM lessons WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&course_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_list(state, req)),
        "courses.open" => Some(handle_open(state, req)),
        "courses.create" => Some(handle_create(state, req)),
        "courses.update" => Some(handle_update(state, req)),
        "courses.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
