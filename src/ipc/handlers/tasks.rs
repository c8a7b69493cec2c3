use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
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
    let lesson_id = match parse_opt_string(req.params.get("lessonId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonId {}", m), None),
    };

    let mut where_clause = String::from("course_instance_id = ?");
    let mut values: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Text(instance_id)];
    if let Some(lesson_id) = lesson_id {
        where_clause.push_str(" AND lesson_id = ?");
        values.push(rusqlite::types::Value::Text(lesson_id));
    }
    let sql = format!(
        "SELECT id, lesson_id, physical_schedule_id, title, completed_at
         FROM lesson_task_records
         WHERE {}
         ORDER BY lesson_id, id",
        where_clause
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tasks = match stmt
        .query_map(rusqlite::params_from_iter(values), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lessonId": r.get::<_, String>(1)?,
                "physicalScheduleId": r.get::<_, Option<String>>(2)?,
                "title": r.get::<_, String>(3)?,
                "completedAt": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "tasks": tasks }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM course_instances WHERE id = ?", &instance_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course instance not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // When the lesson already has a concrete occurrence in this
    // instance, pin the record to it.
    let schedule_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM physical_schedules
             WHERE course_instance_id = ? AND lesson_id = ?",
            params![instance_id, lesson_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let task_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lesson_task_records(
            id, course_instance_id, lesson_id, physical_schedule_id, title, completed_at
         ) VALUES(?, ?, ?, ?, ?, NULL)",
        params![task_id, instance_id, lesson_id, schedule_id, title],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "taskId": task_id }))
}

fn handle_set_completed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completed = match req.params.get("completed").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing completed", None),
    };
    let completed_at = if completed { Some(now_ts()) } else { None };
    match conn.execute(
        "UPDATE lesson_task_records SET completed_at = ? WHERE id = ?",
        params![completed_at, task_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "task record not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM lesson_task_records WHERE id = ?", [&task_id]) {
        Ok(0) => err(&req.id, "not_found", "task record not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.list" => Some(handle_list(state, req)),
        "tasks.create" => Some(handle_create(state, req)),
        "tasks.setCompleted" => Some(handle_set_completed(state, req)),
        "tasks.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
