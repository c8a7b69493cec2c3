use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_date, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::schedule::lessons::{combined_storage_orders, LessonMode};
use crate::schedule::{store, DATE_FMT};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn instance_to_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "courseId": r.get::<_, String>(1)?,
        "institutionId": r.get::<_, String>(2)?,
        "instructorId": r.get::<_, String>(3)?,
        "gradeLabel": r.get::<_, String>(4)?,
        "lessonMode": r.get::<_, String>(5)?,
        "startDate": r.get::<_, String>(6)?,
        "endDate": r.get::<_, Option<String>>(7)?,
    }))
}

const INSTANCE_COLUMNS: &str =
    "id, course_id, institution_id, instructor_id, grade_label, lesson_mode, start_date, end_date";

fn default_lesson_mode(conn: &rusqlite::Connection) -> LessonMode {
    crate::db::settings_get_json(conn, "setup.scheduling")
        .ok()
        .flatten()
        .and_then(|v| {
            v.get("defaultLessonMode")
                .and_then(|m| m.as_str())
                .and_then(LessonMode::parse)
        })
        .unwrap_or(LessonMode::Template)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match parse_opt_string(req.params.get("courseId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("courseId {}", m), None),
    };
    let institution_id = match parse_opt_string(req.params.get("institutionId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("institutionId {}", m), None),
    };

    let mut where_clause = String::from("1=1");
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(course_id) = course_id {
        where_clause.push_str(" AND course_id = ?");
        values.push(rusqlite::types::Value::Text(course_id));
    }
    if let Some(institution_id) = institution_id {
        where_clause.push_str(" AND institution_id = ?");
        values.push(rusqlite::types::Value::Text(institution_id));
    }
    let sql = format!(
        "SELECT {} FROM course_instances WHERE {} ORDER BY start_date, id",
        INSTANCE_COLUMNS, where_clause
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let instances = match stmt
        .query_map(rusqlite::params_from_iter(values), instance_to_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "instances": instances }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sql = format!(
        "SELECT {} FROM course_instances WHERE id = ?",
        INSTANCE_COLUMNS
    );
    match conn
        .query_row(&sql, [&instance_id], instance_to_json)
        .optional()
    {
        Ok(Some(instance)) => ok(&req.id, json!({ "instance": instance })),
        Ok(None) => err(&req.id, "not_found", "course instance not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
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
    let institution_id = match required_str(req, "institutionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let instructor_id = match required_str(req, "instructorId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id) in [
        ("courses", &course_id),
        ("institutions", &institution_id),
        ("instructors", &instructor_id),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        match row_exists(conn, &sql, id) {
            Ok(true) => {}
            Ok(false) => {
                return err(&req.id, "not_found", format!("{} row not found", table), None)
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    let grade_label = match parse_opt_string(req.params.get("gradeLabel")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("gradeLabel {}", m), None),
    };
    let lesson_mode = match parse_opt_string(req.params.get("lessonMode")) {
        Ok(Some(raw)) => match LessonMode::parse(&raw) {
            Some(m) => m,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "lessonMode must be one of: template, custom_only, combined",
                    None,
                )
            }
        },
        Ok(None) => default_lesson_mode(conn),
        Err(m) => return err(&req.id, "bad_params", format!("lessonMode {}", m), None),
    };
    let start_date = match parse_opt_date(req.params.get("startDate")) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing startDate", None),
        Err(m) => return err(&req.id, "bad_params", format!("startDate {}", m), None),
    };
    let end_date = match parse_opt_date(req.params.get("endDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("endDate {}", m), None),
    };
    if let Some(end) = end_date {
        if end < start_date {
            return err(&req.id, "bad_params", "endDate must not precede startDate", None);
        }
    }

    let instance_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_instances(
            id, course_id, institution_id, instructor_id, grade_label, lesson_mode, start_date, end_date
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            instance_id,
            course_id,
            institution_id,
            instructor_id,
            grade_label,
            lesson_mode.as_str(),
            start_date.format(DATE_FMT).to_string(),
            end_date.map(|d| d.format(DATE_FMT).to_string())
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "courseInstanceId": instance_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
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
            "gradeLabel" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.gradeLabel must be string", None);
                };
                fields.push("grade_label = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.trim().to_string()));
            }
            "instructorId" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "patch.instructorId must be a non-empty string", None);
                };
                match row_exists(conn, "SELECT 1 FROM instructors WHERE id = ?", s) {
                    Ok(true) => {}
                    Ok(false) => return err(&req.id, "not_found", "instructor not found", None),
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                }
                fields.push("instructor_id = ?".to_string());
                values.push(rusqlite::types::Value::Text(s.to_string()));
            }
            "startDate" => {
                let parsed = match parse_opt_date(Some(v)) {
                    Ok(Some(d)) => d,
                    Ok(None) => {
                        return err(&req.id, "bad_params", "patch.startDate must be a date", None)
                    }
                    Err(m) => {
                        return err(&req.id, "bad_params", format!("patch.startDate {}", m), None)
                    }
                };
                fields.push("start_date = ?".to_string());
                values.push(rusqlite::types::Value::Text(
                    parsed.format(DATE_FMT).to_string(),
                ));
            }
            "endDate" => {
                fields.push("end_date = ?".to_string());
                match parse_opt_date(Some(v)) {
                    Ok(Some(d)) => values.push(rusqlite::types::Value::Text(
                        d.format(DATE_FMT).to_string(),
                    )),
                    Ok(None) => values.push(rusqlite::types::Value::Null),
                    Err(m) => {
                        return err(&req.id, "bad_params", format!("patch.endDate {}", m), None)
                    }
                }
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(rusqlite::types::Value::Text(instance_id));
    let sql = format!(
        "UPDATE course_instances SET {} WHERE id = ?",
        fields.join(", ")
    );
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "course instance not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM course_instances WHERE id = ?", &instance_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course instance not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Dependency order: task records -> occurrences -> instance lessons
    // -> pattern -> the instance row.
    let steps = [
        "DELETE FROM lesson_task_records WHERE course_instance_id = ?",
        "DELETE FROM physical_schedules WHERE course_instance_id = ?",
        "DELETE FROM lessons WHERE course_instance_id = ?",
        "DELETE FROM schedule_patterns WHERE course_instance_id = ?",
        "DELETE FROM course_instances WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&instance_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_set_lesson_mode(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instance_id = match required_str(req, "courseInstanceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode_raw = match required_str(req, "lessonMode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(mode) = LessonMode::parse(&mode_raw) else {
        return err(
            &req.id,
            "bad_params",
            "lessonMode must be one of: template, custom_only, combined",
            None,
        );
    };
    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM course_instances WHERE id = ?",
            [&instance_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "course instance not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE course_instances SET lesson_mode = ? WHERE id = ?",
        params![mode.as_str(), instance_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Combined mode renumbers the instance block to follow the template
    // block so stored orderIndex values stay meaningful.
    if mode == LessonMode::Combined {
        let template = match store::read_lessons(&tx, &course_id, None) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        let instance_lessons = match store::read_lessons(&tx, &course_id, Some(&instance_id)) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        for (lesson_id, sort_order) in combined_storage_orders(template.len(), &instance_lessons) {
            if let Err(e) = tx.execute(
                "UPDATE lessons SET sort_order = ? WHERE id = ?",
                params![sort_order, lesson_id],
            ) {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "lessonMode": mode.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "instances.list" => Some(handle_list(state, req)),
        "instances.open" => Some(handle_open(state, req)),
        "instances.create" => Some(handle_create(state, req)),
        "instances.update" => Some(handle_update(state, req)),
        "instances.delete" => Some(handle_delete(state, req)),
        "instances.setLessonMode" => Some(handle_set_lesson_mode(state, req)),
        _ => None,
    }
}
