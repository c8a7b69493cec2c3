use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::params;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };
    let sql = if include_inactive {
        "SELECT id, name, phone, email, active FROM instructors ORDER BY name, id"
    } else {
        "SELECT id, name, phone, email, active FROM instructors WHERE active = 1 ORDER BY name, id"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "phone": r.get::<_, Option<String>>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(instructors) => ok(&req.id, json!({ "instructors": instructors })),
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
    let phone = match parse_opt_string(req.params.get("phone")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("phone {}", m), None),
    };
    let email = match parse_opt_string(req.params.get("email")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("email {}", m), None),
    };

    let instructor_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO instructors(id, name, phone, email, active) VALUES(?, ?, ?, ?, 1)",
        params![instructor_id, name, phone, email],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "instructorId": instructor_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instructor_id = match required_str(req, "instructorId") {
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
            "phone" | "email" => {
                fields.push(format!("{} = ?", k));
                if v.is_null() {
                    values.push(rusqlite::types::Value::Null);
                } else if let Some(s) = v.as_str() {
                    values.push(rusqlite::types::Value::Text(s.trim().to_string()));
                } else {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("patch.{} must be string or null", k),
                        None,
                    );
                }
            }
            "active" => {
                let Some(b) = v.as_bool() else {
                    return err(&req.id, "bad_params", "patch.active must be boolean", None);
                };
                fields.push("active = ?".to_string());
                values.push(rusqlite::types::Value::Integer(if b { 1 } else { 0 }));
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(rusqlite::types::Value::Text(instructor_id));
    let sql = format!("UPDATE instructors SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "instructor not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let instructor_id = match required_str(req, "instructorId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM instructors WHERE id = ?", &instructor_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "instructor not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match row_exists(
        conn,
        "SELECT 1 FROM course_instances WHERE instructor_id = ? LIMIT 1",
        &instructor_id,
    ) {
        Ok(true) => {
            return err(
                &req.id,
                "in_use",
                "instructor still has course instances",
                None,
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match conn.execute("DELETE FROM instructors WHERE id = ?", [&instructor_id]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "instructors.list" => Some(handle_list(state, req)),
        "instructors.create" => Some(handle_create(state, req)),
        "instructors.update" => Some(handle_update(state, req)),
        "instructors.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
