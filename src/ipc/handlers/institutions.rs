use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::params;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           i.id,
           i.name,
           i.city,
           i.contact_name,
           i.phone,
           (SELECT COUNT(*) FROM course_instances ci WHERE ci.institution_id = i.id) AS instance_count
         FROM institutions i
         ORDER BY i.name, i.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "city": r.get::<_, Option<String>>(2)?,
                "contactName": r.get::<_, Option<String>>(3)?,
                "phone": r.get::<_, Option<String>>(4)?,
                "instanceCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(institutions) => ok(&req.id, json!({ "institutions": institutions })),
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
    let city = match parse_opt_string(req.params.get("city")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("city {}", m), None),
    };
    let contact_name = match parse_opt_string(req.params.get("contactName")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("contactName {}", m), None),
    };
    let phone = match parse_opt_string(req.params.get("phone")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("phone {}", m), None),
    };

    let institution_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO institutions(id, name, city, contact_name, phone) VALUES(?, ?, ?, ?, ?)",
        params![institution_id, name, city, contact_name, phone],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "institutionId": institution_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let institution_id = match required_str(req, "institutionId") {
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
            "city" | "contactName" | "phone" => {
                let column = match k.as_str() {
                    "city" => "city",
                    "contactName" => "contact_name",
                    _ => "phone",
                };
                fields.push(format!("{} = ?", column));
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
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(rusqlite::types::Value::Text(institution_id));
    let sql = format!(
        "UPDATE institutions SET {} WHERE id = ?",
        fields.join(", ")
    );
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "institution not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let institution_id = match required_str(req, "institutionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT 1 FROM institutions WHERE id = ?", &institution_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "institution not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    // Course instances keep their history; the institution cannot go
    // while any reference it.
    match row_exists(
        conn,
        "SELECT 1 FROM course_instances WHERE institution_id = ? LIMIT 1",
        &institution_id,
    ) {
        Ok(true) => {
            return err(
                &req.id,
                "in_use",
                "institution still has course instances",
                None,
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match conn.execute("DELETE FROM institutions WHERE id = ?", [&institution_id]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "institutions.list" => Some(handle_list(state, req)),
        "institutions.create" => Some(handle_create(state, req)),
        "institutions.update" => Some(handle_update(state, req)),
        "institutions.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
