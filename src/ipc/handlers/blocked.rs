use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_date, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::DATE_FMT;
use rusqlite::params;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, label, start_date, end_date FROM blocked_dates ORDER BY start_date, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(blocked_dates) => ok(&req.id, json!({ "blockedDates": blocked_dates })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let label = match parse_opt_string(req.params.get("label")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("label {}", m), None),
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

    let blocked_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO blocked_dates(id, label, start_date, end_date) VALUES(?, ?, ?, ?)",
        params![
            blocked_id,
            label,
            start_date.format(DATE_FMT).to_string(),
            end_date.map(|d| d.format(DATE_FMT).to_string())
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "blockedDateId": blocked_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let blocked_id = match required_str(req, "blockedDateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM blocked_dates WHERE id = ?", [&blocked_id]) {
        Ok(0) => err(&req.id, "not_found", "blocked date not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "blockedDates.list" => Some(handle_list(state, req)),
        "blockedDates.create" => Some(handle_create(state, req)),
        "blockedDates.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
