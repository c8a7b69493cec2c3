use super::error::err;
use super::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;

use crate::schedule::DATE_FMT;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

/// `%Y-%m-%d`, rejected (not passed through) when malformed.
pub fn parse_opt_date(v: Option<&JsonValue>) -> Result<Option<NaiveDate>, String> {
    match parse_opt_string(v).map_err(|m| m.to_string())? {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, DATE_FMT)
            .map(Some)
            .map_err(|_| format!("invalid date {:?}, expected YYYY-MM-DD", s)),
    }
}

pub fn row_exists(
    conn: &Connection,
    sql: &str,
    id: &str,
) -> Result<bool, rusqlite::Error> {
    Ok(conn.query_row(sql, [id], |_r| Ok(())).optional()?.is_some())
}
