use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Scheduling,
    Portal,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduling" => Some(Self::Scheduling),
            "portal" => Some(Self::Portal),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduling => "setup.scheduling",
            Self::Portal => "setup.portal",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduling => json!({
            "defaultLessonDurationMinutes": 45,
            "defaultLessonMode": "template",
            "patternSearchDays": 14,
            "blockedSearchDays": 30
        }),
        SetupSection::Portal => json!({
            "confirmDeletes": true,
            "showInactiveInstructors": false,
            "defaultGradeLabel": ""
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Scheduling => match k.as_str() {
                "defaultLessonDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 480)?));
                }
                "defaultLessonMode" => {
                    let s = parse_string_max(v, k, 16)?;
                    if crate::schedule::lessons::LessonMode::parse(&s).is_none() {
                        return Err(
                            "defaultLessonMode must be one of: template, custom_only, combined"
                                .into(),
                        );
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "patternSearchDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 7, 90)?));
                }
                "blockedSearchDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 7, 365)?));
                }
                _ => return Err(format!("unknown scheduling field: {}", k)),
            },
            SetupSection::Portal => match k.as_str() {
                "confirmDeletes" | "showInactiveInstructors" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultGradeLabel" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 80)?));
                }
                _ => return Err(format!("unknown portal field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not
            // block the setup surface.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scheduling = match load_section(conn, SetupSection::Scheduling) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let portal = match load_section(conn, SetupSection::Portal) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "scheduling": scheduling,
            "portal": portal
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
