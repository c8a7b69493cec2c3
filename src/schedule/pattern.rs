use super::ScheduleError;
use chrono::{Duration, NaiveTime};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

pub const TIME_FMT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Canonical in-memory form of a weekly recurrence pattern. Produced by
/// [`WeeklyPattern::normalize`], which is the only place raw persisted
/// or wire input is coerced; downstream code never re-checks weekdays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyPattern {
    /// Sorted, deduplicated, each value in 0..=6 (0=Sunday).
    pub days_of_week: Vec<u8>,
    /// One slot per entry of `days_of_week`, keyed by weekday.
    pub time_slots: BTreeMap<u8, TimeSlot>,
    /// Advisory target count; never drives generation.
    pub total_lessons: Option<i64>,
    pub lesson_duration_minutes: i64,
}

impl WeeklyPattern {
    /// Normalizes the raw (wire or persisted) pattern object. Weekdays
    /// may arrive as JSON numbers or numeric strings; slot `end` may be
    /// omitted and is then derived from `lessonDurationMinutes`.
    pub fn normalize(raw: &JsonValue) -> Result<Self, ScheduleError> {
        let malformed = |message: String| ScheduleError::new("malformed_pattern", message);

        let obj = raw
            .as_object()
            .ok_or_else(|| malformed("pattern must be an object".to_string()))?;

        let duration = match obj.get("lessonDurationMinutes") {
            Some(v) => coerce_i64(v)
                .ok_or_else(|| malformed("lessonDurationMinutes must be an integer".to_string()))?,
            None => return Err(malformed("missing lessonDurationMinutes".to_string())),
        };
        if duration <= 0 {
            return Err(malformed("lessonDurationMinutes must be > 0".to_string()));
        }

        let total_lessons = match obj.get("totalLessons") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => {
                let n = coerce_i64(v)
                    .ok_or_else(|| malformed("totalLessons must be an integer".to_string()))?;
                if n <= 0 {
                    return Err(malformed("totalLessons must be > 0".to_string()));
                }
                Some(n)
            }
        };

        let raw_days = obj
            .get("daysOfWeek")
            .and_then(|v| v.as_array())
            .ok_or_else(|| malformed("daysOfWeek must be an array".to_string()))?;
        let mut days_of_week: Vec<u8> = Vec::with_capacity(raw_days.len());
        for v in raw_days {
            let day = coerce_weekday(v)
                .map_err(|m| malformed(format!("daysOfWeek entry {}: {}", v, m)))?;
            if !days_of_week.contains(&day) {
                days_of_week.push(day);
            }
        }
        days_of_week.sort_unstable();
        if days_of_week.is_empty() {
            return Err(malformed("daysOfWeek must not be empty".to_string()));
        }

        let raw_slots = obj
            .get("timeSlots")
            .and_then(|v| v.as_object())
            .ok_or_else(|| malformed("timeSlots must be an object".to_string()))?;
        let mut time_slots: BTreeMap<u8, TimeSlot> = BTreeMap::new();
        for (key, slot) in raw_slots {
            let day = coerce_weekday(&JsonValue::String(key.clone()))
                .map_err(|m| malformed(format!("timeSlots key {}: {}", key, m)))?;
            if time_slots.contains_key(&day) {
                return Err(malformed(format!("duplicate time slot for weekday {}", day)));
            }
            let slot_obj = slot
                .as_object()
                .ok_or_else(|| malformed(format!("time slot for weekday {} must be an object", day)))?;
            let start_raw = slot_obj
                .get("start")
                .and_then(|v| v.as_str())
                .ok_or_else(|| malformed(format!("time slot for weekday {} is missing start", day)))?;
            let start = parse_hhmm(start_raw)
                .map_err(|m| malformed(format!("time slot for weekday {}: {}", day, m)))?;
            let end = match slot_obj.get("end").filter(|v| !v.is_null()) {
                Some(v) => {
                    let end_raw = v.as_str().ok_or_else(|| {
                        malformed(format!("time slot end for weekday {} must be a string", day))
                    })?;
                    let end = parse_hhmm(end_raw)
                        .map_err(|m| malformed(format!("time slot for weekday {}: {}", day, m)))?;
                    if end <= start {
                        return Err(malformed(format!(
                            "time slot for weekday {} ends at or before it starts",
                            day
                        )));
                    }
                    end
                }
                None => {
                    // NaiveTime addition wraps at midnight.
                    let derived = start + Duration::minutes(duration);
                    if derived <= start {
                        return Err(malformed(format!(
                            "time slot for weekday {} runs past midnight",
                            day
                        )));
                    }
                    derived
                }
            };
            time_slots.insert(day, TimeSlot { start, end });
        }

        // A scheduled day with no slot is a data inconsistency, not a
        // day to drop.
        for day in &days_of_week {
            if !time_slots.contains_key(day) {
                return Err(malformed(format!("weekday {} has no time slot", day))
                    .with_details(json!({ "weekday": day })));
            }
        }

        Ok(Self {
            days_of_week,
            time_slots,
            total_lessons,
            lesson_duration_minutes: duration,
        })
    }

    pub fn matches_weekday(&self, weekday: u8) -> bool {
        self.days_of_week.binary_search(&weekday).is_ok()
    }

    pub fn slot_for(&self, weekday: u8) -> Option<&TimeSlot> {
        self.time_slots.get(&weekday)
    }

    /// Canonical JSON form: what gets persisted and returned on the wire.
    pub fn to_json(&self) -> JsonValue {
        let mut slots = serde_json::Map::new();
        for (day, slot) in &self.time_slots {
            slots.insert(
                day.to_string(),
                json!({
                    "start": slot.start.format(TIME_FMT).to_string(),
                    "end": slot.end.format(TIME_FMT).to_string(),
                }),
            );
        }
        json!({
            "daysOfWeek": self.days_of_week,
            "timeSlots": slots,
            "totalLessons": self.total_lessons,
            "lessonDurationMinutes": self.lesson_duration_minutes,
        })
    }
}

fn coerce_i64(v: &JsonValue) -> Option<i64> {
    match v {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_weekday(v: &JsonValue) -> Result<u8, String> {
    let n = coerce_i64(v).ok_or("must be a number or numeric string")?;
    if !(0..=6).contains(&n) {
        return Err(format!("weekday {} out of range 0..=6", n));
    }
    Ok(n as u8)
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), TIME_FMT)
        .map_err(|_| format!("invalid time {:?}, expected HH:MM", s))
}
