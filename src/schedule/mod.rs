pub mod blocked;
pub mod generate;
pub mod lessons;
pub mod pattern;
pub mod postpone;
pub mod store;
pub mod sync;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M";

/// A scheduling failure with a stable code that survives the trip
/// across the IPC boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ScheduleError {}

/// Weekday as stored in patterns: 0=Sunday .. 6=Saturday.
pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}
