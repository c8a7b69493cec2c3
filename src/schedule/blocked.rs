use chrono::{Duration, NaiveDate};
use std::collections::HashSet;

/// One administratively blocked span: a single day (`end` = None) or an
/// inclusive date range.
#[derive(Debug, Clone)]
pub struct BlockedSpan {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

/// Membership test over all blocked calendar days, time-of-day ignored.
#[derive(Debug, Clone, Default)]
pub struct BlockedDateIndex {
    days: HashSet<NaiveDate>,
}

impl BlockedDateIndex {
    pub fn build(spans: &[BlockedSpan]) -> Self {
        let mut days = HashSet::new();
        for span in spans {
            match span.end {
                None => {
                    days.insert(span.start);
                }
                Some(end) => {
                    // Inverted ranges contribute nothing.
                    let mut day = span.start;
                    while day <= end {
                        days.insert(day);
                        day += Duration::days(1);
                    }
                }
            }
        }
        Self { days }
    }

    pub fn is_blocked(&self, day: NaiveDate) -> bool {
        self.days.contains(&day)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
