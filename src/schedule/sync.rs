use super::generate::GeneratedOccurrence;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

/// A persisted occurrence as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceRow {
    pub id: String,
    pub lesson_id: String,
    pub lesson_number: i64,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
}

/// In-place rewrite of an existing occurrence; the id is preserved so
/// foreign references (task records, reports) stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceUpdate {
    pub occurrence_id: String,
    pub lesson_number: i64,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
}

/// Cleanup performed before an occurrence row may be deleted, in list
/// order. Kept as data so the write sequence is fixed and inspectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStep {
    /// Remove task-completion records filed under this lesson for the
    /// instance being synchronized.
    TaskRecords { lesson_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceRemoval {
    pub occurrence_id: String,
    pub lesson_id: String,
    pub cleanup: Vec<CleanupStep>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub creates: Vec<GeneratedOccurrence>,
    pub updates: Vec<OccurrenceUpdate>,
    pub deletes: Vec<OccurrenceRemoval>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Correlates a freshly generated occurrence list with what is already
/// persisted for the same course instance, matching on lesson id:
/// matched lessons become updates (id preserved), unmatched new ones
/// become creates, and existing occurrences whose lesson left the
/// active list become deletes with their cleanup steps ordered ahead
/// of the row delete.
pub fn plan_sync(new: &[GeneratedOccurrence], existing: &[OccurrenceRow]) -> SyncPlan {
    // The store enforces one occurrence per (instance, lesson); the
    // first row wins, anything beyond it is stale and gets removed.
    let mut by_lesson: HashMap<&str, &OccurrenceRow> = HashMap::new();
    for row in existing {
        by_lesson.entry(row.lesson_id.as_str()).or_insert(row);
    }

    let mut plan = SyncPlan::default();
    let mut matched: HashSet<&str> = HashSet::new();

    for occ in new {
        match by_lesson.get(occ.lesson_id.as_str()) {
            Some(row) => {
                matched.insert(occ.lesson_id.as_str());
                plan.updates.push(OccurrenceUpdate {
                    occurrence_id: row.id.clone(),
                    lesson_number: occ.lesson_number,
                    scheduled_start: occ.scheduled_start,
                    scheduled_end: occ.scheduled_end,
                });
            }
            None => plan.creates.push(occ.clone()),
        }
    }

    for row in existing {
        // Keep a row only if its lesson is still present AND it is the
        // canonical row for that lesson; surplus duplicates go too.
        let canonical = by_lesson
            .get(row.lesson_id.as_str())
            .map(|r| r.id == row.id)
            .unwrap_or(false);
        if canonical && matched.contains(row.lesson_id.as_str()) {
            continue;
        }
        plan.deletes.push(OccurrenceRemoval {
            occurrence_id: row.id.clone(),
            lesson_id: row.lesson_id.clone(),
            cleanup: vec![CleanupStep::TaskRecords {
                lesson_id: row.lesson_id.clone(),
            }],
        });
    }

    plan
}
