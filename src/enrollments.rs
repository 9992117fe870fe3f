//! Per-learner, per-course enrollment lifecycle.
//!
//! Mutations that do not apply (unknown pair, wrong source status, cancelled
//! record) are no-ops. Callers get `None` for an unknown pair and the
//! unchanged record otherwise.

use std::collections::BTreeSet;

use crate::clock::Clock;
use crate::db::{Db, ENROLLMENTS_KEY};
use crate::error::StoreError;
use crate::models::{EnrollmentRecord, EnrollmentStatus};
use crate::progress::{composite_key, progress_percent};
use crate::store::{Keyed, RecordMap};

impl Keyed for EnrollmentRecord {
    fn learner_id(&self) -> &str {
        &self.learner_id
    }

    fn entity_id(&self) -> &str {
        &self.course_id
    }
}

pub struct EnrollmentStore {
    map: RecordMap<EnrollmentRecord>,
}

impl EnrollmentStore {
    pub fn open(cells: Db, clock: Clock) -> Result<Self, StoreError> {
        Ok(Self {
            map: RecordMap::load(cells, ENROLLMENTS_KEY, clock)?,
        })
    }

    #[cfg(test)]
    pub fn set_clock(&self, clock: Clock) -> Result<(), StoreError> {
        self.map.set_clock(clock)
    }

    pub fn get(&self, learner_id: &str, course_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let key = composite_key(learner_id, course_id);
        self.map.read(|m| m.get(&key).cloned())
    }

    /// Records for one learner, ordered by course id.
    pub fn list_for_learner(&self, learner_id: &str) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.map.read(|m| {
            let mut out: Vec<_> = m.values().filter(|r| r.learner_id == learner_id).cloned().collect();
            out.sort_by(|a, b| a.course_id.cmp(&b.course_id));
            out
        })
    }

    /// Returns the existing record untouched, or creates an ACTIVE one.
    pub fn enroll(
        &self,
        learner_id: &str,
        course_id: &str,
        first_item_id: Option<&str>,
    ) -> Result<EnrollmentRecord, StoreError> {
        let key = composite_key(learner_id, course_id);
        self.map.mutate(|m, now| {
            if let Some(existing) = m.get(&key) {
                return (existing.clone(), false);
            }
            let record = EnrollmentRecord {
                learner_id: learner_id.to_owned(),
                course_id: course_id.to_owned(),
                status: EnrollmentStatus::Active,
                progress: 0,
                current_lesson_id: first_item_id.map(str::to_owned),
                completed_lesson_ids: BTreeSet::new(),
                started_at: now,
                completed_at: None,
            };
            tracing::info!(learner_id, course_id, "enrolled");
            m.insert(key.clone(), record.clone());
            (record, true)
        })
    }

    pub fn set_current_item(
        &self,
        learner_id: &str,
        course_id: &str,
        item_id: &str,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.update(learner_id, course_id, |r| {
            if r.current_lesson_id.as_deref() == Some(item_id) {
                return false;
            }
            r.current_lesson_id = Some(item_id.to_owned());
            true
        })
    }

    pub fn mark_item_complete(
        &self,
        learner_id: &str,
        course_id: &str,
        item_id: &str,
        total_item_count: usize,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        let key = composite_key(learner_id, course_id);
        self.map.mutate(|m, now| {
            let Some(r) = m.get_mut(&key) else {
                return (None, false);
            };
            if r.status == EnrollmentStatus::Cancelled {
                tracing::debug!(learner_id, course_id, "ignoring completion on cancelled enrollment");
                return (Some(r.clone()), false);
            }
            let before = r.clone();
            r.completed_lesson_ids.insert(item_id.to_owned());
            r.progress = progress_percent(r.completed_lesson_ids.len(), total_item_count);
            if r.progress == 100 && r.completed_at.is_none() {
                r.status = EnrollmentStatus::Completed;
                r.completed_at = Some(now);
                tracing::info!(learner_id, course_id, "course completed");
            }
            let changed = *r != before;
            (Some(r.clone()), changed)
        })
    }

    pub fn pause(&self, learner_id: &str, course_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.transition(learner_id, course_id, EnrollmentStatus::Active, EnrollmentStatus::Paused)
    }

    pub fn resume(&self, learner_id: &str, course_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.transition(learner_id, course_id, EnrollmentStatus::Paused, EnrollmentStatus::Active)
    }

    pub fn cancel(&self, learner_id: &str, course_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.update(learner_id, course_id, |r| {
            if r.status == EnrollmentStatus::Cancelled {
                return false;
            }
            r.status = EnrollmentStatus::Cancelled;
            tracing::info!(learner_id, course_id, "enrollment cancelled");
            true
        })
    }

    /// Restart from scratch. Valid from every status, including CANCELLED.
    pub fn reset(
        &self,
        learner_id: &str,
        course_id: &str,
        current_item_id: Option<&str>,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        let key = composite_key(learner_id, course_id);
        self.map.mutate(|m, now| {
            let Some(r) = m.get_mut(&key) else {
                return (None, false);
            };
            r.status = EnrollmentStatus::Active;
            r.progress = 0;
            r.completed_lesson_ids.clear();
            r.completed_at = None;
            r.current_lesson_id = current_item_id.map(str::to_owned);
            r.started_at = now;
            tracing::info!(learner_id, course_id, "enrollment reset");
            (Some(r.clone()), true)
        })
    }

    /// Drops every record belonging to `learner_id`. Returns how many were removed.
    pub fn reset_for_learner(&self, learner_id: &str) -> Result<usize, StoreError> {
        self.map.mutate(|m, _| {
            let before = m.len();
            m.retain(|_, r| r.learner_id != learner_id);
            let removed = before - m.len();
            (removed, removed > 0)
        })
    }

    fn transition(
        &self,
        learner_id: &str,
        course_id: &str,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.update(learner_id, course_id, |r| {
            if r.status != from {
                return false;
            }
            r.status = to;
            true
        })
    }

    fn update(
        &self,
        learner_id: &str,
        course_id: &str,
        f: impl FnOnce(&mut EnrollmentRecord) -> bool,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        let key = composite_key(learner_id, course_id);
        self.map.mutate(|m, _| match m.get_mut(&key) {
            None => (None, false),
            Some(r) => {
                let changed = f(r);
                (Some(r.clone()), changed)
            }
        })
    }
}
