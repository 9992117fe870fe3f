//! Per-learner lab attempts. Same arithmetic as enrollments, but step-indexed
//! and without a status enum: a run is finished once `completed_at` is set.

use std::collections::BTreeSet;

use crate::clock::Clock;
use crate::db::{Db, LAB_RUNS_KEY};
use crate::error::StoreError;
use crate::models::LabRunRecord;
use crate::progress::{clamp_step_index, composite_key, progress_percent};
use crate::store::{Keyed, RecordMap};

impl Keyed for LabRunRecord {
    fn learner_id(&self) -> &str {
        &self.learner_id
    }

    fn entity_id(&self) -> &str {
        &self.lab_id
    }
}

pub struct LabRunStore {
    map: RecordMap<LabRunRecord>,
}

impl LabRunStore {
    pub fn open(cells: Db, clock: Clock) -> Result<Self, StoreError> {
        Ok(Self {
            map: RecordMap::load(cells, LAB_RUNS_KEY, clock)?,
        })
    }

    pub fn get(&self, learner_id: &str, lab_id: &str) -> Result<Option<LabRunRecord>, StoreError> {
        let key = composite_key(learner_id, lab_id);
        self.map.read(|m| m.get(&key).cloned())
    }

    pub fn list_for_learner(&self, learner_id: &str) -> Result<Vec<LabRunRecord>, StoreError> {
        self.map.read(|m| {
            let mut out: Vec<_> = m.values().filter(|r| r.learner_id == learner_id).cloned().collect();
            out.sort_by(|a, b| a.lab_id.cmp(&b.lab_id));
            out
        })
    }

    /// Idempotent: an existing run is returned unchanged.
    pub fn start(&self, learner_id: &str, lab_id: &str) -> Result<LabRunRecord, StoreError> {
        let key = composite_key(learner_id, lab_id);
        self.map.mutate(|m, now| {
            if let Some(existing) = m.get(&key) {
                return (existing.clone(), false);
            }
            let record = LabRunRecord {
                learner_id: learner_id.to_owned(),
                lab_id: lab_id.to_owned(),
                progress: 0,
                active_step_index: 0,
                completed_step_ids: BTreeSet::new(),
                started_at: now,
                completed_at: None,
            };
            tracing::info!(learner_id, lab_id, "lab run started");
            m.insert(key.clone(), record.clone());
            (record, true)
        })
    }

    pub fn set_active_step(
        &self,
        learner_id: &str,
        lab_id: &str,
        index: usize,
        total_steps: usize,
    ) -> Result<Option<LabRunRecord>, StoreError> {
        let key = composite_key(learner_id, lab_id);
        let index = clamp_step_index(index, total_steps);
        self.map.mutate(|m, _| match m.get_mut(&key) {
            None => (None, false),
            Some(r) => {
                let changed = r.active_step_index != index;
                r.active_step_index = index;
                (Some(r.clone()), changed)
            }
        })
    }

    pub fn mark_step_complete(
        &self,
        learner_id: &str,
        lab_id: &str,
        step_id: &str,
        total_steps: usize,
    ) -> Result<Option<LabRunRecord>, StoreError> {
        let key = composite_key(learner_id, lab_id);
        self.map.mutate(|m, now| {
            let Some(r) = m.get_mut(&key) else {
                return (None, false);
            };
            let before = r.clone();
            r.completed_step_ids.insert(step_id.to_owned());
            r.progress = progress_percent(r.completed_step_ids.len(), total_steps);
            if r.progress == 100 && r.completed_at.is_none() {
                r.completed_at = Some(now);
                tracing::info!(learner_id, lab_id, "lab run completed");
            }
            let changed = *r != before;
            (Some(r.clone()), changed)
        })
    }

    pub fn reset(&self, learner_id: &str, lab_id: &str) -> Result<Option<LabRunRecord>, StoreError> {
        let key = composite_key(learner_id, lab_id);
        self.map.mutate(|m, now| {
            let Some(r) = m.get_mut(&key) else {
                return (None, false);
            };
            r.progress = 0;
            r.active_step_index = 0;
            r.completed_step_ids.clear();
            r.completed_at = None;
            r.started_at = now;
            (Some(r.clone()), true)
        })
    }

    pub fn reset_for_learner(&self, learner_id: &str) -> Result<usize, StoreError> {
        self.map.mutate(|m, _| {
            let before = m.len();
            m.retain(|_, r| r.learner_id != learner_id);
            let removed = before - m.len();
            (removed, removed > 0)
        })
    }
}
