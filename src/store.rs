//! Versioned, persisted map of progress records.
//!
//! Both progress stores keep their whole map in a single cell. Every change
//! is written through before the mutation returns.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::db::Db;
use crate::error::StoreError;

pub const STORE_VERSION: u64 = 1;

/// A record addressable by `learnerId:entityId`.
pub trait Keyed {
    fn learner_id(&self) -> &str;
    fn entity_id(&self) -> &str;
}

#[derive(Serialize, Deserialize)]
struct Envelope<R> {
    version: u64,
    records: BTreeMap<String, R>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, R> {
    version: u64,
    records: &'a BTreeMap<String, R>,
}

struct MapState<R> {
    records: BTreeMap<String, R>,
    clock: Clock,
}

pub(crate) struct RecordMap<R> {
    cells: Db,
    key: &'static str,
    state: Mutex<MapState<R>>,
}

impl<R> RecordMap<R>
where
    R: Keyed + Clone + Serialize + DeserializeOwned,
{
    /// Loads the map from its cell. An unreadable document starts the store empty.
    pub fn load(cells: Db, key: &'static str, clock: Clock) -> Result<Self, StoreError> {
        let records = match cells.load(key)? {
            None => BTreeMap::new(),
            Some(raw) => match decode::<R>(&raw) {
                Ok(records) => records,
                Err(reason) => {
                    tracing::warn!(key, %reason, "discarding unreadable progress cell");
                    BTreeMap::new()
                }
            },
        };
        tracing::debug!(key, records = records.len(), "progress cell loaded");
        Ok(Self {
            cells,
            key,
            state: Mutex::new(MapState { records, clock }),
        })
    }

    pub fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, R>) -> T) -> Result<T, StoreError> {
        let guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard.records))
    }

    /// Runs `f` on a copy of the map. When `f` reports a change the copy is
    /// persisted and then swapped in, so a failed write leaves memory untouched.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, R>, DateTime<Utc>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let now = guard.clock.now();
        let mut next = guard.records.clone();
        let (out, changed) = f(&mut next, now);
        if changed {
            let body = serde_json::to_string(&EnvelopeRef {
                version: STORE_VERSION,
                records: &next,
            })?;
            self.cells.save(self.key, &body)?;
            guard.records = next;
        }
        Ok(out)
    }

    #[cfg(test)]
    pub fn set_clock(&self, clock: Clock) -> Result<(), StoreError> {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        guard.clock = clock;
        Ok(())
    }
}

fn decode<R: Keyed + DeserializeOwned>(raw: &str) -> Result<BTreeMap<String, R>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let is_envelope = value
        .as_object()
        .is_some_and(|o| o.contains_key("version") && o.contains_key("records"));
    if !is_envelope {
        return migrate_legacy(value);
    }
    let version = value.get("version").and_then(Value::as_u64).unwrap_or(0);
    if version > STORE_VERSION {
        return Err(format!("unsupported store version {version}"));
    }
    let envelope: Envelope<R> = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(envelope.records)
}

/// Unversioned documents are a bare `key -> record` map. Keys are rebuilt
/// from the records themselves.
fn migrate_legacy<R: Keyed + DeserializeOwned>(value: Value) -> Result<BTreeMap<String, R>, String> {
    let legacy: BTreeMap<String, R> = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let migrated: BTreeMap<String, R> = legacy
        .into_values()
        .map(|r| (crate::progress::composite_key(r.learner_id(), r.entity_id()), r))
        .collect();
    tracing::info!(records = migrated.len(), "migrated legacy progress cell to v{STORE_VERSION}");
    Ok(migrated)
}
