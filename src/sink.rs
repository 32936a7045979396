//! The state sink boundary: where flushed batches leave the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;

use crate::error::SinkError;
use crate::model::EntityKind;

/// Receives committed batches from the flush cycle.
///
/// Called at most once per kind per flush, and only with non-empty batches.
/// Implementations are expected to merge by identifier; the pipeline never
/// re-delivers a batch, so a returned error means the batch is lost.
pub trait StateSink: Send {
    fn commit_batch(&mut self, kind: EntityKind, payloads: Vec<Value>) -> Result<(), SinkError>;
}

type KindState = HashMap<EntityKind, HashMap<String, Value>>;

/// In-memory reference sink: the merged "current state" per kind and id.
///
/// The pipeline owns the store as its sink; the application reads through
/// cloneable [`StateHandle`]s. Machine-property payloads merge property by
/// property, everything else is replaced wholesale by the newest payload.
pub struct SharedStateStore {
    inner: Arc<Mutex<KindState>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A read-only handle for consumers (tables, charts, widgets).
    pub fn handle(&self) -> StateHandle {
        StateHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for SharedStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSink for SharedStateStore {
    fn commit_batch(&mut self, kind: EntityKind, payloads: Vec<Value>) -> Result<(), SinkError> {
        let mut state = lock(&self.inner);
        let slot = state.entry(kind).or_default();

        for payload in payloads {
            let Some(id) = kind.extract_id(&payload) else {
                debug!("Skipping committed {} entry without an identifier", kind);
                continue;
            };
            match slot.get_mut(&id) {
                Some(existing) if kind.merges_properties() => {
                    merge_properties(existing, payload);
                }
                _ => {
                    slot.insert(id, payload);
                }
            }
        }
        Ok(())
    }
}

/// Cloneable read-only view over a [`SharedStateStore`].
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<KindState>>,
}

impl StateHandle {
    /// The merged current state of one entity, if known.
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Value> {
        lock(&self.inner).get(&kind).and_then(|slot| slot.get(id)).cloned()
    }

    /// A snapshot of every entity of one kind.
    pub fn snapshot(&self, kind: EntityKind) -> HashMap<String, Value> {
        lock(&self.inner).get(&kind).cloned().unwrap_or_default()
    }

    /// Number of entities currently tracked under a kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        lock(&self.inner).get(&kind).map(|slot| slot.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }
}

fn lock(inner: &Arc<Mutex<KindState>>) -> MutexGuard<'_, KindState> {
    // a poisoned lock only means a reader panicked mid-read; the state
    // itself is still consistent
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn merge_properties(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key, value);
            }
        }
        (slot, other) => *slot = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commit_merges_by_id() {
        let mut store = SharedStateStore::new();
        let handle = store.handle();

        store
            .commit_batch(
                EntityKind::Measurement,
                vec![json!({"name": "T1", "value": 1})],
            )
            .unwrap();
        store
            .commit_batch(
                EntityKind::Measurement,
                vec![json!({"name": "T1", "value": 3}), json!({"name": "T2", "value": 9})],
            )
            .unwrap();

        assert_eq!(handle.len(EntityKind::Measurement), 2);
        assert_eq!(
            handle.get(EntityKind::Measurement, "T1").unwrap()["value"],
            3
        );
    }

    #[test]
    fn test_machine_properties_merge_across_commits() {
        let mut store = SharedStateStore::new();
        let handle = store.handle();

        store
            .commit_batch(
                EntityKind::MachineProperty,
                vec![json!({"name": "press-1", "speed": 40})],
            )
            .unwrap();
        store
            .commit_batch(
                EntityKind::MachineProperty,
                vec![json!({"name": "press-1", "temperature": 81})],
            )
            .unwrap();

        let machine = handle.get(EntityKind::MachineProperty, "press-1").unwrap();
        assert_eq!(machine["speed"], 40);
        assert_eq!(machine["temperature"], 81);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let mut store = SharedStateStore::new();
        let handle = store.handle();

        store
            .commit_batch(EntityKind::Measurement, vec![json!({"name": "X", "value": 1})])
            .unwrap();
        store
            .commit_batch(EntityKind::Alarm, vec![json!({"name": "X", "active": true})])
            .unwrap();

        assert_eq!(handle.len(EntityKind::Measurement), 1);
        assert_eq!(handle.len(EntityKind::Alarm), 1);
        assert_eq!(
            handle.get(EntityKind::Measurement, "X").unwrap()["value"],
            1
        );
    }

    #[test]
    fn test_entry_without_id_is_skipped() {
        let mut store = SharedStateStore::new();
        let handle = store.handle();

        store
            .commit_batch(EntityKind::Alarm, vec![json!({"severity": "high"})])
            .unwrap();

        assert!(handle.is_empty(EntityKind::Alarm));
    }
}
