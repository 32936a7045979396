//! Keyed coalescing buffer: latest payload per (kind, id) since the last drain.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::EntityKind;

/// Buffer statistics for monitoring and debugging.
#[derive(Debug, Default, Clone)]
pub struct BufferStats {
    pub updates_buffered: u64,
    pub updates_coalesced: u64,
    pub drains: u64,
}

/// Accumulates the latest payload per (kind, id) between flushes.
///
/// Ids are scoped per kind, so the same id under two kinds is tracked
/// independently. The buffer is unbounded; in practice it is bounded by
/// flush period times arrival rate, since every drain empties it.
pub struct CoalescingBuffer {
    slots: HashMap<EntityKind, HashMap<String, Value>>,
    stats: BufferStats,
}

impl CoalescingBuffer {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            stats: BufferStats::default(),
        }
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Overwrite the buffered payload for (kind, id). O(1), no flush.
    pub fn put(&mut self, kind: EntityKind, id: &str, payload: Value) {
        self.stats.updates_buffered += 1;
        let slot = self.slots.entry(kind).or_default();
        if slot.insert(id.to_string(), payload).is_some() {
            self.stats.updates_coalesced += 1;
        }
    }

    /// Merge a partial object into the buffered payload for (kind, id).
    ///
    /// Incoming keys overwrite existing keys property by property. If either
    /// side is not an object the incoming value replaces the slot outright.
    pub fn merge(&mut self, kind: EntityKind, id: &str, partial: Value) {
        self.stats.updates_buffered += 1;
        let slot = self.slots.entry(kind).or_default();
        match slot.get_mut(id) {
            Some(existing) => {
                self.stats.updates_coalesced += 1;
                merge_value(existing, partial);
            }
            None => {
                slot.insert(id.to_string(), partial);
            }
        }
    }

    /// Take everything accumulated since the previous drain and clear the
    /// buffer. Single-threaded ownership makes this atomic with respect to
    /// writes: no update can interleave with an in-progress drain.
    pub fn drain_all(&mut self) -> Vec<(EntityKind, Vec<Value>)> {
        let mut batches = Vec::with_capacity(self.slots.len());
        for (kind, entries) in self.slots.drain() {
            if entries.is_empty() {
                continue;
            }
            batches.push((kind, entries.into_values().collect()));
        }
        if !batches.is_empty() {
            self.stats.drains += 1;
        }
        batches
    }

    /// True iff nothing has been buffered since the last drain.
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(|entries| entries.is_empty())
    }

    /// Number of distinct (kind, id) entries currently buffered.
    pub fn len(&self) -> usize {
        self.slots.values().map(|entries| entries.len()).sum()
    }

    /// Discard all buffered state without committing it.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl Default for CoalescingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_value(existing: &mut Value, incoming: Value) {
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
    fn test_put_overwrites_same_id() {
        let mut buffer = CoalescingBuffer::new();

        buffer.put(EntityKind::Measurement, "T1", json!({"name": "T1", "value": 1}));
        buffer.put(EntityKind::Measurement, "T1", json!({"name": "T1", "value": 2}));
        buffer.put(EntityKind::Measurement, "T1", json!({"name": "T1", "value": 3}));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().updates_coalesced, 2);

        let batches = buffer.drain_all();
        assert_eq!(batches.len(), 1);
        let (kind, payloads) = &batches[0];
        assert_eq!(*kind, EntityKind::Measurement);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["value"], 3);
    }

    #[test]
    fn test_kind_isolation() {
        let mut buffer = CoalescingBuffer::new();

        buffer.put(EntityKind::Measurement, "X", json!({"name": "X", "value": 7}));
        buffer.put(EntityKind::Alarm, "X", json!({"name": "X", "active": true}));

        assert_eq!(buffer.len(), 2);

        let batches = buffer.drain_all();
        assert_eq!(batches.len(), 2);
        for (_, payloads) in &batches {
            assert_eq!(payloads.len(), 1);
        }
    }

    #[test]
    fn test_drain_clears_buffer() {
        let mut buffer = CoalescingBuffer::new();
        buffer.put(EntityKind::Alarm, "A1", json!({"name": "A1"}));

        assert!(!buffer.is_empty());
        let batches = buffer.drain_all();
        assert_eq!(batches.len(), 1);

        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_merge_is_property_level() {
        let mut buffer = CoalescingBuffer::new();

        buffer.merge(
            EntityKind::MachineProperty,
            "press-1",
            json!({"name": "press-1", "speed": 40}),
        );
        buffer.merge(
            EntityKind::MachineProperty,
            "press-1",
            json!({"name": "press-1", "temperature": 81}),
        );

        let batches = buffer.drain_all();
        let (_, payloads) = &batches[0];
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["speed"], 40);
        assert_eq!(payloads[0]["temperature"], 81);
    }

    #[test]
    fn test_merge_latest_property_wins() {
        let mut buffer = CoalescingBuffer::new();

        buffer.merge(EntityKind::MachineProperty, "m", json!({"speed": 40}));
        buffer.merge(EntityKind::MachineProperty, "m", json!({"speed": 55}));

        let batches = buffer.drain_all();
        assert_eq!(batches[0].1[0]["speed"], 55);
    }

    #[test]
    fn test_clear_discards_without_commit() {
        let mut buffer = CoalescingBuffer::new();
        buffer.put(EntityKind::Measurement, "T1", json!({"value": 1}));

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }
}
