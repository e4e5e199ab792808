use std::collections::HashMap;

use serde_json::Value;

use crate::models::Snapshot;

/// REST and push views of one device merged into a single snapshot.
///
/// Every write gets a sequence number. A REST poll replaces the REST layer wholesale
/// and retires every push value for the fields it carries; a push update only touches
/// the fields it carries. For each field the newest write wins, and fields only push
/// has ever written survive REST polls that do not mention them.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    seq: u64,
    rest: Snapshot,
    rest_seq: u64,
    push: HashMap<String, (Value, u64)>,
    merged: Snapshot,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn replace_rest(&mut self, data: Snapshot) -> &Snapshot {
        self.rest_seq = self.next_seq();
        /* a push value overwritten by REST must not come back when a later poll omits the field */
        self.push.retain(|key, _| !data.contains_key(key));
        self.rest = data;
        self.rebuild();
        &self.merged
    }

    pub fn apply_push(&mut self, update: Snapshot) -> &Snapshot {
        for (key, value) in update {
            let seq = self.next_seq();
            self.merged.insert(key.clone(), value.clone());
            self.push.insert(key, (value, seq));
        }
        &self.merged
    }

    fn rebuild(&mut self) {
        let mut merged = self.rest.clone();
        for (key, (value, seq)) in &self.push {
            if *seq > self.rest_seq || !self.rest.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
        self.merged = merged;
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.merged
    }

    pub fn rest_fields(&self) -> &Snapshot {
        &self.rest
    }

    pub fn push_field_count(&self) -> usize {
        self.push.len()
    }
}
