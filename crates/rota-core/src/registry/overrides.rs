//! Scoped overrides of namespace values.
//!
//! An override shadows the base value of one path while it is active. The
//! effective value is the active override with the highest precedence; on a
//! tie the most recently pushed one wins. Releasing an override only removes
//! it, it never writes anything back, so overlapping overrides can be
//! released in any order.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverrideId(u64);

#[derive(Debug, Clone)]
struct Entry {
    id: OverrideId,
    path: String,
    value: Value,
    precedence: i32,
}

#[derive(Debug, Default, Clone)]
pub struct Overrides {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &str, value: Value, precedence: i32) -> OverrideId {
        let id = OverrideId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            path: path.to_string(),
            value,
            precedence,
        });
        id
    }

    /// Returns the path the override applied to, or `None` if it was not active.
    pub fn release(&mut self, id: OverrideId) -> Option<String> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos).path)
    }

    pub fn effective(&self, path: &str) -> Option<&Value> {
        // entries are in push order, so `max_by_key` returning the last max
        // gives "latest wins" on equal precedence
        self.entries
            .iter()
            .filter(|e| e.path == path)
            .max_by_key(|e| e.precedence)
            .map(|e| &e.value)
    }

    pub fn active(&self, path: &str) -> usize {
        self.entries.iter().filter(|e| e.path == path).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
