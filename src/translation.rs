//! Source identifier → surrogate key bookkeeping for a single run.

use std::collections::HashMap;

/// Maps `(collection, source id)` to the surrogate key assigned in the target.
///
/// Built incrementally while documents are mapped, so foreign keys emitted
/// later can resolve keys emitted earlier. Never persisted across runs.
#[derive(Debug, Default)]
pub struct TranslationTable {
    keys: HashMap<String, HashMap<String, i64>>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key. Returns the previously registered key if the identifier
    /// was already mapped, leaving the table unchanged.
    pub fn register(&mut self, collection: &str, source_id: &str, key: i64) -> Result<(), i64> {
        let ids = self.keys.entry(collection.to_string()).or_default();
        if let Some(existing) = ids.get(source_id) {
            return Err(*existing);
        }
        ids.insert(source_id.to_string(), key);
        Ok(())
    }

    pub fn resolve(&self, collection: &str, source_id: &str) -> Option<i64> {
        self.keys.get(collection)?.get(source_id).copied()
    }

    pub fn contains(&self, collection: &str, source_id: &str) -> bool {
        self.resolve(collection, source_id).is_some()
    }

    /// Number of identifiers registered for `collection`.
    pub fn len_of(&self, collection: &str) -> usize {
        self.keys.get(collection).map_or(0, HashMap::len)
    }

    pub fn len(&self) -> usize {
        self.keys.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hands out surrogate keys, one increasing sequence per target table.
#[derive(Debug, Default)]
pub struct KeyAllocator {
    next: HashMap<String, i64>,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, table: &str) -> i64 {
        let counter = self.next.entry(table.to_string()).or_insert(1);
        let key = *counter;
        *counter += 1;
        key
    }

    /// Keys issued so far for `table`.
    pub fn issued(&self, table: &str) -> i64 {
        self.next.get(table).map_or(0, |next| next - 1)
    }
}
