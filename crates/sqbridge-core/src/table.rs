//! Insertion-ordered key/value storage used by tables and class members.

use rustc_hash::FxHashMap;

use crate::value::Value;

/// An insertion-ordered associative container keyed by [`Value`].
///
/// Iteration follows insertion order until an entry is removed; removal
/// swaps the last entry into the freed position.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<Value, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite an entry, returning the previous value.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        if let Some(&i) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[i].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Overwrite an existing entry; returns `false` if the key is absent.
    pub fn set_existing(&mut self, key: &Value, value: Value) -> bool {
        match self.index.get(key) {
            Some(&i) => {
                self.entries[i].1 = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.swap_remove(i);
        if let Some((moved, _)) = self.entries.get(i) {
            self.index.insert(moved.clone(), i);
        }
        Some(value)
    }

    /// Iterate entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Entry at a storage position, used for stateful iteration.
    pub fn entry_at(&self, position: usize) -> Option<(&Value, &Value)> {
        self.entries.get(position).map(|(k, v)| (k, v))
    }
}
