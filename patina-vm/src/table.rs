// patina-vm - String-keyed hash table
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Open-addressed hash table keyed by interned strings.
//!
//! Keys are [`ObjRef`] handles to interned strings, so key comparison is
//! handle identity. Each entry also records the key's hash, which drives
//! bucket selection and lets the table work without access to the heap.
//! Probing is linear, deletion uses tombstones, and the table grows when it
//! passes a 3/4 load factor. Used for globals, instance fields, class
//! methods, and the string interner itself.

use crate::object::ObjRef;
use crate::value::Value;

const TABLE_INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Entry {
    Empty,
    /// A deleted slot; probe sequences continue through it.
    Tombstone,
    Pair { key: ObjRef, hash: u32, value: Value },
}

/// An open-addressed, string-keyed hash table.
#[derive(Debug, Clone)]
pub struct Table {
    /// Live pairs plus tombstones; governs the load factor.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Pair { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, live or not. Sizes the heap's accounting estimate.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Insert or update a pair. Returns true when the key was not already
    /// present.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let index = self.find_slot(key, hash);
        let is_new = match self.entries[index] {
            Entry::Empty => {
                // Fresh slots raise the load; reused tombstones do not.
                self.count += 1;
                true
            }
            Entry::Tombstone => true,
            Entry::Pair { .. } => false,
        };
        self.entries[index] = Entry::Pair { key, hash, value };
        is_new
    }

    /// Look up a key.
    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries[self.find_slot(key, hash)] {
            Entry::Pair { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Remove a key, leaving a tombstone. Returns true when it was present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = self.find_slot(key, hash);
        match self.entries[index] {
            Entry::Pair { .. } => {
                self.entries[index] = Entry::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// Copy every pair from `other` into this table. Used for method
    /// inheritance.
    pub fn add_all(&mut self, other: &Table) {
        for entry in &other.entries {
            if let Entry::Pair { key, hash, value } = *entry {
                self.set(key, hash, value);
            }
        }
    }

    /// Find an interned string by content. `matches` receives candidate
    /// keys whose hashes equal `hash` and decides byte equality.
    pub fn find_string(&self, hash: u32, mut matches: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let mut index = hash as usize % self.entries.len();
        loop {
            match self.entries[index] {
                Entry::Empty => return None,
                Entry::Tombstone => {}
                Entry::Pair {
                    key,
                    hash: entry_hash,
                    ..
                } => {
                    if entry_hash == hash && matches(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % self.entries.len();
        }
    }

    /// Drop every pair whose key fails the predicate. The interner uses
    /// this to prune strings the collector left unmarked.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjRef) -> bool) {
        for entry in self.entries.iter_mut() {
            if let Entry::Pair { key, .. } = *entry {
                if !keep(key) {
                    *entry = Entry::Tombstone;
                }
            }
        }
    }

    /// Iterate live pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Pair { key, value, .. } => Some((*key, *value)),
            _ => None,
        })
    }

    /// Locate the slot for a key: its pair if present, otherwise the first
    /// reusable slot on its probe sequence.
    fn find_slot(&self, key: ObjRef, hash: u32) -> usize {
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match self.entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Pair { key: entry_key, .. } => {
                    if entry_key == key {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let capacity = if self.entries.is_empty() {
            TABLE_INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        // Tombstones are dropped on rebuild, so recount.
        self.count = 0;
        for entry in old {
            if let Entry::Pair { key, hash, value } = entry {
                let index = self.find_slot(key, hash);
                self.entries[index] = Entry::Pair { key, hash, value };
                self.count += 1;
            }
        }
    }
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> ObjRef {
        ObjRef::new(i)
    }

    #[test]
    fn set_get_and_update() {
        let mut table = Table::new();
        assert!(table.set(key(1), 101, Value::from_int(1)));
        assert!(table.set(key(2), 102, Value::from_int(2)));
        assert!(!table.set(key(1), 101, Value::from_int(10)));
        assert_eq!(table.get(key(1), 101), Some(Value::from_int(10)));
        assert_eq!(table.get(key(2), 102), Some(Value::from_int(2)));
        assert_eq!(table.get(key(3), 103), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn delete_leaves_probe_sequences_intact() {
        let mut table = Table::new();
        // Three keys forced onto one probe sequence.
        let hash = 7u32;
        table.set(key(1), hash, Value::from_int(1));
        table.set(key(2), hash, Value::from_int(2));
        table.set(key(3), hash, Value::from_int(3));
        assert!(table.delete(key(2), hash));
        assert!(!table.delete(key(2), hash));
        assert_eq!(table.get(key(3), hash), Some(Value::from_int(3)));
        assert_eq!(table.get(key(1), hash), Some(Value::from_int(1)));
        // The tombstone is reusable.
        assert!(table.set(key(4), hash, Value::from_int(4)));
        assert_eq!(table.get(key(4), hash), Some(Value::from_int(4)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = Table::new();
        for i in 0..100 {
            table.set(key(i), i.wrapping_mul(2654435761), Value::from_int(i as i32));
        }
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            assert_eq!(
                table.get(key(i), i.wrapping_mul(2654435761)),
                Some(Value::from_int(i as i32))
            );
        }
    }

    #[test]
    fn add_all_copies_pairs() {
        let mut src = Table::new();
        src.set(key(1), 11, Value::from_int(1));
        src.set(key(2), 22, Value::from_int(2));
        let mut dst = Table::new();
        dst.set(key(2), 22, Value::from_int(20));
        dst.add_all(&src);
        // Copied pairs overwrite, matching method inheritance order.
        assert_eq!(dst.get(key(2), 22), Some(Value::from_int(2)));
        assert_eq!(dst.get(key(1), 11), Some(Value::from_int(1)));
    }

    #[test]
    fn find_string_and_retain_keys() {
        let mut table = Table::new();
        table.set(key(5), 55, Value::NONE);
        table.set(key(6), 55, Value::NONE);
        assert_eq!(table.find_string(55, |k| k == key(6)), Some(key(6)));
        assert_eq!(table.find_string(55, |_| false), None);
        table.retain_keys(|k| k == key(5));
        assert_eq!(table.get(key(6), 55), None);
        assert_eq!(table.get(key(5), 55), Some(Value::NONE));
    }
}
