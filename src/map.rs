use super::value::{ObjString, Value};
use std::rc::Rc;

const MAX_LOAD: f64 = 0.75;

/// One slot of the table. Three states:
/// - empty: `key` is `None`, `value` is `Nil`
/// - tombstone: `key` is `None`, `value` is `Bool(true)`
/// - live: `key` is `Some`
struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            value: Value::Nil,
        }
    }
}

/// Open-addressed hash table from interned strings to values, with linear
/// probing and tombstone deletion. Keys are compared by identity; the intern
/// table itself uses [`Map::find_string`] to probe by content instead.
pub struct Map {
    // Includes tombstones; recomputed from live entries on resize.
    count: usize,
    entries: Vec<Entry>,
}

impl Map {
    pub fn new() -> Self {
        Map {
            count: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// The slot where `key` lives or should live: its live slot if present,
    /// otherwise the first tombstone passed on the way to an empty slot, or
    /// the empty slot itself. Probing terminates because load stays below 1.
    fn find_entry(entries: &[Entry], key: &Rc<ObjString>) -> usize {
        let capacity = entries.len();
        let mut index = key.hash() as usize % capacity;
        let mut tombstone = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                Some(existing) => {
                    if Rc::ptr_eq(existing, key) {
                        return index;
                    }
                }
                None => match entry.value {
                    Value::Nil => return tombstone.unwrap_or(index),
                    _ => {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    }
                },
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(
            &mut self.entries,
            (0..capacity).map(|_| Entry::empty()).collect(),
        );
        // Tombstones are dropped here, so the count starts over.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&self.entries, &key);
                self.entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                self.count += 1;
            }
        }
    }

    /// Inserts or overwrites. Returns true if `key` was not present before.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let capacity = if self.capacity() < 8 {
                8
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        // Filling a tombstone does not change the count.
        if is_new_key && matches!(entry.value, Value::Nil) {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_entry(&self.entries, key)];
        entry.key.as_ref().map(|_| entry.value.clone())
    }

    /// Replaces the slot with a tombstone. The count stays unchanged.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Interning probe: matches by length, bytes, and precomputed hash
    /// rather than identity.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                Some(key) => {
                    if key.hash() == hash && key.as_str() == chars {
                        return Some(Rc::clone(key));
                    }
                }
                None => {
                    if matches!(entry.value, Value::Nil) {
                        return None;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }
}
