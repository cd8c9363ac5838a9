/// Dynamic values: byte strings and insertion-ordered tables.
///
/// Values are shared through `Rc`. Every value remembers the store offset
/// it was last written at; mutating a table clears that offset so the next
/// flush writes a fresh copy.
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

thread_local! {
    static LIVE_VALUES: Cell<usize> = const { Cell::new(0) };
}

/// Number of strings and tables alive on this thread.
pub fn live_values() -> usize {
    LIVE_VALUES.with(Cell::get)
}

fn track_new() {
    LIVE_VALUES.with(|n| n.set(n.get() + 1));
}

fn track_drop() {
    LIVE_VALUES.with(|n| n.set(n.get().saturating_sub(1)));
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null = 0,
    Str = 1,
    Table = 2,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Str(Rc<Str>),
    Table(Rc<Table>),
}

impl Value {
    pub fn str(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Str(Rc::new(Str::new(bytes.into())))
    }

    pub fn table() -> Self {
        Value::Table(Rc::new(Table::new()))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Str(_) => ValueType::Str,
            Value::Table(_) => ValueType::Table,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s.bytes()),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Rc<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Identity comparison. Two nulls are the same value.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn ref_count(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Str(s) => Rc::strong_count(s),
            Value::Table(t) => Rc::strong_count(t),
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Value::Null => 0,
            Value::Str(s) => s.offset.get(),
            Value::Table(t) => t.offset.get(),
        }
    }

    pub(crate) fn set_offset(&self, offset: u64) {
        match self {
            Value::Null => {}
            Value::Str(s) => s.offset.set(offset),
            Value::Table(t) => t.offset.set(offset),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Str(s) => write!(f, "Str({:?})", s.bytes().escape_ascii().to_string()),
            Value::Table(t) => write!(f, "Table(len={})", t.len()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Strings
// ═══════════════════════════════════════════════════════════════════

pub struct Str {
    bytes: Box<[u8]>,
    offset: Cell<u64>,
}

impl Str {
    fn new(bytes: Vec<u8>) -> Self {
        track_new();
        Self {
            bytes: bytes.into_boxed_slice(),
            offset: Cell::new(0),
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for Str {
    fn drop(&mut self) {
        track_drop();
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════

/// A table entry, either in memory or still on disk at an offset.
#[derive(Clone, Debug)]
pub enum Slot {
    Resident(Value),
    Faulted(u64),
}

#[derive(Default)]
struct Entries {
    order: Vec<Vec<u8>>,
    map: HashMap<Vec<u8>, Slot>,
}

pub struct Table {
    entries: RefCell<Entries>,
    offset: Cell<u64>,
}

impl Table {
    pub fn new() -> Self {
        track_new();
        Self {
            entries: RefCell::new(Entries::default()),
            offset: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.borrow().map.contains_key(key)
    }

    pub fn slot(&self, key: &[u8]) -> Option<Slot> {
        self.entries.borrow().map.get(key).cloned()
    }

    /// Resident value for `key`. Faulted entries read as `None`; go
    /// through the store to page them in.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        match self.slot(key)? {
            Slot::Resident(v) => Some(v),
            Slot::Faulted(_) => None,
        }
    }

    /// Insert or replace. A null value removes the key.
    pub fn insert(&self, key: impl Into<Vec<u8>>, value: Value) {
        let key = key.into();
        if value.is_null() {
            self.remove(&key);
            return;
        }
        self.put(key, Slot::Resident(value));
        self.mark_dirty();
    }

    pub fn remove(&self, key: &[u8]) -> Option<Slot> {
        let mut entries = self.entries.borrow_mut();
        let old = entries.map.remove(key)?;
        entries.order.retain(|k| k.as_slice() != key);
        drop(entries);
        self.mark_dirty();
        Some(old)
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.borrow().order.clone()
    }

    /// Snapshot of all entries in iteration order.
    pub fn entries(&self) -> Vec<(Vec<u8>, Slot)> {
        let entries = self.entries.borrow();
        entries
            .order
            .iter()
            .filter_map(|k| entries.map.get(k).map(|slot| (k.clone(), slot.clone())))
            .collect()
    }

    /// Replace a faulted slot by its loaded value without dirtying.
    pub(crate) fn resolve(&self, key: &[u8], value: Value) {
        if let Some(slot) = self.entries.borrow_mut().map.get_mut(key) {
            *slot = Slot::Resident(value);
        }
    }

    /// Add an entry read from disk without dirtying.
    pub(crate) fn put(&self, key: Vec<u8>, slot: Slot) {
        let mut entries = self.entries.borrow_mut();
        if !entries.map.contains_key(&key) {
            entries.order.push(key.clone());
        }
        entries.map.insert(key, slot);
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.offset.set(0);
    }

    pub fn offset(&self) -> u64 {
        self.offset.get()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        track_drop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_count_follows_drops() {
        let before = live_values();
        {
            let table = Value::table();
            let t = table.as_table().unwrap();
            t.insert("a", Value::str("x"));
            t.insert("b", Value::table());
            assert_eq!(live_values(), before + 3);
        }
        assert_eq!(live_values(), before);
    }

    #[test]
    fn test_insertion_order() {
        let t = Table::new();
        t.insert("z", Value::str("1"));
        t.insert("a", Value::str("2"));
        t.insert("m", Value::str("3"));
        t.insert("a", Value::str("4"));
        assert_eq!(t.keys(), vec![b"z".to_vec(), b"a".to_vec(), b"m".to_vec()]);
        assert_eq!(t.get(b"a").unwrap().as_bytes(), Some(&b"4"[..]));
    }

    #[test]
    fn test_null_insert_removes() {
        let t = Table::new();
        t.insert("k", Value::str("v"));
        t.insert("k", Value::Null);
        assert!(t.is_empty());
        assert!(!t.contains(b"k"));
    }

    #[test]
    fn test_mutation_clears_offset() {
        let t = Value::table();
        t.set_offset(64);
        t.as_table().unwrap().insert("k", Value::str("v"));
        assert_eq!(t.offset(), 0);
    }

    #[test]
    fn test_identity() {
        let a = Value::str("x");
        let b = a.clone();
        let c = Value::str("x");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(Value::Null.ptr_eq(&Value::Null));
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_faulted_entries_are_not_resident() {
        let t = Table::new();
        t.put(b"k".to_vec(), Slot::Faulted(8));
        assert!(t.get(b"k").is_none());
        assert_eq!(t.len(), 1);
        t.resolve(b"k", Value::str("v"));
        assert_eq!(t.get(b"k").unwrap().as_bytes(), Some(&b"v"[..]));
    }
}
