/// Persistent value store (`sl.data`).
///
/// Layout, all little-endian:
///
/// | Field          | Size | Notes                                     |
/// |----------------|------|-------------------------------------------|
/// | root offset    | 8    | `0` for an empty store                    |
/// | records...     |      | appended, never rewritten in place        |
///
/// A record is `type:i32 refcount:i32` followed by either
/// `len:i32 bytes` (string) or `count:i32 key_region:i64` and `count`
/// entries of `keylen:i32 key child:i64` (table).
///
/// Tables are paged in lazily: children stay [`Slot::Faulted`] until a
/// lookup touches them. A weak offset cache makes two paths to the same
/// record resolve to the same in-memory value. A table record is placed
/// before its children are written, so cycles survive a reopen.
use std::{
    collections::{HashMap, HashSet},
    fs::OpenOptions,
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use log::{debug, trace};

use crate::{
    value::{Slot, Str, Table, Value, ValueType},
    wire::{
        invalid_data, read_bytes, read_i32, read_len, read_u64, write_bytes, write_i32,
        write_len, write_u64,
    },
};

const HEADER_SIZE: u64 = 8;
const TAG_STRING: i32 = ValueType::Str as i32;
const TAG_TABLE: i32 = ValueType::Table as i32;

trait Backend: Read + Write + Seek {}

impl<T: Read + Write + Seek> Backend for T {}

enum Cached {
    Str(Weak<Str>),
    Table(Weak<Table>),
}

impl Cached {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Str(s) => Some(Cached::Str(Rc::downgrade(s))),
            Value::Table(t) => Some(Cached::Table(Rc::downgrade(t))),
        }
    }

    fn upgrade(&self) -> Option<Value> {
        match self {
            Cached::Str(s) => s.upgrade().map(Value::Str),
            Cached::Table(t) => t.upgrade().map(Value::Table),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Cached::Str(s) => s.strong_count() > 0,
            Cached::Table(t) => t.strong_count() > 0,
        }
    }
}

pub struct Store {
    backend: Box<dyn Backend>,
    path: Option<PathBuf>,
    cache: HashMap<u64, Cached>,
    root: Rc<Table>,
}

impl Store {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!("opened store {}", path.display());
        Self::with_backend(Box::new(file), Some(path.to_path_buf()))
    }

    /// A store that lives only as long as this value.
    pub fn in_memory() -> io::Result<Self> {
        Self::with_backend(Box::new(Cursor::new(Vec::new())), None)
    }

    fn with_backend(mut backend: Box<dyn Backend>, path: Option<PathBuf>) -> io::Result<Self> {
        let len = backend.seek(SeekFrom::End(0))?;
        backend.seek(SeekFrom::Start(0))?;
        let root_offset = if len < HEADER_SIZE {
            write_u64(&mut backend, 0)?;
            0
        } else {
            read_u64(&mut backend)?
        };
        let mut store = Self {
            backend,
            path,
            cache: HashMap::new(),
            root: Rc::new(Table::new()),
        };
        if root_offset != 0 {
            match store.read_data(root_offset)? {
                Value::Table(root) => store.root = root,
                _ => return Err(invalid_data("store root is not a table")),
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn root(&self) -> &Rc<Table> {
        &self.root
    }

    /// Live value cached at `offset`. A dead entry is dropped on the way.
    fn cached(&mut self, offset: u64) -> Option<Value> {
        let value = self.cache.get(&offset)?.upgrade();
        if value.is_none() {
            self.cache.remove(&offset);
        }
        value
    }

    fn remember(&mut self, offset: u64, value: &Value) {
        value.set_offset(offset);
        if let Some(entry) = Cached::of(value) {
            self.cache.insert(offset, entry);
        }
    }

    /// Load the record at `offset`. Table children are left faulted.
    pub fn read_data(&mut self, offset: u64) -> io::Result<Value> {
        if offset < HEADER_SIZE {
            return Ok(Value::Null);
        }
        if let Some(value) = self.cached(offset) {
            return Ok(value);
        }
        self.backend.seek(SeekFrom::Start(offset))?;
        let r = &mut self.backend;
        let tag = read_i32(r)?;
        let _refs = read_i32(r)?;
        let value = match tag {
            TAG_STRING => Value::str(read_bytes(r)?),
            TAG_TABLE => {
                let count = read_len(r)?;
                let _key_region = read_u64(r)?;
                let table = Table::new();
                for _ in 0..count {
                    let key = read_bytes(r)?;
                    let child = read_u64(r)?;
                    if child < HEADER_SIZE {
                        continue;
                    }
                    let slot = match self.cache.get(&child).and_then(Cached::upgrade) {
                        Some(v) => Slot::Resident(v),
                        None => Slot::Faulted(child),
                    };
                    table.put(key, slot);
                }
                Value::Table(Rc::new(table))
            }
            _ => return Err(invalid_data("unknown record type")),
        };
        trace!("read {value:?} at {offset}");
        self.remember(offset, &value);
        Ok(value)
    }

    /// Persist `value` and everything reachable from it. Values that
    /// already carry an offset are not written again.
    pub fn write_data(&mut self, value: &Value) -> io::Result<u64> {
        let mut pending = self.dirty_tables(value);
        self.write_value(value, &mut pending)
    }

    /// Tables reachable from `value` that need a new record: those mutated
    /// since their last write or holding an unwritten string, and every
    /// table that reaches one of them, cycles included.
    fn dirty_tables(&mut self, value: &Value) -> HashSet<*const Table> {
        let mut parents: HashMap<*const Table, Vec<*const Table>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut changed = Vec::new();
        let mut stack: Vec<Rc<Table>> = value.as_table().cloned().into_iter().collect();

        while let Some(table) = stack.pop() {
            let ptr = Rc::as_ptr(&table);
            if !seen.insert(ptr) {
                continue;
            }
            let mut dirty = table.offset() == 0;
            for (_, slot) in table.entries() {
                let child = match slot {
                    Slot::Resident(v) => v,
                    Slot::Faulted(offset) => match self.cached(offset) {
                        Some(v) => {
                            dirty |= v.offset() != offset;
                            v
                        }
                        None => continue,
                    },
                };
                match &child {
                    Value::Null => {}
                    Value::Str(_) => dirty |= child.offset() == 0,
                    Value::Table(t) => {
                        parents.entry(Rc::as_ptr(t)).or_default().push(ptr);
                        stack.push(t.clone());
                    }
                }
            }
            if dirty {
                changed.push(ptr);
            }
        }

        let mut marked = HashSet::new();
        while let Some(ptr) = changed.pop() {
            if marked.insert(ptr) {
                if let Some(up) = parents.get(&ptr) {
                    changed.extend(up.iter().copied());
                }
            }
        }
        marked
    }

    fn write_value(
        &mut self,
        value: &Value,
        pending: &mut HashSet<*const Table>,
    ) -> io::Result<u64> {
        match value {
            Value::Null => Ok(0),
            Value::Str(s) => {
                if value.offset() != 0 {
                    return Ok(value.offset());
                }
                let mut rec = Vec::with_capacity(12 + s.bytes().len());
                write_i32(&mut rec, TAG_STRING)?;
                write_i32(&mut rec, value.ref_count() as i32)?;
                write_bytes(&mut rec, s.bytes())?;
                let offset = self.append(&rec)?;
                self.remember(offset, value);
                Ok(offset)
            }
            Value::Table(table) => self.write_table(value, table, pending),
        }
    }

    /// The record is appended with zeroed child offsets and takes its
    /// offset before any child is written, so a child that leads back
    /// here links to the new record. Child offsets are patched in after.
    fn write_table(
        &mut self,
        value: &Value,
        table: &Rc<Table>,
        pending: &mut HashSet<*const Table>,
    ) -> io::Result<u64> {
        if !pending.remove(&Rc::as_ptr(table)) {
            return Ok(table.offset());
        }

        let mut children = Vec::new();
        for (key, slot) in table.entries() {
            let slot = match slot {
                Slot::Resident(v) if v.is_null() => continue,
                Slot::Faulted(offset) => match self.cached(offset) {
                    Some(v) => Slot::Resident(v),
                    None => Slot::Faulted(offset),
                },
                resident => resident,
            };
            children.push((key, slot));
        }

        let mut rec = Vec::new();
        write_i32(&mut rec, TAG_TABLE)?;
        write_i32(&mut rec, value.ref_count() as i32)?;
        write_len(&mut rec, children.len())?;
        let key_region_at = rec.len();
        write_u64(&mut rec, 0)?;
        let mut child_at = Vec::with_capacity(children.len());
        for (key, _) in &children {
            write_bytes(&mut rec, key)?;
            child_at.push(rec.len() as u64);
            write_u64(&mut rec, 0)?;
        }
        let key_region = (rec.len() - key_region_at - 8) as u64;
        let offset = self.append(&rec)?;
        self.remember(offset, value);

        self.backend.seek(SeekFrom::Start(offset + key_region_at as u64))?;
        write_u64(&mut self.backend, key_region)?;

        for ((_, slot), at) in children.into_iter().zip(child_at) {
            let child = match slot {
                Slot::Resident(v) => self.write_value(&v, pending)?,
                Slot::Faulted(child) => child,
            };
            self.backend.seek(SeekFrom::Start(offset + at))?;
            write_u64(&mut self.backend, child)?;
        }
        trace!("wrote table at {offset}");
        Ok(offset)
    }

    fn append(&mut self, rec: &[u8]) -> io::Result<u64> {
        let offset = self.backend.seek(SeekFrom::End(0))?;
        self.backend.write_all(rec)?;
        Ok(offset)
    }

    /// Entry `key` of `table`, paging it in if needed. Missing keys are null.
    pub fn query_item(&mut self, table: &Table, key: &[u8]) -> io::Result<Value> {
        match table.slot(key) {
            None => Ok(Value::Null),
            Some(Slot::Resident(value)) => Ok(value),
            Some(Slot::Faulted(offset)) => {
                let value = self.read_data(offset)?;
                table.resolve(key, value.clone());
                Ok(value)
            }
        }
    }

    fn child_table(
        &mut self,
        parent: &Table,
        key: &str,
        create: bool,
    ) -> io::Result<Option<Rc<Table>>> {
        match self.query_item(parent, key.as_bytes())? {
            Value::Table(table) => Ok(Some(table)),
            Value::Null if create => {
                let table = Rc::new(Table::new());
                parent.insert(key, Value::Table(table.clone()));
                Ok(Some(table))
            }
            _ => Ok(None),
        }
    }

    /// `root[module][node][var]`, if present.
    pub fn get_rtvalue(
        &mut self,
        module: &str,
        node: &str,
        var: &str,
    ) -> io::Result<Option<Value>> {
        let root = self.root.clone();
        let Some(m) = self.child_table(&root, module, false)? else {
            return Ok(None);
        };
        let Some(n) = self.child_table(&m, node, false)? else {
            return Ok(None);
        };
        let value = self.query_item(&n, var.as_bytes())?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Store `value` at `root[module][node][var]`, creating the
    /// intermediate tables. A null value erases the entry.
    pub fn set_rtvalue(
        &mut self,
        module: &str,
        node: &str,
        var: &str,
        value: Value,
    ) -> io::Result<()> {
        let create = !value.is_null();
        let root = self.root.clone();
        let Some(m) = self.child_table(&root, module, create)? else {
            return Ok(());
        };
        let Some(n) = self.child_table(&m, node, create)? else {
            return Ok(());
        };
        if self.query_item(&n, var.as_bytes())?.ptr_eq(&value) {
            return Ok(());
        }
        n.insert(var, value);
        Ok(())
    }

    /// Write everything reachable from the root and point the header at it.
    pub fn flush(&mut self) -> io::Result<()> {
        let root = Value::Table(self.root.clone());
        let offset = self.write_data(&root)?;
        self.backend.seek(SeekFrom::Start(0))?;
        write_u64(&mut self.backend, offset)?;
        self.backend.flush()?;
        self.cache.retain(|_, entry| entry.is_live());
        debug!("flushed store, root at {offset}, {} cached", self.cache.len());
        Ok(())
    }
}
