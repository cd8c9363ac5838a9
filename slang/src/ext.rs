/// Native nodes and extension libraries.
///
/// A native node is a plain function receiving a [`NativeCall`]: the
/// runtime, the call's arguments and its return slots. Extension
/// libraries bind such functions into a module when that module is first
/// resolved.
use std::{collections::HashMap, io, rc::Rc, sync::Arc};

use parking_lot::RwLock;

use crate::{
    decimal::atoi,
    error::RuntimeError,
    runtime::{Module, Runtime},
    value::{Table, Value},
};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCode {
    Error = 0,
    Ok = 1,
    Return = 2,
    NoNode = 3,
}

impl RetCode {
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, RetCode::Ok | RetCode::Return)
    }
}

pub type NativeFn = fn(&mut NativeCall<'_>) -> RetCode;

pub struct NativeCall<'rt> {
    runtime: &'rt mut Runtime,
    args: &'rt [Value],
    returns: &'rt mut [Value],
}

impl<'rt> NativeCall<'rt> {
    pub fn new(runtime: &'rt mut Runtime, args: &'rt [Value], returns: &'rt mut [Value]) -> Self {
        Self {
            runtime,
            args,
            returns,
        }
    }

    pub fn runtime(&mut self) -> &mut Runtime {
        self.runtime
    }

    // ═══════════════════════════════════════════════════════════════
    // Arguments
    // ═══════════════════════════════════════════════════════════════

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> Option<&Value> {
        self.args.get(i)
    }

    /// Integer value of a string argument. Anything else reads as 0.
    pub fn arg_int(&self, i: usize) -> i64 {
        self.arg_bytes(i).map_or(0, atoi)
    }

    pub fn arg_bytes(&self, i: usize) -> Option<&[u8]> {
        self.args.get(i)?.as_bytes()
    }

    pub fn arg_table(&self, i: usize) -> Option<Rc<Table>> {
        self.args.get(i)?.as_table().cloned()
    }

    // ═══════════════════════════════════════════════════════════════
    // Return slots
    // ═══════════════════════════════════════════════════════════════

    #[inline]
    pub fn return_count(&self) -> usize {
        self.returns.len()
    }

    /// Bind return slot `i`. Out-of-range slots are an error.
    pub fn set_value(&mut self, i: usize, value: Value) -> RetCode {
        match self.returns.get_mut(i) {
            Some(slot) => {
                *slot = value;
                RetCode::Ok
            }
            None => RetCode::Error,
        }
    }

    pub fn set_int(&mut self, i: usize, n: i64) -> RetCode {
        self.set_value(i, Value::str(n.to_string()))
    }

    /// Borrowed bytes are copied, an owned buffer is moved.
    pub fn set_bytes(&mut self, i: usize, bytes: impl Into<Vec<u8>>) -> RetCode {
        self.set_value(i, Value::str(bytes))
    }

    pub fn set_table(&mut self, i: usize, table: Rc<Table>) -> RetCode {
        self.set_value(i, Value::Table(table))
    }

    // ═══════════════════════════════════════════════════════════════
    // Tables
    // ═══════════════════════════════════════════════════════════════

    pub fn new_table(&self) -> Rc<Table> {
        Rc::new(Table::new())
    }

    /// Entry `key`, paged in from the store if it is not resident yet.
    pub fn table_get(&mut self, table: &Table, key: &[u8]) -> io::Result<Value> {
        self.runtime.store().query_item(table, key)
    }

    pub fn table_set(&mut self, table: &Table, key: &[u8], value: Value) {
        table.insert(key, value);
    }

    /// Visit entries in order until `f` returns `false`.
    pub fn table_foreach<F>(&mut self, table: &Table, mut f: F) -> io::Result<()>
    where
        F: FnMut(&[u8], &Value) -> bool,
    {
        for key in table.keys() {
            if !table.contains(&key) {
                continue;
            }
            let value = self.table_get(table, &key)?;
            if !f(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Runtime
    // ═══════════════════════════════════════════════════════════════

    /// Call another node and collect `returns` return values.
    pub fn call(
        &mut self,
        name: &str,
        args: &[Value],
        returns: usize,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut slots = vec![Value::Null; returns];
        self.runtime.call_node(name, args, &mut slots)?;
        Ok(slots)
    }

    /// Add a native node to the module of the running node.
    pub fn register_node(&mut self, name: &str, func: NativeFn) -> bool {
        match self.runtime.current().module.as_ref() {
            Some(module) => module.borrow_mut().add_native(name, func),
            None => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Libraries
// ═══════════════════════════════════════════════════════════════════

/// A compiled-in extension library providing the nodes of one module.
pub trait ExtLibrary: Send + Sync {
    /// Bind the library's nodes into `module`. `false` aborts the load.
    fn register(&self, module: &mut Module) -> bool;

    /// Called when the module built by `register` is released.
    fn unregister(&self, _module: &str) {}
}

#[derive(Clone, Default)]
pub struct ExtLibraries(Arc<RwLock<HashMap<String, Arc<dyn ExtLibrary>>>>);

impl ExtLibraries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, module: impl Into<String>, library: Arc<dyn ExtLibrary>) {
        self.0.write().insert(module.into(), library);
    }

    pub fn get(&self, module: &str) -> Option<Arc<dyn ExtLibrary>> {
        self.0.read().get(module).cloned()
    }

    pub fn remove(&self, module: &str) -> Option<Arc<dyn ExtLibrary>> {
        self.0.write().remove(module)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNREGISTERED: AtomicUsize = AtomicUsize::new(0);

    struct MathLib;

    fn double(call: &mut NativeCall<'_>) -> RetCode {
        let n = call.arg_int(0);
        call.set_int(0, n * 2)
    }

    fn keys(call: &mut NativeCall<'_>) -> RetCode {
        let Some(table) = call.arg_table(0) else {
            return RetCode::Error;
        };
        let mut joined = Vec::new();
        let visited = call.table_foreach(&table, |key, _| {
            joined.extend_from_slice(key);
            joined.len() < 2
        });
        if visited.is_err() {
            return RetCode::Error;
        }
        call.set_bytes(0, joined)
    }

    impl ExtLibrary for MathLib {
        fn register(&self, module: &mut Module) -> bool {
            module.add_native("double", double) && module.add_native("keys", keys)
        }

        fn unregister(&self, _module: &str) {
            UNREGISTERED.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn runtime() -> Runtime {
        Runtime::new(RuntimeSettings::in_memory()).unwrap()
    }

    #[test]
    fn test_library_nodes_are_callable() {
        let mut rt = runtime();
        rt.libraries().add("math", Arc::new(MathLib));
        let mut returns = [Value::Null];
        rt.call_node(".math.double", &[Value::str("21")], &mut returns)
            .unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"42"[..]));
    }

    #[test]
    fn test_table_foreach_stops_early() {
        let mut rt = runtime();
        rt.libraries().add("math", Arc::new(MathLib));
        let table = Value::table();
        for key in ["a", "b", "c"] {
            table.as_table().unwrap().insert(key, Value::str("1"));
        }
        let mut returns = [Value::Null];
        rt.call_node(".math.keys", &[table], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"ab"[..]));
    }

    #[test]
    fn test_unregister_on_release() {
        let before = UNREGISTERED.load(Ordering::SeqCst);
        {
            let mut rt = runtime();
            rt.libraries().add("math", Arc::new(MathLib));
            let mut returns = [Value::Null];
            rt.call_node(".math.double", &[Value::str("1")], &mut returns)
                .unwrap();
        }
        assert!(UNREGISTERED.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn test_return_slot_out_of_range() {
        let mut rt = runtime();
        let mut returns: [Value; 0] = [];
        let mut call = NativeCall::new(&mut rt, &[], &mut returns);
        assert_eq!(call.set_int(0, 1), RetCode::Error);
        assert_eq!(call.return_count(), 0);
    }
}
