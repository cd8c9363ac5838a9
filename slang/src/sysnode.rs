/// Builtin nodes reachable by their exact dotted name.
///
/// A builtin runs in the context of the node that called it, so `.name`
/// and `.fission` see the caller.
use std::{
    collections::HashMap,
    io::{self, Read, Write},
    sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::{
    code::Node,
    ext::{NativeCall, NativeFn, RetCode},
};

pub const BUILTINS: &[(&str, NativeFn)] = &[
    (".modulename", module_name),
    (".name", node_name),
    (".fission", fission),
    (".getchar", getchar),
    (".print", print),
];

#[derive(Clone, Default)]
pub struct SysNodes(Arc<RwLock<HashMap<String, NativeFn>>>);

impl SysNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let nodes = Self::new();
        for &(name, func) in BUILTINS {
            nodes.add(name, func);
        }
        nodes
    }

    pub fn add(&self, name: impl Into<String>, func: NativeFn) {
        self.0.write().insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.0.read().get(name).copied()
    }
}

fn module_name(call: &mut NativeCall<'_>) -> RetCode {
    let name = call
        .runtime()
        .current()
        .module
        .as_ref()
        .map(|m| m.borrow().name().to_owned())
        .unwrap_or_default();
    call.set_bytes(0, name);
    RetCode::Ok
}

fn node_name(call: &mut NativeCall<'_>) -> RetCode {
    let current = call.runtime().current();
    let mut name = current
        .module
        .as_ref()
        .map(|m| m.borrow().name().to_owned())
        .unwrap_or_default();
    if let Some(node) = &current.node {
        name.push('.');
        name.push_str(&node.name);
    }
    call.set_bytes(0, name);
    RetCode::Ok
}

fn fission(call: &mut NativeCall<'_>) -> RetCode {
    let Some(name) = call.arg_bytes(0).map(|b| String::from_utf8_lossy(b).into_owned()) else {
        error!("missing node name");
        return RetCode::Ok;
    };
    let current = call.runtime().current();
    let (Some(module), Some(owner)) = (current.module.clone(), current.node.clone()) else {
        error!("missing node name");
        return RetCode::Ok;
    };
    let node = Node::fission(name, &owner);
    if !module.borrow_mut().add(node) {
        error!("name occupied");
    }
    RetCode::Ok
}

fn getchar(call: &mut NativeCall<'_>) -> RetCode {
    let mut byte = [0u8; 1];
    let c = match io::stdin().lock().read(&mut byte) {
        Ok(1) => byte[0] as i64,
        _ => 0,
    };
    call.set_int(0, c);
    RetCode::Ok
}

fn print(call: &mut NativeCall<'_>) -> RetCode {
    let mut out = io::stdout().lock();
    for i in 0..call.arg_count() {
        if let Some(bytes) = call.arg_bytes(i) {
            if out.write_all(bytes).is_err() {
                return RetCode::Error;
            }
        }
    }
    match out.write_all(b"\n").and_then(|_| out.flush()) {
        Ok(()) => RetCode::Ok,
        Err(_) => RetCode::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RuntimeSettings, runtime::Runtime, value::Value};

    fn runtime_with(source: &str) -> Runtime {
        let mut rt = Runtime::new(RuntimeSettings::in_memory()).unwrap();
        rt.load_module_source("m", source.as_bytes()).unwrap();
        rt
    }

    #[test]
    fn test_builtins_registered() {
        let nodes = SysNodes::with_builtins();
        for (name, _) in BUILTINS {
            assert!(nodes.get(name).is_some());
        }
        assert!(nodes.get(".missing").is_none());
    }

    #[test]
    fn test_name_sees_caller() {
        let mut rt = runtime_with(".Who()(n){ ()>.name>(n); <n> }");
        let mut returns = [Value::Null];
        rt.call_node(".m.Who", &[], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"m.Who"[..]));
    }

    #[test]
    fn test_modulename() {
        let mut rt = runtime_with(".Who()(n){ ()>.modulename>(n); <n> }");
        let mut returns = [Value::Null];
        rt.call_node(".m.Who", &[], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"m"[..]));
    }

    #[test]
    fn test_fission_creates_sibling() {
        let mut rt = runtime_with(
            r#".Counter(name)()(n) {
                (name)>.fission;
                n = ?"n + 1";
                <n>
            }"#,
        );
        let mut returns = [Value::Null];
        rt.call_node(".m.Counter", &[Value::str("Other")], &mut returns)
            .unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"1"[..]));

        // The sibling starts from the state the caller had when it split.
        rt.call_node(".m.Other", &[], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"1"[..]));
        rt.call_node(".m.Counter", &[], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"2"[..]));
    }

    #[test]
    fn test_fission_name_occupied() {
        let mut rt = runtime_with(r#".A(){ ("A")>.fission; <"ok"> }"#);
        let mut returns = [Value::Null];
        rt.call_node(".m.A", &[], &mut returns).unwrap();
        assert_eq!(returns[0].as_bytes(), Some(&b"ok"[..]));
        assert_eq!(rt.module("m").unwrap().borrow().nodes().len(), 1);
    }
}
