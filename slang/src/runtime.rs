/// Module registry and call dispatch.
///
/// A call names its target as `.module.node`. Modules are looked up in
/// the registry, then next to the current module, then loaded from disk
/// or from an extension library. A name that no module provides falls
/// through to the builtins.
use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    rc::Rc,
    sync::Arc,
};

use log::{debug, error, trace};

use crate::{
    code::{Node, NodeKind},
    codedump,
    config::RuntimeSettings,
    error::{ParseError, RuntimeError},
    ext::{ExtLibraries, ExtLibrary, NativeCall, NativeFn, RetCode},
    interp,
    parser::{parse_source, parse_source_file},
    store::Store,
    sysnode::SysNodes,
    value::Value,
};

// ═══════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════

pub struct Module {
    name: String,
    nodes: Vec<Rc<Node>>,
    index: HashMap<String, usize>,
    library: Option<Arc<dyn ExtLibrary>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: name.trim_start_matches('.').to_owned(),
            nodes: Vec::new(),
            index: HashMap::new(),
            library: None,
        }
    }

    /// Later nodes whose name is already taken are dropped.
    pub fn from_nodes(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        let mut module = Self::new(name);
        for node in nodes {
            if !module.add(node) {
                debug!("module {}: duplicate node dropped", module.name);
            }
        }
        module
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Rc<Node>] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<Rc<Node>> {
        self.index.get(name).map(|&i| self.nodes[i].clone())
    }

    pub fn first(&self) -> Option<Rc<Node>> {
        self.nodes.first().cloned()
    }

    /// `false` if the name is occupied.
    pub fn add(&mut self, node: Node) -> bool {
        if self.index.contains_key(&node.name) {
            return false;
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(Rc::new(node));
        true
    }

    pub fn add_native(&mut self, name: &str, func: NativeFn) -> bool {
        self.add(Node::native(name, func))
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            library.unregister(&self.name);
        }
    }
}

pub type ModuleRef = Rc<RefCell<Module>>;

/// The module and node a call runs in.
#[derive(Clone, Default)]
pub struct CallContext {
    pub module: Option<ModuleRef>,
    pub node: Option<Rc<Node>>,
}

// ═══════════════════════════════════════════════════════════════════
// Runtime
// ═══════════════════════════════════════════════════════════════════

pub struct Runtime {
    modules: HashMap<String, ModuleRef>,
    current: CallContext,
    caller: CallContext,
    store: Store,
    sysnodes: SysNodes,
    libraries: ExtLibraries,
    settings: RuntimeSettings,
}

impl Runtime {
    pub fn new(settings: RuntimeSettings) -> io::Result<Self> {
        let store = if settings.persistent {
            Store::open(&settings.data_path())?
        } else {
            Store::in_memory()?
        };
        Ok(Self {
            modules: HashMap::new(),
            current: CallContext::default(),
            caller: CallContext::default(),
            store,
            sysnodes: SysNodes::with_builtins(),
            libraries: ExtLibraries::new(),
            settings,
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn sysnodes(&self) -> &SysNodes {
        &self.sysnodes
    }

    pub fn libraries(&self) -> &ExtLibraries {
        &self.libraries
    }

    pub fn current(&self) -> &CallContext {
        &self.current
    }

    pub fn caller(&self) -> &CallContext {
        &self.caller
    }

    pub fn set_current_module(&mut self, module: Option<ModuleRef>) {
        self.current.module = module;
    }

    pub fn module(&self, name: &str) -> Option<ModuleRef> {
        self.modules.get(name.trim_start_matches('.')).cloned()
    }

    /// Register `nodes` as module `name`, replacing any module of that name.
    pub fn load_module_from_nodes(&mut self, name: &str, nodes: Vec<Node>) -> ModuleRef {
        self.insert_module(Module::from_nodes(name, nodes))
    }

    pub fn load_module_source(&mut self, name: &str, src: &[u8]) -> Result<ModuleRef, ParseError> {
        let nodes = parse_source(src)?;
        Ok(self.load_module_from_nodes(name, nodes))
    }

    fn insert_module(&mut self, module: Module) -> ModuleRef {
        let name = module.name().to_owned();
        debug!("module {name}: {} nodes", module.nodes().len());
        let module = Rc::new(RefCell::new(module));
        self.modules.insert(name, module.clone());
        module
    }

    /// Write all state to the store file.
    pub fn flush(&mut self) -> io::Result<()> {
        self.store.flush()
    }

    // ═══════════════════════════════════════════════════════════════
    // Module resolution
    // ═══════════════════════════════════════════════════════════════

    pub fn resolve_module(&mut self, name: &str) -> Result<ModuleRef, RuntimeError> {
        let name = name.trim_start_matches('.');
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let relative = self.relative_name(name);
        if let Some(module) = relative.as_ref().and_then(|r| self.modules.get(r)) {
            return Ok(module.clone());
        }
        let candidates: Vec<String> = relative.into_iter().chain([name.to_owned()]).collect();
        for full in &candidates {
            if let Some(module) = self.load_module_file(full) {
                return Ok(module);
            }
        }
        error!("load {name} error");
        Err(RuntimeError::ModuleLoad(name.to_owned()))
    }

    /// `name` as a sibling of the current module: `a.b` + `c` is `a.c`.
    fn relative_name(&self, name: &str) -> Option<String> {
        let current = self.current.module.as_ref()?;
        let current = current.borrow();
        let parent = &current.name()[..current.name().rfind('.')?];
        Some(format!("{parent}.{name}"))
    }

    fn load_module_file(&mut self, full: &str) -> Option<ModuleRef> {
        let binary = self.settings.module_path(full, &self.settings.binary_ext);
        if binary.is_file() {
            match codedump::load_file(&binary) {
                Ok(nodes) => return Some(self.load_module_from_nodes(full, nodes)),
                Err(err) => error!("load {} error: {err}", binary.display()),
            }
        }

        let source = self.settings.module_path(full, &self.settings.source_ext);
        if source.is_file() {
            match parse_source_file(&source) {
                Ok(nodes) => return Some(self.load_module_from_nodes(full, nodes)),
                Err(err) => error!("{err}"),
            }
        }

        let library = self.libraries.get(full)?;
        let mut module = Module::new(full);
        if !library.register(&mut module) {
            error!("extension library {full} failed to register");
            return None;
        }
        module.library = Some(library);
        Some(self.insert_module(module))
    }

    // ═══════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════

    /// Call `name` with `args`, filling `returns`. The call context is
    /// restored afterwards whatever the outcome.
    pub fn call_node(
        &mut self,
        name: &str,
        args: &[Value],
        returns: &mut [Value],
    ) -> Result<(), RuntimeError> {
        let saved_current = self.current.clone();
        let saved_caller = self.caller.clone();
        let result = self.dispatch(name, args, returns);
        self.current = saved_current;
        self.caller = saved_caller;

        match result {
            Ok(code) if code.is_ok() => Ok(()),
            Ok(RetCode::NoNode) => {
                let err = RuntimeError::NodeNotFound(name.to_owned());
                error!("{err}");
                Err(err)
            }
            Ok(_) => Err(self.call_failed(name, RuntimeError::Native(name.to_owned()))),
            Err(err) => Err(self.call_failed(name, err)),
        }
    }

    fn call_failed(&self, name: &str, source: RuntimeError) -> RuntimeError {
        let err = RuntimeError::CallFailed {
            name: name.to_owned(),
            source: Box::new(source),
        };
        error!("{err}");
        err
    }

    fn dispatch(
        &mut self,
        name: &str,
        args: &[Value],
        returns: &mut [Value],
    ) -> Result<RetCode, RuntimeError> {
        match self.call_user_node(name, args, returns)? {
            RetCode::NoNode => match self.sysnodes.get(name) {
                Some(func) => {
                    trace!("builtin {name}");
                    Ok(func(&mut NativeCall::new(self, args, returns)))
                }
                None => Ok(RetCode::NoNode),
            },
            code => Ok(code),
        }
    }

    fn call_user_node(
        &mut self,
        name: &str,
        args: &[Value],
        returns: &mut [Value],
    ) -> Result<RetCode, RuntimeError> {
        let Some(path) = name.strip_prefix('.') else {
            return Ok(RetCode::NoNode);
        };
        let (module_name, node_name) = match path.rfind('.') {
            Some(dot) => (&path[..dot], &path[dot + 1..]),
            None => ("", path),
        };
        if node_name.is_empty() {
            return Ok(RetCode::NoNode);
        }
        let module = if module_name.is_empty() {
            match self.current.module.clone() {
                Some(module) => module,
                None => return Ok(RetCode::NoNode),
            }
        } else {
            self.resolve_module(module_name)?
        };
        let found = module.borrow().get(node_name);
        let Some(node) = found else {
            return Ok(RetCode::NoNode);
        };

        trace!("call {name}");
        self.caller = self.current.clone();
        self.current = CallContext {
            module: Some(module.clone()),
            node: Some(node.clone()),
        };
        match node.kind {
            NodeKind::Native(func) => Ok(func(&mut NativeCall::new(self, args, returns))),
            NodeKind::Script | NodeKind::Fission => {
                self.run_script(&module, &node, args, returns)?;
                Ok(RetCode::Ok)
            }
        }
    }

    /// Run a script node in a fresh frame. Retained slots are copied in
    /// from the node and back out afterwards; state slots are loaded from
    /// the store on first use and saved after every call.
    fn run_script(
        &mut self,
        module: &ModuleRef,
        node: &Node,
        args: &[Value],
        returns: &mut [Value],
    ) -> Result<(), RuntimeError> {
        let body = node
            .body()
            .cloned()
            .ok_or_else(|| RuntimeError::EmptyNode(node.name.clone()))?;
        let module_name = module.borrow().name().to_owned();
        let params = &node.params;
        let base = params.count1();

        if !node.state_loaded().get() {
            for i in params.state_range() {
                let var = &params.names()[i];
                if let Some(value) = self.store.get_rtvalue(&module_name, &node.name, var)? {
                    node.retained().borrow_mut()[i - base] = value;
                }
            }
            node.state_loaded().set(true);
        }

        let mut frame = vec![Value::Null; params.len()];
        for (slot, arg) in frame[..base].iter_mut().zip(args) {
            *slot = arg.clone();
        }
        for (slot, value) in frame[base..].iter_mut().zip(node.retained().borrow().iter()) {
            *slot = value.clone();
        }

        let result = interp::run_code(self, &body, &mut frame, params, returns);

        {
            let mut retained = node.retained().borrow_mut();
            for (kept, value) in retained.iter_mut().zip(frame.drain(base..)) {
                *kept = value;
            }
        }
        for i in params.state_range() {
            let var = &params.names()[i];
            let value = node.retained().borrow()[i - base].clone();
            if let Err(err) = self.store.set_rtvalue(&module_name, &node.name, var, value) {
                error!("save data error[{module_name}.{}-{var}]: {err}", node.name);
            }
        }

        result.map(|_| ())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(err) = self.store.flush() {
            error!("save data error: {err}");
        }
    }
}
