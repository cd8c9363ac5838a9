/// Executable representation of parsed nodes.
///
/// Code is built with [`CodeBuilder`] / [`InstrBuilder`] while parsing and
/// then frozen into [`Code`] / [`Instr`], whose operand arrays never change
/// again.
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    ops::Range,
    rc::Rc,
};

use crate::{eval::CompiledExpr, ext::NativeFn, lexer::Scope, value::Value};

pub const MAX_CALL_OPERANDS: usize = 1000;
pub const NODE_ASYNC: i32 = 0x0100_0000;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Noop = 0,
    Assign = 1,
    Evaluate = 2,
    Format = 3,
    If = 4,
    While = 5,
    Return = 6,
    Call = 7,
    ItemCount = 8,
    GetItem = 9,
    SetItem = 10,
    Foreach = 11,
    End = 12,
}

impl Opcode {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => Self::Noop,
            1 => Self::Assign,
            2 => Self::Evaluate,
            3 => Self::Format,
            4 => Self::If,
            5 => Self::While,
            6 => Self::Return,
            7 => Self::Call,
            8 => Self::ItemCount,
            9 => Self::GetItem,
            10 => Self::SetItem,
            11 => Self::Foreach,
            12 => Self::End,
            _ => return None,
        })
    }
}

/// Packed argument/return counts of a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFlags {
    pub params: usize,
    pub returns: usize,
    pub is_async: bool,
}

impl CallFlags {
    pub fn pack(self) -> i32 {
        let counts = (self.params * 1000 + self.returns) as i32;
        if self.is_async {
            counts | NODE_ASYNC
        } else {
            counts
        }
    }

    pub fn unpack(v: i32) -> Self {
        let counts = (v & !NODE_ASYNC).max(0) as usize;
        Self {
            params: counts / 1000,
            returns: counts % 1000,
            is_async: v & NODE_ASYNC != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Variable(usize),
    Const(Vec<u8>),
    Code(Code),
    Eval(Rc<CompiledExpr>),
    Init,
    Flags(CallFlags),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    operands: Box<[Operand]>,
}

impl Instr {
    #[inline]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }
}

pub struct InstrBuilder {
    op: Opcode,
    operands: Vec<Operand>,
}

impl InstrBuilder {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            operands: Vec::new(),
        }
    }

    pub fn push(&mut self, operand: Operand) -> &mut Self {
        self.operands.push(operand);
        self
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn finish(self) -> Instr {
        Instr {
            op: self.op,
            operands: self.operands.into_boxed_slice(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    instrs: Box<[Instr]>,
}

impl Code {
    #[inline]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

#[derive(Default)]
pub struct CodeBuilder {
    instrs: Vec<Instr>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn finish(self) -> Code {
        Code {
            instrs: self.instrs.into_boxed_slice(),
        }
    }
}

impl FromIterator<Instr> for Code {
    fn from_iter<T: IntoIterator<Item = Instr>>(iter: T) -> Self {
        Code {
            instrs: iter.into_iter().collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════

/// Parameter names of a node, split in three bands: call arguments,
/// pass-through slots and persisted state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    names: Vec<String>,
    count1: usize,
    count2: usize,
    index: HashMap<String, usize>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored parts. Fails on duplicate names or bad counts.
    pub fn from_parts(names: Vec<String>, count1: usize, count2: usize) -> Option<Self> {
        if count1 + count2 > names.len() {
            return None;
        }
        let mut params = Self::new();
        for name in names {
            if !params.push(name) {
                return None;
            }
        }
        params.count1 = count1;
        params.count2 = count2;
        Some(params)
    }

    /// Add a name to the group being parsed. Returns false on duplicates.
    pub fn push(&mut self, name: String) -> bool {
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name.clone(), self.names.len());
        self.names.push(name);
        true
    }

    /// Close parameter group `group` (1-based).
    pub fn end_group(&mut self, group: usize) {
        match group {
            1 => self.count1 = self.names.len(),
            2 => self.count2 = self.names.len() - self.count1,
            _ => {}
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn count1(&self) -> usize {
        self.count1
    }

    #[inline]
    pub fn count2(&self) -> usize {
        self.count2
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Slots whose values survive between calls.
    pub fn retained_range(&self) -> Range<usize> {
        self.count1..self.names.len()
    }

    /// Slots mirrored into the persistent store.
    pub fn state_range(&self) -> Range<usize> {
        (self.count1 + self.count2).min(self.names.len())..self.names.len()
    }
}

impl Scope for Params {
    fn slot_of(&self, name: &str) -> Option<usize> {
        self.index_of(name)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Nodes
// ═══════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
pub enum NodeKind {
    Script,
    Fission,
    Native(NativeFn),
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => f.write_str("Script"),
            Self::Fission => f.write_str("Fission"),
            Self::Native(_) => f.write_str("Native"),
        }
    }
}

pub struct Node {
    pub name: String,
    pub params: Params,
    pub kind: NodeKind,
    body: Option<Rc<Code>>,
    retained: RefCell<Vec<Value>>,
    state_loaded: Cell<bool>,
}

impl Node {
    pub fn script(name: impl Into<String>, params: Params, body: Code) -> Self {
        let retained = vec![Value::Null; params.retained_range().len()];
        Self {
            name: name.into(),
            params,
            kind: NodeKind::Script,
            body: Some(Rc::new(body)),
            retained: RefCell::new(retained),
            state_loaded: Cell::new(false),
        }
    }

    /// A second name for `owner`. The body is shared, the retained slots
    /// start as a snapshot of the owner's.
    pub fn fission(name: impl Into<String>, owner: &Node) -> Self {
        Self {
            name: name.into(),
            params: owner.params.clone(),
            kind: NodeKind::Fission,
            body: owner.body.clone(),
            retained: RefCell::new(owner.retained.borrow().clone()),
            state_loaded: Cell::new(owner.state_loaded.get()),
        }
    }

    pub fn native(name: impl Into<String>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
            kind: NodeKind::Native(func),
            body: None,
            retained: RefCell::new(Vec::new()),
            state_loaded: Cell::new(true),
        }
    }

    #[inline]
    pub fn body(&self) -> Option<&Rc<Code>> {
        self.body.as_ref()
    }

    pub fn shares_body(&self, other: &Node) -> bool {
        match (&self.body, &other.body) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn retained(&self) -> &RefCell<Vec<Value>> {
        &self.retained
    }

    pub(crate) fn state_loaded(&self) -> &Cell<bool> {
        &self.state_loaded
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("params", &self.params.names)
            .field("kind", &self.kind)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Listing
// ═══════════════════════════════════════════════════════════════════

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.name)?;
        let p = &self.params;
        let state = p.state_range();
        write!(f, "({})", p.names[..p.count1].join(","))?;
        if p.count2 > 0 || !state.is_empty() {
            write!(f, "({})", p.names[p.count1..state.start].join(","))?;
        }
        if !state.is_empty() {
            write!(f, "({})", p.names[state].join(","))?;
        }
        match (&self.kind, &self.body) {
            (NodeKind::Native(_), _) => writeln!(f, " <native>"),
            (NodeKind::Fission, _) => writeln!(f, " <fission>"),
            (NodeKind::Script, Some(body)) => {
                writeln!(f)?;
                write_code(f, body, p, 1)
            }
            (NodeKind::Script, None) => writeln!(f),
        }
    }
}

fn write_code(
    f: &mut fmt::Formatter<'_>,
    code: &Code,
    params: &Params,
    depth: usize,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for (i, instr) in code.instrs().iter().enumerate() {
        write!(f, "{indent}{i:>3} {:?}", instr.op)?;
        let mut nested = Vec::new();
        for operand in instr.operands() {
            match operand {
                Operand::Variable(slot) => match params.names().get(*slot) {
                    Some(name) => write!(f, " {name}")?,
                    None => write!(f, " ${slot}")?,
                },
                Operand::Const(text) => write!(f, " \"{}\"", text.escape_ascii())?,
                Operand::Code(code) => {
                    write!(f, " {{#{}}}", nested.len())?;
                    nested.push(code);
                }
                Operand::Eval(expr) => write!(f, " ?'{}'", expr.source.escape_ascii())?,
                Operand::Init => write!(f, " *")?,
                Operand::Flags(flags) => {
                    write!(f, " {}/{}", flags.params, flags.returns)?;
                    if flags.is_async {
                        write!(f, " async")?;
                    }
                }
            }
        }
        writeln!(f)?;
        for (n, code) in nested.into_iter().enumerate() {
            writeln!(f, "{indent}    #{n}:")?;
            write_code(f, code, params, depth + 2)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_flags_pack() {
        let flags = CallFlags {
            params: 2,
            returns: 1,
            is_async: false,
        };
        assert_eq!(flags.pack(), 2001);
        assert_eq!(CallFlags::unpack(2001), flags);
    }

    #[test]
    fn test_call_flags_async_bit() {
        let flags = CallFlags {
            params: 1000,
            returns: 1000,
            is_async: true,
        };
        assert_eq!(flags.pack() & NODE_ASYNC, NODE_ASYNC);
        assert_eq!(CallFlags::unpack(flags.pack()), flags);
    }

    #[test]
    fn test_param_groups() {
        let mut params = Params::new();
        assert!(params.push("a".into()));
        params.end_group(1);
        assert!(params.push("b".into()));
        params.end_group(2);
        assert!(params.push("c".into()));
        assert!(params.push("d".into()));
        params.end_group(3);
        assert!(!params.push("a".into()));
        assert_eq!(params.count1(), 1);
        assert_eq!(params.count2(), 1);
        assert_eq!(params.retained_range(), 1..4);
        assert_eq!(params.state_range(), 2..4);
        assert_eq!(params.index_of("c"), Some(2));
    }

    #[test]
    fn test_from_parts_rejects_bad_counts() {
        assert!(Params::from_parts(vec!["a".into()], 1, 1).is_none());
        assert!(Params::from_parts(vec!["a".into(), "a".into()], 1, 0).is_none());
    }

    #[test]
    fn test_fission_shares_body() {
        let mut code = CodeBuilder::new();
        code.push(InstrBuilder::new(Opcode::Noop).finish());
        let owner = Node::script("a", Params::new(), code.finish());
        let alias = Node::fission("b", &owner);
        assert!(alias.shares_body(&owner));
        assert!(matches!(alias.kind, NodeKind::Fission));
    }

    #[test]
    fn test_listing() {
        let mut params = Params::new();
        params.push("x".into());
        params.end_group(1);
        let mut assign = InstrBuilder::new(Opcode::Assign);
        assign.push(Operand::Variable(0)).push(Operand::Const(b"1".to_vec()));
        let node = Node::script("A", params, [assign.finish()].into_iter().collect());
        assert_eq!(node.to_string(), ".A(x)\n    0 Assign x \"1\"\n");
    }
}
