//! # Slang
//!
//! A small scripting language: source files hold dotted nodes, nodes are
//! parsed into code lists and run by a tree-walking interpreter. Nodes can
//! keep state between calls, and part of that state is persisted in a lazy
//! on-disk value store.
//!
//! ## Architecture
//!
//! ```text
//!  .sl source ──▶ Lexer ──▶ Parser ──▶ Node/Code ──▶ .sc dump
//!                                          │
//!                                          ▼
//!                   Runtime (modules, builtins, extension libraries)
//!                                          │
//!                                          ▼
//!                   Interpreter ◀──▶ Store (sl.data)
//! ```
//!
//! ```rust
//! use slang::{Runtime, RuntimeSettings, Value};
//!
//! let mut rt = Runtime::new(RuntimeSettings::in_memory()).unwrap();
//! rt.load_module_source("demo", br#".Add(a, b)(r){ r = ?"a + b"; <r> }"#)
//!     .unwrap();
//! let mut returns = [Value::Null];
//! rt.call_node(".demo.Add", &[Value::str("1.5"), Value::str("2")], &mut returns)
//!     .unwrap();
//! assert_eq!(returns[0].as_bytes(), Some(&b"3.5"[..]));
//! ```
//!
pub mod code;
pub mod codedump;
pub mod config;
pub mod decimal;
pub mod error;
pub mod eval;
pub mod ext;
pub mod interp;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod span;
pub mod store;
pub mod sysnode;
pub mod text;
pub mod value;
mod wire;

pub use code::{Code, Node, NodeKind, Params};
pub use config::RuntimeSettings;
pub use error::{ParseError, RuntimeError, ScriptError, SourceError, SyntaxErrorKind};
pub use ext::{ExtLibraries, ExtLibrary, NativeCall, NativeFn, RetCode};
pub use parser::{parse_source, parse_source_file};
pub use runtime::{CallContext, Module, Runtime};
pub use store::Store;
pub use value::{Table, Value, ValueType, live_values};
