use std::io;

use thiserror::Error;

use crate::span::Pos;

/// Fixed catalog of syntax diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    Keyword,
    NodeDef,
    NodeBegin,
    NodeName,
    NodeParam,
    NodeBody,
    MissingName,
    NameOccupied,
    UnclosedString,
    VariableName,
    Word,
    ParamCount,
    ReturnCount,
    Expression,
    Syntax,
}

impl SyntaxErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            Self::Keyword => "wrong keyword",
            Self::NodeDef => "missing define token",
            Self::NodeBegin => "missing node start token",
            Self::NodeName => "the first character of the node name is illegal",
            Self::NodeParam => "node's parameter format error",
            Self::NodeBody => "missing node body",
            Self::MissingName => "missing node name",
            Self::NameOccupied => "name occupied",
            Self::UnclosedString => "unclosed string",
            Self::VariableName => "variable name error",
            Self::Word => "illegal characters",
            Self::ParamCount => "parameter's count cannot exceed 1000",
            Self::ReturnCount => "return's count cannot exceed 1000",
            Self::Expression => "expression error",
            Self::Syntax => "syntax error",
        }
    }
}

impl std::fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {pos}")]
pub struct ParseError {
    pub kind: SyntaxErrorKind,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(kind: SyntaxErrorKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    /// Render as `file [line:col] message`, the offending line and a caret.
    pub fn render(&self, file: &str, src: &[u8]) -> String {
        let line = String::from_utf8_lossy(self.pos.line_text(src));
        let pad = " ".repeat(self.pos.column.saturating_sub(1));
        format!("{file} [{}] {}\n{line}\n{pad}^", self.pos, self.kind)
    }
}

/// Failure to turn a source file into nodes.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("{rendered}")]
    Parse { rendered: String, error: ParseError },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("call error, '{0}' not found")]
    NodeNotFound(String),
    #[error("load {0} error")]
    ModuleLoad(String),
    #[error("node '{0}' has no body")]
    EmptyNode(String),
    #[error("bad operand for {0}")]
    BadOperand(&'static str),
    #[error("native node '{0}' failed")]
    Native(String),
    #[error("call '{name}' error({source})")]
    CallFailed {
        name: String,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error(transparent)]
    Store(#[from] io::Error),
}

/// Failure to run or compile a script file from the command line.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("cannot load {path}: {source}")]
    Load { path: String, source: io::Error },
    #[error("{0} defines no nodes")]
    Empty(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
