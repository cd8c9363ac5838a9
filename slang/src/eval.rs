/// Expression sub-language used by `?` conditions and `v=?x;`.
///
/// Text is compiled once into an [`Expr`] tree; variables stay names and
/// are bound to strings only when the tree runs, so a compiled expression
/// can be cached in code and run against any frame.
use std::io::{self, Read, Write};

use log::error;
use thiserror::Error;

use crate::{
    decimal::{self, Comparison},
    lexer::{char_at, is_space, is_special},
    wire::{invalid_data, read_bytes, read_i32, write_bytes, write_i32},
};

const EVT_NUMBER: i32 = 0;
const EVT_VARIABLE: i32 = 1;
const EVT_SUBEVAL: i32 = 2;

const CMP_BIT: i32 = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOp {
    Load,
    Add,
    Sub,
    Mul,
    Div,
    Cmp(Comparison),
}

impl EvalOp {
    /// Numeric code used in dumps: the operator's character, with
    /// `CMP_BIT` set for the two-character comparisons.
    fn code(self) -> i32 {
        match self {
            Self::Load => b'=' as i32,
            Self::Add => b'+' as i32,
            Self::Sub => b'-' as i32,
            Self::Mul => b'*' as i32,
            Self::Div => b'/' as i32,
            Self::Cmp(Comparison::Lt) => b'<' as i32,
            Self::Cmp(Comparison::Gt) => b'>' as i32,
            Self::Cmp(Comparison::Le) => b'<' as i32 | CMP_BIT,
            Self::Cmp(Comparison::Ge) => b'>' as i32 | CMP_BIT,
            Self::Cmp(Comparison::Eq) => b'=' as i32 | CMP_BIT,
            Self::Cmp(Comparison::Ne) => b'!' as i32 | CMP_BIT,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        let ch = u8::try_from(code & !CMP_BIT).ok()?;
        Some(match (ch, code & CMP_BIT != 0) {
            (b'=', false) => Self::Load,
            (b'+', false) => Self::Add,
            (b'-', false) => Self::Sub,
            (b'*', false) => Self::Mul,
            (b'/', false) => Self::Div,
            (b'<', false) => Self::Cmp(Comparison::Lt),
            (b'>', false) => Self::Cmp(Comparison::Gt),
            (b'<', true) => Self::Cmp(Comparison::Le),
            (b'>', true) => Self::Cmp(Comparison::Ge),
            (b'=', true) => Self::Cmp(Comparison::Eq),
            (b'!', true) => Self::Cmp(Comparison::Ne),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Vec<u8>),
    Variable(String),
    /// Operand list; the first entry is always `Load`.
    Sequence(Vec<(EvalOp, Expr)>),
}

/// A compiled expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    pub source: Vec<u8>,
    pub expr: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &[u8]) -> Result<Self, EvalError> {
        Ok(Self {
            source: source.to_vec(),
            expr: compile(source)?,
        })
    }

    pub fn run(&self, bindings: &dyn Bindings) -> Vec<u8> {
        run(&self.expr, bindings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expression error at byte {pos}")]
pub struct EvalError {
    pub pos: usize,
}

/// Late binding of expression variables.
pub trait Bindings {
    /// `None` for names that are not declared; a declared name holding a
    /// non-string yields an empty string.
    fn value_of(&self, name: &str) -> Option<Vec<u8>>;
}

impl Bindings for () {
    fn value_of(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════
// Scanner
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Vec<u8>),
    Name(String),
    Key(u8),
}

#[inline]
fn is_eval_key(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'=' | b'!' | b'+' | b'-' | b'*' | b'/'
    )
}

struct Scanner<'a> {
    text: &'a [u8],
    pos: usize,
    peeked: Option<(Token, usize)>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a [u8]) -> Self {
        Self {
            text,
            pos: 0,
            peeked: None,
        }
    }

    fn skip_space(&mut self) {
        while self.pos < self.text.len() && is_space(self.text[self.pos]) {
            self.pos += 1;
        }
    }

    fn error(&self) -> EvalError {
        EvalError { pos: self.pos }
    }

    /// Next token. `-` opens a number or a name when an operand is expected.
    fn next(&mut self, operand: bool) -> Result<Option<Token>, EvalError> {
        if let Some((token, end)) = self.peeked.take() {
            self.pos = end;
            return Ok(Some(token));
        }
        self.skip_space();
        let Some(&c) = self.text.get(self.pos) else {
            return Ok(None);
        };
        if c == b'\'' {
            let start = self.pos + 1;
            let end = self.text[start..]
                .iter()
                .position(|&b| b == b'\'')
                .map_or(self.text.len(), |i| start + i);
            self.pos = (end + 1).min(self.text.len());
            return Ok(Some(Token::Literal(self.text[start..end].to_vec())));
        }
        if is_eval_key(c) && !(c == b'-' && operand) {
            self.pos += 1;
            return Ok(Some(Token::Key(c)));
        }
        if let Some(number) = self.number() {
            return Ok(Some(Token::Literal(number)));
        }
        self.name().map(|name| Some(Token::Name(name)))
    }

    fn peek(&mut self, operand: bool) -> Result<Option<&Token>, EvalError> {
        if self.peeked.is_none() {
            let start = self.pos;
            let token = self.next(operand)?;
            let end = self.pos;
            self.pos = start;
            self.peeked = token.map(|t| (t, end));
        }
        Ok(self.peeked.as_ref().map(|(t, _)| t))
    }

    fn number(&mut self) -> Option<Vec<u8>> {
        let text = self.text;
        let start = self.pos;
        let mut i = start;
        if text.get(i) == Some(&b'-') {
            i += 1;
        }
        let digits = i;
        while i < text.len() && text[i].is_ascii_digit() {
            i += 1;
        }
        if i == digits {
            return None;
        }
        if text.get(i) == Some(&b'.') {
            i += 1;
            while i < text.len() && text[i].is_ascii_digit() {
                i += 1;
            }
        }
        self.pos = i;
        Some(text[start..i].to_vec())
    }

    fn name(&mut self) -> Result<String, EvalError> {
        let text = self.text;
        let start = self.pos;
        let mut i = start;
        if text.get(i) == Some(&b'-') {
            i += 1;
        }
        while i < text.len() && !is_space(text[i]) && !is_special(text[i]) {
            i += char_at(text, i).len();
        }
        if i == start {
            return Err(self.error());
        }
        self.pos = i;
        Ok(String::from_utf8_lossy(&text[start..i]).into_owned())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Compiler
// ═══════════════════════════════════════════════════════════════════

pub fn compile(text: &[u8]) -> Result<Expr, EvalError> {
    let mut scanner = Scanner::new(text);
    let expr = comparison(&mut scanner)?;
    match scanner.next(false)? {
        None => Ok(expr),
        Some(_) => Err(scanner.error()),
    }
}

fn binary_op(scanner: &mut Scanner<'_>, level: u8) -> Result<Option<EvalOp>, EvalError> {
    let key = match scanner.peek(false)? {
        Some(Token::Key(key)) => *key,
        _ => return Ok(None),
    };
    let op = match (level, key) {
        (0, b'<' | b'>' | b'=' | b'!') => {
            scanner.next(false)?;
            let equals = scanner.text.get(scanner.pos) == Some(&b'=');
            if equals {
                scanner.pos += 1;
            }
            return match (key, equals) {
                (b'<', false) => Ok(Some(EvalOp::Cmp(Comparison::Lt))),
                (b'>', false) => Ok(Some(EvalOp::Cmp(Comparison::Gt))),
                (b'<', true) => Ok(Some(EvalOp::Cmp(Comparison::Le))),
                (b'>', true) => Ok(Some(EvalOp::Cmp(Comparison::Ge))),
                (b'=', true) => Ok(Some(EvalOp::Cmp(Comparison::Eq))),
                (b'!', true) => Ok(Some(EvalOp::Cmp(Comparison::Ne))),
                _ => Err(scanner.error()),
            };
        }
        (1, b'+') => EvalOp::Add,
        (1, b'-') => EvalOp::Sub,
        (2, b'*') => EvalOp::Mul,
        (2, b'/') => EvalOp::Div,
        _ => return Ok(None),
    };
    scanner.next(false)?;
    Ok(Some(op))
}

fn band(
    scanner: &mut Scanner<'_>,
    level: u8,
    operand: fn(&mut Scanner<'_>) -> Result<Expr, EvalError>,
) -> Result<Expr, EvalError> {
    let first = operand(scanner)?;
    let mut items = vec![(EvalOp::Load, first)];
    while let Some(op) = binary_op(scanner, level)? {
        items.push((op, operand(scanner)?));
    }
    if items.len() == 1 {
        return Ok(items.remove(0).1);
    }
    Ok(Expr::Sequence(items))
}

fn comparison(scanner: &mut Scanner<'_>) -> Result<Expr, EvalError> {
    band(scanner, 0, sum)
}

fn sum(scanner: &mut Scanner<'_>) -> Result<Expr, EvalError> {
    band(scanner, 1, product)
}

fn product(scanner: &mut Scanner<'_>) -> Result<Expr, EvalError> {
    band(scanner, 2, primary)
}

fn primary(scanner: &mut Scanner<'_>) -> Result<Expr, EvalError> {
    match scanner.next(true)? {
        Some(Token::Literal(text)) => Ok(Expr::Literal(text)),
        Some(Token::Name(name)) => Ok(Expr::Variable(name)),
        Some(Token::Key(b'(')) => {
            let inner = comparison(scanner)?;
            match scanner.next(false)? {
                Some(Token::Key(b')')) => Ok(inner),
                _ => Err(scanner.error()),
            }
        }
        _ => Err(scanner.error()),
    }
}

// ═══════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════

pub fn run(expr: &Expr, bindings: &dyn Bindings) -> Vec<u8> {
    match expr {
        Expr::Literal(text) => text.clone(),
        Expr::Variable(name) => bindings
            .value_of(name)
            .unwrap_or_else(|| name.as_bytes().to_vec()),
        Expr::Sequence(items) => {
            let mut acc = Vec::new();
            let mut passed = false;
            for (op, item) in items {
                let value = run(item, bindings);
                match op {
                    EvalOp::Load => acc = value,
                    EvalOp::Add => acc = decimal::add(&acc, &value),
                    EvalOp::Sub => acc = decimal::sub(&acc, &value),
                    EvalOp::Mul => acc = decimal::mul(&acc, &value),
                    EvalOp::Div => acc = decimal::div(&acc, &value),
                    EvalOp::Cmp(cmp) => {
                        if !decimal::compare(&acc, &value, *cmp) {
                            return b"0".to_vec();
                        }
                        passed = true;
                        acc = value;
                        continue;
                    }
                }
                passed = false;
            }
            if passed { b"1".to_vec() } else { acc }
        }
    }
}

/// Compile and run in one go. A malformed expression logs and yields `"0"`.
pub fn evaluate(text: &[u8], bindings: &dyn Bindings) -> Vec<u8> {
    match compile(text) {
        Ok(expr) => run(&expr, bindings),
        Err(err) => {
            error!("expression error: {err} in '{}'", text.escape_ascii());
            b"0".to_vec()
        }
    }
}

#[inline]
pub fn is_true(result: &[u8]) -> bool {
    result.first() == Some(&b'1')
}

// ═══════════════════════════════════════════════════════════════════
// Serialization
// ═══════════════════════════════════════════════════════════════════

/// Write a compiled tree: a count (0 or 1), a type tag, then text or a
/// nested operator list.
pub fn dump_evaluate(w: &mut dyn Write, expr: Option<&Expr>) -> io::Result<()> {
    let Some(expr) = expr else {
        return write_i32(w, 0);
    };
    write_i32(w, 1)?;
    match expr {
        Expr::Literal(text) => {
            write_i32(w, EVT_NUMBER)?;
            write_bytes(w, text)
        }
        Expr::Variable(name) => {
            write_i32(w, EVT_VARIABLE)?;
            write_bytes(w, name.as_bytes())
        }
        Expr::Sequence(items) => {
            write_i32(w, EVT_SUBEVAL)?;
            write_i32(w, items.len() as i32)?;
            for (op, item) in items {
                write_i32(w, op.code())?;
                dump_evaluate(w, Some(item))?;
            }
            Ok(())
        }
    }
}

pub fn load_evaluate(r: &mut dyn Read) -> io::Result<Option<Expr>> {
    match read_i32(r)? {
        0 => return Ok(None),
        1 => {}
        _ => return Err(invalid_data("bad expression count")),
    }
    let expr = match read_i32(r)? {
        EVT_NUMBER => Expr::Literal(read_bytes(r)?),
        EVT_VARIABLE => Expr::Variable(String::from_utf8_lossy(&read_bytes(r)?).into_owned()),
        EVT_SUBEVAL => {
            let count = read_i32(r)?;
            let mut items = Vec::new();
            for _ in 0..count {
                let op = EvalOp::from_code(read_i32(r)?)
                    .ok_or_else(|| invalid_data("bad expression operator"))?;
                let item = load_evaluate(r)?.ok_or_else(|| invalid_data("missing operand"))?;
                items.push((op, item));
            }
            Expr::Sequence(items)
        }
        _ => return Err(invalid_data("bad expression type")),
    };
    Ok(Some(expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Vars(HashMap<&'static str, &'static str>);

    impl Bindings for Vars {
        fn value_of(&self, name: &str) -> Option<Vec<u8>> {
            self.0.get(name).map(|v| v.as_bytes().to_vec())
        }
    }

    fn eval(text: &str) -> String {
        let vars = Vars(HashMap::from([("x", "4"), ("name", "bob"), ("blank", "")]));
        String::from_utf8(evaluate(text.as_bytes(), &vars)).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), "7");
        assert_eq!(eval("(1 + 2) * 3"), "9");
        assert_eq!(eval("10 - 2 - 3"), "5");
        assert_eq!(eval("12 / 2 / 3"), "2");
    }

    #[test]
    fn test_negative_numbers() {
        assert_eq!(eval("-3 + 5"), "2");
        assert_eq!(eval("2 * -3"), "-6");
        assert_eq!(eval("5 - -1"), "6");
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("x * x"), "16");
        assert_eq!(eval("name == 'bob'"), "1");
        assert_eq!(eval("unknown"), "unknown");
        assert_eq!(eval("blank == ''"), "1");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("x > 3"), "1");
        assert_eq!(eval("x <= 3"), "0");
        assert_eq!(eval("x != 4"), "0");
        assert_eq!(eval("1 < 2 < 3"), "1");
        assert_eq!(eval("1 < 3 < 2"), "0");
        assert_eq!(eval("x + 1 == 5"), "1");
    }

    #[test]
    fn test_build_errors_yield_zero() {
        assert_eq!(eval("1 2"), "0");
        assert_eq!(eval("* 2"), "0");
        assert_eq!(eval("(1 + 2"), "0");
        assert_eq!(eval("1 = 1"), "0");
        assert_eq!(eval("!1"), "0");
        assert_eq!(eval(""), "0");
    }

    #[test]
    fn test_truthiness() {
        assert!(is_true(b"1"));
        assert!(is_true(b"10"));
        assert!(!is_true(b"0"));
        assert!(!is_true(b""));
    }

    #[test]
    fn test_dump_and_load_tree() {
        let expr = compile(b"(a + 1) * 2 >= 'z'").unwrap();
        let mut buf = Vec::new();
        dump_evaluate(&mut buf, Some(&expr)).unwrap();
        let loaded = load_evaluate(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded, Some(expr));
    }

    #[test]
    fn test_load_rejects_bad_operator() {
        let mut buf = Vec::new();
        for v in [1, EVT_SUBEVAL, 1, 0x41] {
            buf.extend_from_slice(&(v as i32).to_le_bytes());
        }
        assert!(load_evaluate(&mut buf.as_slice()).is_err());
    }
}
