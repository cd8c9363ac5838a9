/// Clause scanner for `.sl` source.
///
/// The lexer works on a complete byte buffer and hands out one [`Clause`]
/// at a time. Variables are resolved to frame slots while scanning, so the
/// caller supplies the enclosing parameter [`Scope`] on every call.
use crate::error::SyntaxErrorKind;

// ═══════════════════════════════════════════════════════════════════
// Keyword table
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    NodeBegin,
    NodeDef,
    Count,
    If,
    Else,
    While,
    ParenLeft,
    ParenRight,
    AngleLeft,
    AngleRight,
    BracketLeft,
    BracketRight,
    BraceLeft,
    BraceRight,
    Comma,
    Semicolon,
    Equal,
    Asterisk,
    EqualEqual,
    NotEqual,
    LessEqual,
    GreaterEqual,
    QuoteBegin,
    QuoteEnd,
    Escape,
    CommentBegin,
    CommentEnd,
    Space,
}

/// Ordered keyword table. `.` and `"` appear twice: which entry wins
/// depends on the scan direction.
const KEYWORDS: &[(Keyword, &[u8])] = &[
    (Keyword::NodeBegin, b"."),
    (Keyword::NodeDef, b"."),
    (Keyword::Count, b"#"),
    (Keyword::If, b"?"),
    (Keyword::Else, b"~"),
    (Keyword::While, b"@"),
    (Keyword::ParenLeft, b"("),
    (Keyword::ParenRight, b")"),
    (Keyword::AngleLeft, b"<"),
    (Keyword::AngleRight, b">"),
    (Keyword::BracketLeft, b"["),
    (Keyword::BracketRight, b"]"),
    (Keyword::BraceLeft, b"{"),
    (Keyword::BraceRight, b"}"),
    (Keyword::Comma, b","),
    (Keyword::Semicolon, b";"),
    (Keyword::Equal, b"="),
    (Keyword::Asterisk, b"*"),
    (Keyword::EqualEqual, b"=="),
    (Keyword::NotEqual, b"!="),
    (Keyword::LessEqual, b"<="),
    (Keyword::GreaterEqual, b">="),
    (Keyword::QuoteBegin, b"\""),
    (Keyword::QuoteEnd, b"\""),
    (Keyword::Escape, b"\\"),
    (Keyword::CommentBegin, b"/*"),
    (Keyword::CommentEnd, b"*/"),
    (Keyword::Space, b" "),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Ascending,
    Descending,
}

/// Longest keyword starting at `pos`. Ties go to the first entry met in
/// the scan direction.
pub fn match_keyword(src: &[u8], pos: usize, scan: Scan) -> Option<(Keyword, usize)> {
    let rest = src.get(pos..)?;
    let mut best: Option<(Keyword, usize)> = None;
    let mut consider = |&(kw, text): &(Keyword, &[u8])| {
        if rest.starts_with(text) && best.is_none_or(|(_, len)| text.len() > len) {
            best = Some((kw, text.len()));
        }
    };
    match scan {
        Scan::Ascending => KEYWORDS.iter().for_each(&mut consider),
        Scan::Descending => KEYWORDS.iter().rev().for_each(&mut consider),
    }
    best
}

// ═══════════════════════════════════════════════════════════════════
// Character classes
// ═══════════════════════════════════════════════════════════════════

#[inline]
pub fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[inline]
pub fn is_special(b: u8) -> bool {
    matches!(
        b,
        b'.' | b'#'
            | b'?'
            | b'~'
            | b'@'
            | b'('
            | b')'
            | b'<'
            | b'>'
            | b'['
            | b']'
            | b'{'
            | b'}'
            | b','
            | b':'
            | b';'
            | b'='
            | b'*'
            | b'!'
            | b'\''
            | b'/'
            | b'\\'
            | b'`'
            | b'%'
            | b'&'
            | b'^'
            | b'-'
            | b'+'
            | b'|'
            | b'"'
    )
}

#[inline]
pub fn is_name_byte(b: u8) -> bool {
    !is_space(b) && !is_special(b)
}

/// Length of a code point from its lead byte. Continuation bytes are not
/// checked; a stray one counts as a single byte.
#[inline]
pub fn char_len(lead: u8) -> usize {
    match lead {
        0x00..=0xBF => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        0xF8..=0xFB => 5,
        0xFC..=0xFD => 6,
        _ => 1,
    }
}

/// The code point at `pos`, clamped to the end of the buffer.
#[inline]
pub fn char_at(src: &[u8], pos: usize) -> &[u8] {
    let end = (pos + char_len(src[pos])).min(src.len());
    &src[pos..end]
}

// ═══════════════════════════════════════════════════════════════════
// Clauses
// ═══════════════════════════════════════════════════════════════════

/// Name to slot resolution for variable clauses.
pub trait Scope {
    fn slot_of(&self, name: &str) -> Option<usize>;
}

impl Scope for () {
    fn slot_of(&self, _name: &str) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseKind {
    Key(Keyword),
    Variable(usize),
    Const(Vec<u8>),
    Node(String),
    EndOfFile,
    Error(SyntaxErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub kind: ClauseKind,
    /// Byte offset where the clause begins.
    pub start: usize,
}

pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src [u8]) -> Self {
        let pos = if src.starts_with(b"\xEF\xBB\xBF") { 3 } else { 0 };
        Self { src, pos }
    }

    #[inline]
    pub fn source(&self) -> &'src [u8] {
        self.src
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn reset(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Skip whitespace and `/* */` comments.
    pub fn skip_blank(&mut self) {
        loop {
            while !self.at_end() && is_space(self.src[self.pos]) {
                self.pos += 1;
            }
            if self.src[self.pos.min(self.src.len())..].starts_with(b"/*") {
                let body = self.pos + 2;
                self.pos = self.src[body..]
                    .windows(2)
                    .position(|w| w == b"*/")
                    .map_or(self.src.len(), |i| body + i + 2);
                continue;
            }
            break;
        }
    }

    /// Consume a keyword after skipping blanks.
    pub fn shift_keyword(&mut self, scan: Scan) -> Option<Keyword> {
        self.skip_blank();
        let (kw, len) = match_keyword(self.src, self.pos, scan)?;
        self.pos += len;
        Some(kw)
    }

    /// Consume a bare name after skipping blanks.
    pub fn shift_name(&mut self) -> Option<String> {
        self.skip_blank();
        let start = self.pos;
        while !self.at_end() && is_name_byte(self.src[self.pos]) {
            self.pos += char_at(self.src, self.pos).len();
        }
        if self.pos == start {
            return None;
        }
        Some(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    pub fn next_clause(&mut self, scope: &dyn Scope) -> Clause {
        self.skip_blank();
        let start = self.pos;
        let kind = self.scan_clause(scope, start);
        Clause { kind, start }
    }

    fn scan_clause(&mut self, scope: &dyn Scope, start: usize) -> ClauseKind {
        if self.at_end() {
            return ClauseKind::EndOfFile;
        }
        match match_keyword(self.src, start, Scan::Ascending) {
            Some((Keyword::NodeBegin, len)) => {
                self.pos += len;
                self.scan_node_name()
            }
            Some((Keyword::QuoteBegin, len)) => {
                self.pos += len;
                self.scan_string()
            }
            Some((kw, len)) => {
                self.pos += len;
                ClauseKind::Key(kw)
            }
            None => match self.shift_name() {
                Some(name) => match scope.slot_of(&name) {
                    Some(slot) => ClauseKind::Variable(slot),
                    None => ClauseKind::Error(SyntaxErrorKind::VariableName),
                },
                None => {
                    self.pos += char_at(self.src, start).len();
                    ClauseKind::Error(SyntaxErrorKind::Word)
                }
            },
        }
    }

    fn scan_node_name(&mut self) -> ClauseKind {
        let Some(first) = self.shift_name() else {
            return ClauseKind::Error(SyntaxErrorKind::NodeName);
        };
        let mut text = format!(".{first}");
        while self.src.get(self.pos) == Some(&b'.')
            && self.src.get(self.pos + 1).is_some_and(|&b| is_name_byte(b))
        {
            self.pos += 1;
            if let Some(segment) = self.shift_name() {
                text.push('.');
                text.push_str(&segment);
            }
        }
        ClauseKind::Node(text)
    }

    fn scan_string(&mut self) -> ClauseKind {
        let mut text = Vec::new();
        loop {
            if self.at_end() {
                return ClauseKind::Error(SyntaxErrorKind::UnclosedString);
            }
            match match_keyword(self.src, self.pos, Scan::Descending) {
                Some((Keyword::QuoteEnd, len)) => {
                    self.pos += len;
                    return ClauseKind::Const(text);
                }
                Some((Keyword::Escape, len)) => {
                    self.pos += len;
                    if self.at_end() {
                        return ClauseKind::Error(SyntaxErrorKind::UnclosedString);
                    }
                }
                _ => {}
            }
            let ch = char_at(self.src, self.pos);
            text.extend_from_slice(ch);
            self.pos += ch.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Names(HashMap<&'static str, usize>);

    impl Scope for Names {
        fn slot_of(&self, name: &str) -> Option<usize> {
            self.0.get(name).copied()
        }
    }

    fn kinds(src: &str) -> Vec<ClauseKind> {
        let scope = Names(HashMap::from([("a", 0), ("b", 1)]));
        let mut lexer = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let clause = lexer.next_clause(&scope);
            let done = matches!(clause.kind, ClauseKind::EndOfFile | ClauseKind::Error(_));
            out.push(clause.kind);
            if done {
                return out;
            }
        }
    }

    #[test]
    fn test_longest_match() {
        assert_eq!(
            match_keyword(b"<=x", 0, Scan::Ascending),
            Some((Keyword::LessEqual, 2))
        );
        assert_eq!(
            match_keyword(b"=x", 0, Scan::Ascending),
            Some((Keyword::Equal, 1))
        );
        assert_eq!(match_keyword(b"abc", 0, Scan::Ascending), None);
    }

    #[test]
    fn test_scan_direction_ties() {
        assert_eq!(
            match_keyword(b".", 0, Scan::Ascending),
            Some((Keyword::NodeBegin, 1))
        );
        assert_eq!(
            match_keyword(b".", 0, Scan::Descending),
            Some((Keyword::NodeDef, 1))
        );
        assert_eq!(
            match_keyword(b"\"", 0, Scan::Ascending),
            Some((Keyword::QuoteBegin, 1))
        );
        assert_eq!(
            match_keyword(b"\"", 0, Scan::Descending),
            Some((Keyword::QuoteEnd, 1))
        );
    }

    #[test]
    fn test_assignment_clauses() {
        assert_eq!(
            kinds("a = \"1\";"),
            vec![
                ClauseKind::Variable(0),
                ClauseKind::Key(Keyword::Equal),
                ClauseKind::Const(b"1".to_vec()),
                ClauseKind::Key(Keyword::Semicolon),
                ClauseKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_node_clause_joins_segments() {
        assert_eq!(
            kinds(">.util.fmt.pad;"),
            vec![
                ClauseKind::Key(Keyword::AngleRight),
                ClauseKind::Node(".util.fmt.pad".into()),
                ClauseKind::Key(Keyword::Semicolon),
                ClauseKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_string_escape() {
        match &kinds(r#""say \"hi\"""#)[0] {
            ClauseKind::Const(text) => assert_eq!(text, br#"say "hi""#),
            other => panic!("Expected const, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_bom() {
        assert_eq!(
            kinds("\u{feff}/* note */ b /* x */ }"),
            vec![
                ClauseKind::Variable(1),
                ClauseKind::Key(Keyword::BraceRight),
                ClauseKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_unknown_variable() {
        assert_eq!(
            kinds("zz"),
            vec![ClauseKind::Error(SyntaxErrorKind::VariableName)]
        );
    }

    #[test]
    fn test_illegal_character() {
        assert_eq!(kinds("%"), vec![ClauseKind::Error(SyntaxErrorKind::Word)]);
    }

    #[test]
    fn test_unclosed_string_reports_opening_quote() {
        let mut lexer = Lexer::new(b"a=\"oops");
        let scope = Names(HashMap::from([("a", 0)]));
        lexer.next_clause(&scope);
        lexer.next_clause(&scope);
        let clause = lexer.next_clause(&scope);
        assert_eq!(clause.start, 2);
        assert_eq!(
            clause.kind,
            ClauseKind::Error(SyntaxErrorKind::UnclosedString)
        );
    }

    #[test]
    fn test_multibyte_names() {
        let mut lexer = Lexer::new("名前=".as_bytes());
        assert_eq!(lexer.shift_name().as_deref(), Some("名前"));
        assert_eq!(lexer.shift_keyword(Scan::Ascending), Some(Keyword::Equal));
    }
}
