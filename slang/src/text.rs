/// String helpers behind `x[key]`, foreach splitting and `[template]`.
use std::ops::Range;

use crate::{
    decimal::atoi,
    eval::Bindings,
    lexer::{char_at, is_space, is_special},
};

/// Substring selected by a key of the form `N` or `N~M`.
///
/// `0` is the last byte, positive `N` counts from 1 and negative `N`
/// counts back from the end. A range whose end precedes its start
/// selects nothing; the end is clamped to the last byte.
pub fn substring<'a>(s: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    let size = s.len() as i64;
    if size == 0 {
        return None;
    }
    let (first, rest) = index_token(key)?;
    let start = normalize(first, size);
    let end = match rest.strip_prefix(b"~") {
        Some(rest) => match index_token(rest) {
            Some((last, _)) => normalize(last, size),
            None => start,
        },
        None => start,
    };
    if end < start || start >= size {
        return None;
    }
    let end = end.min(size - 1);
    Some(&s[start as usize..=end as usize])
}

fn index_token(key: &[u8]) -> Option<(i64, &[u8])> {
    let key = key.trim_ascii_start();
    let first = *key.first()?;
    if first != b'-' && (is_special(first) || is_space(first)) {
        return None;
    }
    let len = key
        .iter()
        .enumerate()
        .position(|(i, &b)| b == b'~' || is_space(b) || (i > 0 && b == b'-'))
        .unwrap_or(key.len());
    Some((atoi(&key[..len]), key[len..].trim_ascii_start()))
}

fn normalize(n: i64, size: i64) -> i64 {
    let n = n % (size + 1);
    if n < 0 {
        n + size
    } else if n == 0 {
        size - 1
    } else {
        n - 1
    }
}

/// Replace the byte at `atoi(key) - 1` with `value`, or append when the
/// index is past the end. Negative indexes leave the string unchanged.
pub fn set_byte(s: &[u8], key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    let index = atoi(key) - 1;
    if index < 0 {
        return None;
    }
    let index = index as usize;
    let mut out = Vec::with_capacity(s.len() + value.len());
    if index < s.len() {
        out.extend_from_slice(&s[..index]);
        out.extend_from_slice(value);
        out.extend_from_slice(&s[index + 1..]);
    } else {
        out.extend_from_slice(s);
        out.extend_from_slice(value);
    }
    Some(out)
}

// ═══════════════════════════════════════════════════════════════════
// Foreach splitting
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimiter {
    Whitespace,
    Char(Vec<u8>),
    Substring(Vec<u8>),
    Width(usize),
}

impl Delimiter {
    pub fn parse(delim: &[u8]) -> Self {
        let trimmed = delim.trim_ascii_start();
        let Some(&first) = trimmed.first() else {
            return Delimiter::Width(1);
        };
        match first {
            b'*' => Delimiter::Whitespace,
            b'-' => Delimiter::Char(b"\n".to_vec()),
            b'0'..=b'9' => Delimiter::Width(atoi(trimmed).max(1) as usize),
            _ if delim.len() > 1 => Delimiter::Substring(delim.to_vec()),
            _ => Delimiter::Char(char_at(trimmed, 0).to_vec()),
        }
    }

    /// Step for table iteration: every Nth entry.
    pub fn step(&self) -> usize {
        match self {
            Delimiter::Width(n) => *n,
            _ => 1,
        }
    }
}

/// One item of a split: the iterator value and the item's byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub iter: usize,
    pub range: Range<usize>,
}

pub fn split(s: &[u8], delim: &Delimiter) -> Vec<Piece> {
    match delim {
        Delimiter::Whitespace => split_words(s),
        Delimiter::Char(c) | Delimiter::Substring(c) => split_on(s, c),
        Delimiter::Width(n) => chunk(s, *n),
    }
}

fn split_words(s: &[u8]) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut pos = 0;
    loop {
        while pos < s.len() && is_space(s[pos]) {
            pos += 1;
        }
        if pos >= s.len() {
            return pieces;
        }
        let start = pos;
        while pos < s.len() && !is_space(s[pos]) {
            pos += 1;
        }
        pieces.push(Piece {
            iter: pieces.len() + 1,
            range: start..pos,
        });
    }
}

/// Empty items between two delimiters are kept, a trailing one is not.
fn split_on(s: &[u8], delim: &[u8]) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let end = s[start..]
            .windows(delim.len())
            .position(|w| w == delim)
            .map(|i| start + i);
        let (range, next) = match end {
            Some(end) => (start..end, end + delim.len()),
            None => (start..s.len(), s.len()),
        };
        pieces.push(Piece {
            iter: pieces.len() + 1,
            range,
        });
        start = next;
    }
    pieces
}

/// `n` code points per item; the iterator is the byte offset after it.
fn chunk(s: &[u8], n: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut pos = 0;
    while pos < s.len() {
        let start = pos;
        for _ in 0..n {
            if pos >= s.len() {
                break;
            }
            pos += char_at(s, pos).len();
        }
        pieces.push(Piece {
            iter: pos,
            range: start..pos,
        });
    }
    pieces
}

// ═══════════════════════════════════════════════════════════════════
// Templates
// ═══════════════════════════════════════════════════════════════════

/// Expand `{name}` with the string value of `name`. Unknown names and
/// an unclosed `{` are copied through unchanged.
pub fn format_template(template: &[u8], bindings: &dyn Bindings) -> Vec<u8> {
    let mut out = Vec::with_capacity(template.len());
    let mut pos = 0;
    while pos < template.len() {
        let b = template[pos];
        let close = match b {
            b'{' => template[pos + 1..].iter().position(|&c| c == b'}'),
            _ => None,
        };
        let value = close.and_then(|len| {
            let name = std::str::from_utf8(&template[pos + 1..pos + 1 + len]).ok()?;
            bindings.value_of(name).map(|v| (v, len))
        });
        match value {
            Some((value, len)) => {
                out.extend_from_slice(&value);
                pos += len + 2;
            }
            None => {
                out.push(b);
                pos += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sub(s: &str, key: &str) -> Option<String> {
        substring(s.as_bytes(), key.as_bytes()).map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    fn items(s: &str, delim: &str) -> Vec<(usize, String)> {
        let d = Delimiter::parse(delim.as_bytes());
        split(s.as_bytes(), &d)
            .into_iter()
            .map(|p| (p.iter, String::from_utf8(s.as_bytes()[p.range].to_vec()).unwrap()))
            .collect()
    }

    #[test]
    fn test_substring_index_policy() {
        assert_eq!(sub("hello", "0").as_deref(), Some("o"));
        assert_eq!(sub("hello", "-1").as_deref(), Some("o"));
        assert_eq!(sub("hello", "1").as_deref(), Some("h"));
        assert_eq!(sub("hello", "2~4").as_deref(), Some("ell"));
        assert_eq!(sub("hello", "4~2"), None);
        assert_eq!(sub("hello", "3~0").as_deref(), Some("llo"));
        assert_eq!(sub("hello", "*"), None);
        assert_eq!(sub("", "1"), None);
    }

    #[test]
    fn test_set_byte() {
        assert_eq!(set_byte(b"abc", b"2", b"XY").unwrap(), b"aXYc");
        assert_eq!(set_byte(b"abc", b"9", b"d").unwrap(), b"abcd");
        assert_eq!(set_byte(b"abc", b"0", b"d"), None);
    }

    #[test]
    fn test_whitespace_split() {
        assert_eq!(
            items("a b  c", "*"),
            vec![(1, "a".into()), (2, "b".into()), (3, "c".into())]
        );
    }

    #[test]
    fn test_char_split_keeps_inner_empty() {
        assert_eq!(
            items("a,,b,", ","),
            vec![(1, "a".into()), (2, "".into()), (3, "b".into())]
        );
    }

    #[test]
    fn test_newline_split() {
        assert_eq!(items("x\ny", "-"), vec![(1, "x".into()), (2, "y".into())]);
    }

    #[test]
    fn test_substring_split() {
        assert_eq!(
            items("a::b::c", "::"),
            vec![(1, "a".into()), (2, "b".into()), (3, "c".into())]
        );
    }

    #[test]
    fn test_width_chunks() {
        assert_eq!(
            items("abcde", "2"),
            vec![(2, "ab".into()), (4, "cd".into()), (5, "e".into())]
        );
        assert_eq!(items("日本", "0"), vec![(3, "日".into()), (6, "本".into())]);
    }

    #[test]
    fn test_delimiter_step() {
        assert_eq!(Delimiter::parse(b"2").step(), 2);
        assert_eq!(Delimiter::parse(b"*").step(), 1);
        assert_eq!(Delimiter::parse(b"-3"), Delimiter::Char(b"\n".to_vec()));
    }

    struct Vars(HashMap<&'static str, &'static str>);

    impl Bindings for Vars {
        fn value_of(&self, name: &str) -> Option<Vec<u8>> {
            self.0.get(name).map(|v| v.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_format_template() {
        let vars = Vars(HashMap::from([("name", "bob"), ("n", "3"), ("empty", "")]));
        let out = format_template(b"{name} has {n} {apples} {empty}|{", &vars);
        assert_eq!(out, b"bob has 3 {apples} |{");
    }
}
