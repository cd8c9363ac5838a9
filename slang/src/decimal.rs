/// Decimal arithmetic on ASCII number strings.
///
/// Numbers are held as little-endian base-10 digit arrays with a scale
/// (count of fractional digits) and a sign, so results are exact for any
/// length. Division is the exception: it truncates to machine integers.
use std::cmp::Ordering;

use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    scale: usize,
}

impl Decimal {
    fn parse(text: &[u8]) -> Option<Self> {
        let text = text.trim_ascii();
        let (negative, body) = match text.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, text),
        };
        let (int, frac) = match body.iter().position(|&b| b == b'.') {
            Some(dot) => (&body[..dot], &body[dot + 1..]),
            None => (body, &[][..]),
        };
        if int.is_empty()
            || !int.iter().all(u8::is_ascii_digit)
            || !frac.iter().all(u8::is_ascii_digit)
        {
            return None;
        }
        let digits = frac
            .iter()
            .rev()
            .chain(int.iter().rev())
            .map(|b| b - b'0')
            .collect();
        Some(
            Self {
                negative,
                digits,
                scale: frac.len(),
            }
            .normalized(),
        )
    }

    fn normalized(mut self) -> Self {
        let zeros = self.digits[..self.scale]
            .iter()
            .take_while(|&&d| d == 0)
            .count();
        self.digits.drain(..zeros);
        self.scale -= zeros;
        while self.digits.len() > self.scale + 1 && self.digits.last() == Some(&0) {
            self.digits.pop();
        }
        while self.digits.len() < self.scale + 1 {
            self.digits.push(0);
        }
        if self.is_zero() {
            self.negative = false;
        }
        self
    }

    fn is_zero(&self) -> bool {
        self.digits.iter().all(|&d| d == 0)
    }

    fn negated(mut self) -> Self {
        self.negative = !self.negative && !self.is_zero();
        self
    }

    fn rescaled(&self, scale: usize) -> Vec<u8> {
        let mut out = vec![0; scale - self.scale];
        out.extend_from_slice(&self.digits);
        out
    }

    fn add(&self, other: &Self) -> Self {
        let scale = self.scale.max(other.scale);
        let a = self.rescaled(scale);
        let b = other.rescaled(scale);
        let (digits, negative) = if self.negative == other.negative {
            (add_mag(&a, &b), self.negative)
        } else {
            match cmp_mag(&a, &b) {
                Ordering::Less => (sub_mag(&b, &a), other.negative),
                _ => (sub_mag(&a, &b), self.negative),
            }
        };
        Self {
            negative,
            digits,
            scale,
        }
        .normalized()
    }

    fn mul(&self, other: &Self) -> Self {
        Self {
            negative: self.negative != other.negative,
            digits: mul_mag(&self.digits, &other.digits),
            scale: self.scale + other.scale,
        }
        .normalized()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digits.len() + 2);
        if self.negative {
            out.push(b'-');
        }
        for i in (0..self.digits.len()).rev() {
            if i + 1 == self.scale {
                out.push(b'.');
            }
            out.push(b'0' + self.digits[i]);
        }
        out
    }
}

// ═══════════════════════════════════════════════════════════════════
// Magnitude helpers (little-endian digits)
// ═══════════════════════════════════════════════════════════════════

fn significant(d: &[u8]) -> &[u8] {
    let len = d.iter().rposition(|&x| x != 0).map_or(0, |i| i + 1);
    &d[..len]
}

fn cmp_mag(a: &[u8], b: &[u8]) -> Ordering {
    let a = significant(a);
    let b = significant(b);
    if a.len() != b.len() {
        return a.len().cmp(&b.len());
    }
    for i in (0..a.len()).rev() {
        if a[i] != b[i] {
            return a[i].cmp(&b[i]);
        }
    }
    Ordering::Equal
}

fn add_mag(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    let mut out = Vec::with_capacity(len + 1);
    let mut carry = 0;
    for i in 0..len {
        let sum = a.get(i).copied().unwrap_or(0) + b.get(i).copied().unwrap_or(0) + carry;
        out.push(sum % 10);
        carry = sum / 10;
    }
    out.push(carry);
    out
}

/// `a - b` where `|a| >= |b|`.
fn sub_mag(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len());
    let mut borrow = 0;
    for i in 0..a.len() {
        let sub = b.get(i).copied().unwrap_or(0) + borrow;
        if a[i] >= sub {
            out.push(a[i] - sub);
            borrow = 0;
        } else {
            out.push(a[i] + 10 - sub);
            borrow = 1;
        }
    }
    out
}

fn mul_mag(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut acc = vec![0u32; a.len() + b.len()];
    for (i, &av) in a.iter().enumerate() {
        let mut carry = 0u32;
        for (j, &bv) in b.iter().enumerate() {
            let cell = acc[i + j] + av as u32 * bv as u32 + carry;
            acc[i + j] = cell % 10;
            carry = cell / 10;
        }
        let mut k = i + b.len();
        while carry != 0 && k < acc.len() {
            let cell = acc[k] + carry;
            acc[k] = cell % 10;
            carry = cell / 10;
            k += 1;
        }
    }
    acc.into_iter().map(|d| d as u8).collect()
}

// ═══════════════════════════════════════════════════════════════════
// String-level operations
// ═══════════════════════════════════════════════════════════════════

pub fn is_number(text: &[u8]) -> bool {
    Decimal::parse(text).is_some()
}

/// A non-numeric operand yields the other operand unchanged.
pub fn add(a: &[u8], b: &[u8]) -> Vec<u8> {
    match (Decimal::parse(a), Decimal::parse(b)) {
        (Some(x), Some(y)) => x.add(&y).to_bytes(),
        (None, _) => b.to_vec(),
        (_, None) => a.to_vec(),
    }
}

pub fn sub(a: &[u8], b: &[u8]) -> Vec<u8> {
    match (Decimal::parse(a), Decimal::parse(b)) {
        (Some(x), Some(y)) => x.add(&y.negated()).to_bytes(),
        (None, Some(y)) => y.negated().to_bytes(),
        (_, None) => a.to_vec(),
    }
}

pub fn mul(a: &[u8], b: &[u8]) -> Vec<u8> {
    match (Decimal::parse(a), Decimal::parse(b)) {
        (Some(x), Some(y)) => x.mul(&y).to_bytes(),
        _ => b"0".to_vec(),
    }
}

/// Integer division of the truncated operands.
pub fn div(a: &[u8], b: &[u8]) -> Vec<u8> {
    let divisor = atoi(b);
    if divisor == 0 {
        error!("div 0 error");
        return b"0".to_vec();
    }
    atoi(a)
        .checked_div(divisor)
        .unwrap_or(0)
        .to_string()
        .into_bytes()
}

/// `==` needs both a zero difference and identical text.
pub fn compare(a: &[u8], b: &[u8], op: Comparison) -> bool {
    let (Some(x), Some(y)) = (Decimal::parse(a), Decimal::parse(b)) else {
        return match op {
            Comparison::Eq => a == b,
            Comparison::Ne => a != b,
            Comparison::Lt => a < b,
            Comparison::Gt => a > b,
            Comparison::Le => a <= b,
            Comparison::Ge => a >= b,
        };
    };
    let diff = x.add(&y.negated());
    let zero = diff.is_zero();
    match op {
        Comparison::Lt => !zero && diff.negative,
        Comparison::Gt => !zero && !diff.negative,
        Comparison::Le => zero || diff.negative,
        Comparison::Ge => zero || !diff.negative,
        Comparison::Eq => zero && a == b,
        Comparison::Ne => !zero || a != b,
    }
}

/// C-style `atoi`: leading blanks, optional sign, then digits up to the
/// first non-digit. Saturates instead of overflowing.
pub fn atoi(text: &[u8]) -> i64 {
    let text = text.trim_ascii_start();
    let (negative, digits) = match text.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, text),
    };
    let n = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |n, b| n.saturating_mul(10).saturating_add((b - b'0') as i64));
    if negative { -n } else { n }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: Vec<u8>) -> String {
        String::from_utf8(v).unwrap()
    }

    #[test]
    fn test_add_exact() {
        assert_eq!(s(add(b"1.005", b"2.005")), "3.01");
        assert_eq!(s(add(b"0.1", b"0.2")), "0.3");
        assert_eq!(
            s(add(b"99999999999999999999", b"1")),
            "100000000000000000000"
        );
    }

    #[test]
    fn test_add_mixed_signs() {
        assert_eq!(s(add(b"-5", b"3")), "-2");
        assert_eq!(s(add(b"5", b"-3.5")), "1.5");
        assert_eq!(s(add(b"-0.0", b"0")), "0");
    }

    #[test]
    fn test_sub() {
        assert_eq!(s(sub(b"1", b"3")), "-2");
        assert_eq!(s(sub(b"10.25", b"0.25")), "10");
        assert_eq!(s(sub(b"abc", b"2")), "-2");
    }

    #[test]
    fn test_mul_exact() {
        assert_eq!(s(mul(b"0.1", b"0.2")), "0.02");
        assert_eq!(s(mul(b"-12", b"12")), "-144");
        assert_eq!(s(mul(b"x", b"12")), "0");
    }

    #[test]
    fn test_div_truncates() {
        assert_eq!(s(div(b"7", b"2")), "3");
        assert_eq!(s(div(b"-7", b"2")), "-3");
        assert_eq!(s(div(b"7.9", b"2.9")), "3");
        assert_eq!(s(div(b"1", b"0")), "0");
    }

    #[test]
    fn test_non_numeric_add_returns_other() {
        assert_eq!(s(add(b"abc", b"2")), "2");
        assert_eq!(s(add(b"2", b"abc")), "2");
    }

    #[test]
    fn test_equality_requires_identical_text() {
        assert!(compare(b"3", b"3", Comparison::Eq));
        assert!(!compare(b"3", b"3.0", Comparison::Eq));
        assert!(compare(b"3", b"3.0", Comparison::Ne));
        assert!(compare(b"3", b"3.0", Comparison::Le));
        assert!(compare(b"3", b"3.0", Comparison::Ge));
    }

    #[test]
    fn test_ordering() {
        assert!(compare(b"2", b"10", Comparison::Lt));
        assert!(compare(b"-1", b"-2", Comparison::Gt));
        assert!(!compare(b"1.5", b"1.5", Comparison::Lt));
        assert!(compare(b"abc", b"abd", Comparison::Lt));
    }

    #[test]
    fn test_atoi() {
        assert_eq!(atoi(b"  42xyz"), 42);
        assert_eq!(atoi(b"-7"), -7);
        assert_eq!(atoi(b"abc"), 0);
        assert_eq!(atoi(b""), 0);
    }

    #[test]
    fn test_is_number() {
        assert!(is_number(b"12.50"));
        assert!(is_number(b"-3"));
        assert!(!is_number(b"1.2.3"));
        assert!(!is_number(b".5"));
        assert!(!is_number(b"-"));
    }
}
