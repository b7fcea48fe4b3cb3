//! Runtime strings
//!
//! [`RtString`] is an immutable byte string with value semantics. Short
//! strings live inline, longer ones share a reference-counted buffer and
//! literals borrow their process-lifetime bytes without copying.
//!
//! The `rt_*` functions are total: indices and counts outside the string
//! saturate to its bounds. Indices count bytes. Only [`rt_chr`] can trap.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::ffi::CStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use super::trap::trap;

/// Longest string stored without a heap allocation.
pub const INLINE_CAPACITY: usize = 22;

#[derive(Clone)]
enum Repr {
    Inline { len: u8, buf: [u8; INLINE_CAPACITY] },
    Heap(Arc<[u8]>),
    Static(&'static [u8]),
}

/// Immutable runtime string.
#[derive(Clone)]
pub struct RtString(Repr);

impl RtString {
    /// The shared empty string.
    pub const EMPTY: RtString = RtString(Repr::Static(b""));

    /// Borrow process-lifetime bytes as they are, NULs included.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        RtString(Repr::Static(bytes))
    }

    fn from_slice(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            Self::EMPTY
        } else if bytes.len() <= INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..bytes.len()].copy_from_slice(bytes);
            RtString(Repr::Inline {
                len: bytes.len() as u8,
                buf,
            })
        } else {
            RtString(Repr::Heap(Arc::from(bytes)))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Repr::Inline { len, buf } => &buf[..*len as usize],
            Repr::Heap(bytes) => bytes,
            Repr::Static(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes the current representation can hold; never below `len()`.
    pub fn capacity(&self) -> usize {
        match &self.0 {
            Repr::Inline { .. } => INLINE_CAPACITY,
            _ => self.len(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.0, Repr::Inline { .. })
    }

    /// True when the bytes are borrowed static storage.
    pub fn is_static(&self) -> bool {
        matches!(self.0, Repr::Static(_))
    }

    /// Bytes `[start, end)`, sharing storage where possible.
    ///
    /// Callers pass in-bounds, ordered indices.
    fn slice(&self, start: usize, end: usize) -> Self {
        if start == 0 && end == self.len() {
            return self.clone();
        }
        if start >= end {
            return Self::EMPTY;
        }
        match &self.0 {
            Repr::Static(bytes) => RtString(Repr::Static(&bytes[start..end])),
            _ => Self::from_slice(&self.as_bytes()[start..end]),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Default for RtString {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Deref for RtString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for RtString {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Borrow<[u8]> for RtString {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for RtString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RtString {}

impl PartialOrd for RtString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RtString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for RtString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl fmt::Debug for RtString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RtString(\"{}\")", self.as_bytes().escape_ascii())
    }
}

impl fmt::Display for RtString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&str> for RtString {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl From<&[u8]> for RtString {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl From<Vec<u8>> for RtString {
    fn from(bytes: Vec<u8>) -> Self {
        if bytes.len() <= INLINE_CAPACITY {
            Self::from_slice(&bytes)
        } else {
            RtString(Repr::Heap(Arc::from(bytes)))
        }
    }
}

impl From<String> for RtString {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

/// Process-lifetime byte sources accepted by [`rt_const_cstr`].
pub trait StaticBytes {
    fn static_bytes(self) -> &'static [u8];
}

impl StaticBytes for &'static str {
    fn static_bytes(self) -> &'static [u8] {
        self.as_bytes()
    }
}

impl StaticBytes for &'static [u8] {
    fn static_bytes(self) -> &'static [u8] {
        self
    }
}

impl<const N: usize> StaticBytes for &'static [u8; N] {
    fn static_bytes(self) -> &'static [u8] {
        self
    }
}

impl StaticBytes for &'static CStr {
    fn static_bytes(self) -> &'static [u8] {
        self.to_bytes()
    }
}

/// Clamp a signed index into `0..=len`.
fn clamp(index: i64, len: usize) -> usize {
    if index <= 0 {
        0
    } else {
        (index as u64).min(len as u64) as usize
    }
}

/// A string viewing a literal. Length stops at the first NUL. No allocation.
pub fn rt_const_cstr<T: StaticBytes>(literal: T) -> RtString {
    let bytes = literal.static_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    RtString::from_static(&bytes[..end])
}

pub fn rt_str_empty() -> RtString {
    RtString::EMPTY
}

pub fn rt_len(s: &RtString) -> i64 {
    s.len() as i64
}

pub fn rt_str_eq(a: &RtString, b: &RtString) -> bool {
    a == b
}

pub fn rt_concat(a: &RtString, b: &RtString) -> RtString {
    if b.is_empty() {
        return a.clone();
    }
    if a.is_empty() {
        return b.clone();
    }
    let mut bytes = Vec::with_capacity(a.len() + b.len());
    bytes.extend_from_slice(a);
    bytes.extend_from_slice(b);
    RtString::from(bytes)
}

/// Up to `len` bytes starting at byte `start`.
pub fn rt_substr(s: &RtString, start: i64, len: i64) -> RtString {
    let start = clamp(start, s.len());
    let len = clamp(len, s.len() - start);
    s.slice(start, start + len)
}

/// The first `n` bytes.
pub fn rt_left(s: &RtString, n: i64) -> RtString {
    s.slice(0, clamp(n, s.len()))
}

/// The last `n` bytes.
pub fn rt_right(s: &RtString, n: i64) -> RtString {
    let n = clamp(n, s.len());
    s.slice(s.len() - n, s.len())
}

/// Bytes from `start` to the end.
///
/// `start <= 0` yields `s` itself; `start >= len` yields the empty string.
pub fn rt_mid2(s: &RtString, start: i64) -> RtString {
    s.slice(clamp(start, s.len()), s.len())
}

/// Up to `len` bytes from `start`.
pub fn rt_mid3(s: &RtString, start: i64, len: i64) -> RtString {
    rt_substr(s, start, len)
}

fn find(hay: &[u8], from: usize, needle: &[u8]) -> i64 {
    if needle.len() > hay.len() {
        return 0;
    }
    (from..=hay.len() - needle.len())
        .find(|&i| &hay[i..i + needle.len()] == needle)
        .map_or(0, |i| i as i64 + 1)
}

/// 1-based position of `needle` in `hay`, 0 when absent.
pub fn rt_instr2(hay: &RtString, needle: &RtString) -> i64 {
    rt_instr3(1, hay, needle)
}

/// Like [`rt_instr2`], searching from 1-based position `start`.
///
/// An empty needle matches at the clamped start.
pub fn rt_instr3(start: i64, hay: &RtString, needle: &RtString) -> i64 {
    let from = clamp(start.saturating_sub(1), hay.len());
    if needle.is_empty() {
        return from as i64 + 1;
    }
    find(hay, from, needle)
}

fn is_blank(b: &u8) -> bool {
    *b == b' ' || *b == b'\t'
}

pub fn rt_ltrim(s: &RtString) -> RtString {
    let start = s.iter().position(|b| !is_blank(b)).unwrap_or(s.len());
    s.slice(start, s.len())
}

pub fn rt_rtrim(s: &RtString) -> RtString {
    let end = s.iter().rposition(|b| !is_blank(b)).map_or(0, |i| i + 1);
    s.slice(0, end)
}

pub fn rt_trim(s: &RtString) -> RtString {
    let start = s.iter().position(|b| !is_blank(b)).unwrap_or(s.len());
    let end = s.iter().rposition(|b| !is_blank(b)).map_or(start, |i| i + 1);
    s.slice(start, end)
}

fn map_ascii(s: &RtString, changes: fn(&u8) -> bool, convert: fn(&[u8]) -> Vec<u8>) -> RtString {
    if s.iter().any(changes) {
        RtString::from(convert(s))
    } else {
        s.clone()
    }
}

/// ASCII upper case; other bytes pass through.
pub fn rt_ucase(s: &RtString) -> RtString {
    map_ascii(s, u8::is_ascii_lowercase, <[u8]>::to_ascii_uppercase)
}

/// ASCII lower case; other bytes pass through.
pub fn rt_lcase(s: &RtString) -> RtString {
    map_ascii(s, u8::is_ascii_uppercase, <[u8]>::to_ascii_lowercase)
}

/// First byte, or 0 for the empty string.
pub fn rt_asc(s: &RtString) -> i64 {
    s.first().map_or(0, |&b| b as i64)
}

/// One-byte string holding `code`. Traps unless `0 <= code <= 255`.
pub fn rt_chr(code: i64) -> RtString {
    match u8::try_from(code) {
        Ok(byte) => RtString::from_slice(&[byte]),
        Err(_) => trap("rt_chr: code out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mid2_saturates_low() {
        let s = rt_const_cstr("ABCDE");
        assert_eq!(rt_mid2(&s, -1), rt_const_cstr("ABCDE"));
        assert_eq!(rt_mid2(&s, 0), s);
        assert!(rt_mid2(&s, -1).is_static());
    }

    #[test]
    fn test_mid2_saturates_high() {
        let s = rt_const_cstr("ABCDE");
        assert_eq!(rt_mid2(&s, 5), rt_str_empty());
        assert_eq!(rt_mid2(&s, i64::MAX), rt_str_empty());
        assert_eq!(rt_mid2(&s, 2).as_bytes(), b"CDE");
    }

    #[test]
    fn test_const_cstr_stops_at_nul() {
        let s = rt_const_cstr(b"AB\0CD");
        assert_eq!(s.as_bytes(), b"AB");
        assert!(s.is_static());
        let hi = CStr::from_bytes_with_nul(b"hi\0").unwrap();
        assert_eq!(rt_const_cstr(hi).as_bytes(), b"hi");
        assert_eq!(rt_len(&rt_const_cstr("")), 0);
    }

    #[test]
    fn test_static_slices_stay_borrowed() {
        let s = rt_const_cstr("the quick brown fox jumps over the lazy dog");
        let tail = rt_mid2(&s, 4);
        assert!(tail.is_static());
        assert_eq!(tail.as_bytes(), b"quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_representations() {
        let short = RtString::from("short");
        assert!(short.is_inline());
        assert!(short.capacity() >= short.len());

        let long = RtString::from("a string longer than the inline buffer");
        assert!(!long.is_inline());
        assert!(!long.is_static());
        assert_eq!(long.capacity(), long.len());

        // Slicing a heap string down to inline size inlines it
        assert!(rt_left(&long, 8).is_inline());
        assert!(RtString::from("x".repeat(INLINE_CAPACITY)).is_inline());
        assert!(!RtString::from("x".repeat(INLINE_CAPACITY + 1)).is_inline());
    }

    #[test]
    fn test_equality_is_bytewise_across_representations() {
        let text = "value semantics across storage kinds";
        let heap = RtString::from(text.to_string());
        let stat = rt_const_cstr(text);
        assert_eq!(heap, stat);
        assert_eq!(rt_mid2(&heap, 6), rt_mid2(&stat, 6));
        assert!(rt_str_eq(&rt_left(&heap, 5), &RtString::from("value")));
    }

    #[test]
    fn test_substr_left_right() {
        let s = RtString::from("Hello, world");
        assert_eq!(rt_substr(&s, 7, 5).as_bytes(), b"world");
        assert_eq!(rt_substr(&s, -3, 5).as_bytes(), b"Hello");
        assert_eq!(rt_substr(&s, 7, 100).as_bytes(), b"world");
        assert_eq!(rt_substr(&s, 50, 2), rt_str_empty());
        assert_eq!(rt_substr(&s, 2, -1), rt_str_empty());

        assert_eq!(rt_left(&s, 5).as_bytes(), b"Hello");
        assert_eq!(rt_left(&s, 99), s);
        assert_eq!(rt_left(&s, -1), rt_str_empty());
        assert_eq!(rt_right(&s, 5).as_bytes(), b"world");
        assert_eq!(rt_right(&s, 99), s);
        assert_eq!(rt_mid3(&s, 4, 3).as_bytes(), b"o, ");
    }

    #[test]
    fn test_concat() {
        let a = RtString::from("foo");
        let b = rt_const_cstr("bar");
        assert_eq!(rt_concat(&a, &b).as_bytes(), b"foobar");
        assert!(rt_concat(&rt_str_empty(), &b).is_static());
        assert_eq!(rt_concat(&a, &rt_str_empty()), a);
    }

    #[test]
    fn test_instr() {
        let hay = RtString::from("abcabc");
        let bc = RtString::from("bc");
        assert_eq!(rt_instr2(&hay, &bc), 2);
        assert_eq!(rt_instr3(3, &hay, &bc), 5);
        assert_eq!(rt_instr3(6, &hay, &bc), 0);
        assert_eq!(rt_instr2(&hay, &RtString::from("zz")), 0);
        assert_eq!(rt_instr2(&bc, &hay), 0);

        let empty = rt_str_empty();
        assert_eq!(rt_instr2(&hay, &empty), 1);
        assert_eq!(rt_instr3(4, &hay, &empty), 4);
        assert_eq!(rt_instr3(-5, &hay, &empty), 1);
        assert_eq!(rt_instr3(100, &hay, &empty), 7);
    }

    #[test]
    fn test_trim() {
        let s = RtString::from(" \t padded \t ");
        assert_eq!(rt_ltrim(&s).as_bytes(), b"padded \t ");
        assert_eq!(rt_rtrim(&s).as_bytes(), b" \t padded");
        assert_eq!(rt_trim(&s).as_bytes(), b"padded");
        assert_eq!(rt_trim(&RtString::from(" \t ")), rt_str_empty());
        assert_eq!(rt_trim(&RtString::from("\nx\n")).as_bytes(), b"\nx\n");
    }

    #[test]
    fn test_case_is_ascii_only() {
        let s = RtString::from("Grüße, Welt");
        assert_eq!(rt_ucase(&s), RtString::from("GRüßE, WELT"));
        assert_eq!(rt_lcase(&s), RtString::from("grüße, welt"));
        let upper = rt_const_cstr("ABC");
        assert!(rt_ucase(&upper).is_static());
    }

    #[test]
    fn test_chr_and_asc() {
        assert_eq!(rt_chr(65).as_bytes(), b"A");
        assert_eq!(rt_chr(0).as_bytes(), &[0u8]);
        assert_eq!(rt_chr(255).as_bytes(), &[255u8]);
        assert_eq!(rt_asc(&RtString::from("A")), 65);
        assert_eq!(rt_asc(&rt_str_empty()), 0);
        assert_eq!(rt_asc(&rt_chr(200)), 200);
    }

    #[test]
    fn test_display_and_debug() {
        let s = RtString::from("tab\there");
        assert_eq!(s.to_string(), "tab\there");
        assert_eq!(format!("{:?}", s), "RtString(\"tab\\there\")");
    }

    proptest! {
        #[test]
        fn mid2_low_returns_input(bytes in proptest::collection::vec(any::<u8>(), 0..64), k in i64::MIN..=0) {
            let s = RtString::from(bytes);
            prop_assert_eq!(rt_mid2(&s, k), s);
        }

        #[test]
        fn mid2_high_returns_empty(bytes in proptest::collection::vec(any::<u8>(), 0..64), extra in 0i64..1000) {
            let s = RtString::from(bytes);
            let k = rt_len(&s) + extra;
            prop_assert!(rt_mid2(&s, k).is_empty());
        }

        #[test]
        fn mid2_in_range_is_suffix(bytes in proptest::collection::vec(any::<u8>(), 1..64), k in 0usize..64) {
            let k = k % bytes.len();
            let s = RtString::from(bytes.clone());
            let mid = rt_mid2(&s, k as i64);
            prop_assert_eq!(mid.as_bytes(), &bytes[k..]);
        }

        #[test]
        fn chr_is_one_byte(c in 0i64..=255) {
            let s = rt_chr(c);
            prop_assert_eq!(rt_len(&s), 1);
            prop_assert_eq!(s[0] as i64, c);
        }
    }
}
