//! Interned String Tokens
//!
//! A `Token` is a handle to a uniqued, immortal string. All distinct
//! token contents are stored exactly once in a process-wide table, so
//! equality and hashing are pointer operations regardless of string
//! length. Ordering compares contents, so sorted containers of tokens
//! iterate deterministically.
//!
//! Tokens are never freed. The table only grows; this is what makes
//! pointer identity a sound equality test across threads.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Immortal storage for one interned string.
struct TokenData {
    content: Box<str>,
}

/// Process-wide intern table mapping content to its unique leaked
/// entry. An entry, once inserted, is never removed.
static TOKEN_TABLE: Lazy<DashMap<&'static str, &'static TokenData>> =
    Lazy::new(|| DashMap::with_capacity(1024));

static EMPTY: Lazy<Token> = Lazy::new(|| Token::new(""));

/// An interned, immortal string with O(1) equality and hashing.
///
/// `Token` is `Copy` and pointer-sized. Two tokens constructed from
/// equal strings on any threads compare equal and hash equal.
#[derive(Clone, Copy)]
pub struct Token(&'static TokenData);

impl Token {
    /// Intern `s`, returning its unique token.
    pub fn new(s: impl AsRef<str>) -> Token {
        let s = s.as_ref();
        if let Some(entry) = TOKEN_TABLE.get(s) {
            return Token(*entry.value());
        }
        // Not present. Leak a copy and race to insert it; if another
        // thread won the race, use its entry and accept the one-time
        // leak of our copy.
        let data: &'static TokenData = Box::leak(Box::new(TokenData {
            content: s.to_owned().into_boxed_str(),
        }));
        let key: &'static str = &data.content;
        match TOKEN_TABLE.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => Token(*e.get()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(data);
                Token(data)
            }
        }
    }

    /// The empty token.
    pub fn empty() -> Token {
        *EMPTY
    }

    /// The token's string content.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        &self.0.content
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.content.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.content.len()
    }

    /// Stable per-process hash of the token identity.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        // Shift off low zero bits of the allocation address.
        (self.0 as *const TokenData as u64) >> 3
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::empty()
    }
}

impl PartialEq for Token {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Interning guarantees distinct contents have distinct storage.
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Token {}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Hash for Token {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::new(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::new(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(t: &Token) -> u64 {
        let mut h = DefaultHasher::new();
        t.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_interning_dedupes() {
        let a = Token::new("radius");
        let b = Token::new(String::from("radius"));
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str().as_ptr(), b.as_str().as_ptr()));
    }

    #[test]
    fn test_distinct_contents_differ() {
        assert_ne!(Token::new("a"), Token::new("b"));
    }

    #[test]
    fn test_empty_token() {
        assert!(Token::empty().is_empty());
        assert_eq!(Token::empty(), Token::new(""));
        assert_eq!(Token::default(), Token::empty());
    }

    #[test]
    fn test_hash_equals_for_equal_tokens() {
        let a = Token::new("xformOp:translate");
        let b = Token::new("xformOp:translate");
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_ordering_is_by_content() {
        let mut v = vec![Token::new("b"), Token::new("a"), Token::new("c")];
        v.sort();
        let strs: Vec<&str> = v.iter().map(|t| t.as_str()).collect();
        assert_eq!(strs, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cross_thread_identity() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Token::new("sharedName")))
            .collect();
        let tokens: Vec<Token> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for t in &tokens {
            assert_eq!(*t, tokens[0]);
            assert_eq!(t.hash_value(), tokens[0].hash_value());
        }
    }
}
