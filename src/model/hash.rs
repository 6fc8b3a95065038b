//! Content-addressed hash type using BLAKE3

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain prefix for terminal (key/value) node hashes
const TERMINAL_PREFIX: u8 = 1;
/// Domain prefix for internal (left/right) node hashes
const INTERNAL_PREFIX: u8 = 2;

/// A 32-byte BLAKE3 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Hash arbitrary data
    pub fn digest(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Hash(*hash.as_bytes())
    }

    /// Hash multiple pieces of data
    pub fn digest_many(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Hash(*hasher.finalize().as_bytes())
    }

    /// Hash of a terminal node holding `key` and `value`.
    ///
    /// The key length is part of the preimage so that `(ab, c)` and `(a, bc)`
    /// never collide.
    pub fn terminal(key: &[u8], value: &[u8]) -> Self {
        let key_len = (key.len() as u64).to_le_bytes();
        Self::digest_many(&[&[TERMINAL_PREFIX], &key_len, key, value])
    }

    /// Hash of an internal node with the given children
    pub fn internal(left: &Hash, right: &Hash) -> Self {
        Self::digest_many(&[&[INTERNAL_PREFIX], &left.0, &right.0])
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        parse_bytes32(s).map(Hash)
    }

    /// Get a short prefix for display (first 7 chars, like git)
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Identifier of a logical tree (a 32-byte namespace)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeId([u8; 32]);

impl TreeId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        TreeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        parse_bytes32(s).map(TreeId)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId({})", &self.to_hex()[..7])
    }
}

impl FromStr for TreeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TreeId::from_hex(s)
    }
}

fn parse_bytes32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let mut arr = [0u8; 32];
    hex::decode_to_slice(s, &mut arr)?;
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_digest() {
        let h1 = Hash::digest(b"hello");
        let h2 = Hash::digest(b"hello");
        let h3 = Hash::digest(b"world");

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let h1 = Hash::digest(b"test data");
        let h2 = Hash::from_hex(&h1.to_hex()).unwrap();
        assert_eq!(h1, h2);

        let prefixed = format!("0x{}", h1.to_hex());
        assert_eq!(prefixed.parse::<Hash>().unwrap(), h1);
    }

    #[test]
    fn test_hash_rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(TreeId::from_hex(&"ab".repeat(33)).is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_terminal_hash_is_length_delimited() {
        assert_ne!(Hash::terminal(b"ab", b"c"), Hash::terminal(b"a", b"bc"));
        assert_eq!(Hash::terminal(b"k", b"v"), Hash::terminal(b"k", b"v"));
    }

    #[test]
    fn test_internal_hash_is_ordered() {
        let a = Hash::terminal(b"a", b"1");
        let b = Hash::terminal(b"b", b"2");
        assert_ne!(Hash::internal(&a, &b), Hash::internal(&b, &a));
    }

    #[test]
    fn test_node_kinds_are_domain_separated() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let mut joined = a.as_bytes().to_vec();
        joined.extend_from_slice(b.as_bytes());
        assert_ne!(Hash::internal(&a, &b), Hash::terminal(&joined[..32], &joined[32..]));
    }

    #[test]
    fn test_hash_short() {
        let h = Hash::digest(b"test");
        assert_eq!(h.short().len(), 7);
    }
}
