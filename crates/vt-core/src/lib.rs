//! Shared primitives used across Vitrine crates.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Result alias used across the workspace.
pub type ShellResult<T> = Result<T, ShellError>;

/// Top-level error type carried through every fallible seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellError {
    pub code: &'static str,
    pub message: String,
}

impl ShellError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ShellError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ShellError {}

/// Produces the digest used for scope-token derivation and asset versioning.
pub trait DigestSource: Send + Sync {
    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// Produces unpredictable tokens for install secrets and ephemeral segments.
pub trait TokenSource: Send + Sync {
    fn random_token(&self) -> String;
}

/// Small string key/value store backing the durable profile namespace.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> ShellResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ShellResult<()>;
    fn remove(&self, key: &str) -> ShellResult<()>;
}

/// Digest capability backed by the process-local SHA-256 implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDigest;

impl DigestSource for SystemDigest {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }
}

/// Token capability backed by the thread-local CSPRNG.
///
/// Tokens are 16 random bytes rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTokenSource;

impl TokenSource for SystemTokenSource {
    fn random_token(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        encode_hex(&bytes)
    }
}

/// In-memory store for tests and ephemeral runs. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> ShellResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ShellError::new("core.store_poisoned", "memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ShellResult<Option<String>> {
        Ok(self.locked()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ShellResult<()> {
        self.locked()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ShellResult<()> {
        self.locked()?.remove(key);
        Ok(())
    }
}

/// Renders bytes as lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_char(byte >> 4));
        out.push(hex_char(byte & 0x0f));
    }
    out
}

fn hex_char(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + (nibble - 10)) as char,
    }
}

/// Decodes a hex string back to bytes. Returns `None` on odd length or
/// non-hex characters.
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }

    let digits: Vec<char> = text.chars().collect();
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    let mut index = 0_usize;
    while index < digits.len() {
        let high = hex_nibble(digits[index])?;
        let low = hex_nibble(digits[index + 1])?;
        bytes.push((high << 4) | low);
        index += 2;
    }

    Some(bytes)
}

fn hex_nibble(ch: char) -> Option<u8> {
    match ch {
        '0'..='9' => Some((ch as u8) - b'0'),
        'a'..='f' => Some((ch as u8) - b'a' + 10),
        'A'..='F' => Some((ch as u8) - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DigestSource, KeyValueStore, MemoryStore, ShellError, SystemDigest, SystemTokenSource,
        TokenSource, decode_hex, encode_hex,
    };

    #[test]
    fn error_display_includes_code_and_message() {
        let error = ShellError::new("core.sample", "something went sideways");
        assert_eq!(error.to_string(), "core.sample: something went sideways");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let digest = SystemDigest.sha256(b"abc");
        assert_eq!(
            encode_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn random_tokens_are_hex_and_distinct() {
        let source = SystemTokenSource;
        let first = source.random_token();
        let second = source.random_token();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(first, second);
    }

    #[test]
    fn memory_store_round_trips_and_removes() {
        let store = MemoryStore::new();
        assert!(store.set("alpha", "one").is_ok());
        match store.get("alpha") {
            Ok(Some(value)) => assert_eq!(value, "one"),
            other => panic!("unexpected read result: {other:?}"),
        }
        assert!(store.remove("alpha").is_ok());
        match store.get("alpha") {
            Ok(None) => {}
            other => panic!("expected removed key, got {other:?}"),
        }
    }

    #[test]
    fn encode_hex_renders_lowercase_pairs() {
        assert_eq!(encode_hex(&[0x00, 0x0f, 0xa5, 0xff]), "000fa5ff");
        assert_eq!(encode_hex(&[]), "");
    }

    #[test]
    fn decode_hex_inverts_encode_and_rejects_junk() {
        assert_eq!(decode_hex("000fa5ff"), Some(vec![0x00, 0x0f, 0xa5, 0xff]));
        assert_eq!(decode_hex("A5Ff"), Some(vec![0xa5, 0xff]));
        assert_eq!(decode_hex(""), Some(Vec::new()));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
