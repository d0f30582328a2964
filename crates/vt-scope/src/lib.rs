//! Scope-token derivation and the durable scope-to-fragment table.
//!
//! A scope token is the partition identity for one (integrity hash, target
//! URL) pair. Two pages differing in either coordinate derive different
//! tokens and therefore never share storage, cache, or install identity.

use core::fmt;
use std::sync::Arc;

use vt_core::DigestSource;
use vt_core::KeyValueStore;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::TokenSource;
use vt_core::encode_hex;

/// Durable key holding the per-install secret.
pub const SECRET_STORAGE_KEY: &str = "secret";

/// Path prefix under which scoped app paths live.
pub const SCOPE_ROUTE_PREFIX: &str = "/x/";

/// Default token width in hex characters (64 bits).
pub const DEFAULT_TOKEN_HEX_CHARS: usize = 16;

// Neither the secret (hex) nor the hash (base64) can contain a newline, so
// the derivation fields cannot bleed into each other.
const DERIVATION_SEPARATOR: char = '\n';

/// Whether tokens mix in the per-install secret.
///
/// `UserSecret` tokens are unlinkable across installs; `Public` tokens are a
/// pure function of (hash, URL) and deliberately shareable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    UserSecret,
    Public,
}

/// Token derivation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeConfig {
    pub mode: ScopeMode,
    pub token_hex_chars: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            mode: ScopeMode::UserSecret,
            token_hex_chars: DEFAULT_TOKEN_HEX_CHARS,
        }
    }
}

impl ScopeConfig {
    pub fn validate(&self) -> ShellResult<()> {
        if !(8..=64).contains(&self.token_hex_chars) {
            return Err(ShellError::new(
                "scope.token_width_invalid",
                format!(
                    "token width must be 8..=64 hex characters, got {}",
                    self.token_hex_chars
                ),
            ));
        }
        Ok(())
    }
}

/// Opaque partition token, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeToken(String);

impl ScopeToken {
    /// Accepts previously issued token text; anything but lowercase hex is
    /// rejected.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || !text.chars().all(is_lower_hex) {
            return None;
        }
        Some(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives tokens and maintains the durable scope table.
///
/// The durable namespace holds exactly the install secret (under
/// [`SECRET_STORAGE_KEY`]) and one record per scope token.
pub struct ScopeResolver {
    config: ScopeConfig,
    digest: Box<dyn DigestSource>,
    tokens: Box<dyn TokenSource>,
    store: Arc<dyn KeyValueStore>,
}

impl ScopeResolver {
    pub fn new(
        config: ScopeConfig,
        digest: Box<dyn DigestSource>,
        tokens: Box<dyn TokenSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> ShellResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            digest,
            tokens,
            store,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Returns the install secret, creating and persisting it on first use.
    pub fn install_secret(&self) -> ShellResult<String> {
        if let Some(secret) = self.store.get(SECRET_STORAGE_KEY)? {
            return Ok(secret);
        }
        let secret = self.tokens.random_token();
        self.store.set(SECRET_STORAGE_KEY, &secret)?;
        Ok(secret)
    }

    /// Derives the token partitioning state for (hash, target URL).
    ///
    /// Deterministic for a given install; any change to either input (or to
    /// the secret, in `UserSecret` mode) yields a different token.
    pub fn derive_token(&self, hash: &str, target_url: &str) -> ShellResult<ScopeToken> {
        let mut material = String::new();
        if self.config.mode == ScopeMode::UserSecret {
            material.push_str(&self.install_secret()?);
            material.push(DERIVATION_SEPARATOR);
        }
        material.push_str(hash);
        material.push(DERIVATION_SEPARATOR);
        material.push_str(target_url);

        let digest = self.digest.sha256(material.as_bytes());
        let mut hex = encode_hex(&digest);
        hex.truncate(self.config.token_hex_chars);
        Ok(ScopeToken(hex))
    }

    /// Random segment of the configured width, for ephemeral manifest scopes.
    pub fn ephemeral_segment(&self) -> String {
        let mut segment = self.tokens.random_token();
        segment.truncate(self.config.token_hex_chars);
        segment
    }

    /// Persists the payload (canonically an encoded fragment) under `token`.
    pub fn remember_fragment(&self, token: &ScopeToken, payload: &str) -> ShellResult<()> {
        self.store.set(token.as_str(), payload)
    }

    /// Reads back what a scoped path stands for, if anything was stored.
    pub fn recall_fragment(&self, token: &ScopeToken) -> ShellResult<Option<String>> {
        self.store.get(token.as_str())
    }
}

/// Scoped app path for a segment: `/x/<segment>`.
pub fn scoped_path(segment: &str) -> String {
    format!("{SCOPE_ROUTE_PREFIX}{segment}")
}

/// Extracts the token from a scoped path (`/x/<token>[/...]`).
pub fn token_from_path(path: &str) -> Option<ScopeToken> {
    let rest = path.strip_prefix(SCOPE_ROUTE_PREFIX)?;
    let segment = match rest.split_once('/') {
        Some((segment, _)) => segment,
        None => rest,
    };
    ScopeToken::parse(segment)
}

fn is_lower_hex(ch: char) -> bool {
    matches!(ch, '0'..='9' | 'a'..='f')
}
