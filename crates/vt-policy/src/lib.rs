//! Integrity-hash decoding and the embedded frame's Content-Security-Policy
//! engine.

use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use vt_core::{ShellError, ShellResult};

/// Base64 subresource-integrity hash text from the address fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityHash(String);

impl IntegrityHash {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }

    /// Decoded byte length, or `None` when the text is not valid base64.
    pub fn decoded_len(&self) -> Option<usize> {
        BASE64.decode(self.0.as_bytes()).ok().map(|bytes| bytes.len())
    }

    /// Digest family implied by the decoded length, if any.
    pub fn digest_kind(&self) -> Option<DigestKind> {
        self.decoded_len().and_then(DigestKind::from_decoded_len)
    }
}

impl fmt::Display for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest family selected by the DECODED hash length, never by text length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestKind {
    pub fn from_decoded_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Sha256),
            48 => Some(Self::Sha384),
            64 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn directive_prefix(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// An exact Content-Security-Policy string applied to the embedded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspPolicy(String);

impl CspPolicy {
    /// Policy allowing exactly the script matching `hash`.
    ///
    /// Any hash that fails to decode, or decodes to a length outside the
    /// known digest families, degrades to the blocking policy. Malformed
    /// input is never an error here.
    pub fn script_src_for(hash: &IntegrityHash) -> Self {
        match hash.digest_kind() {
            Some(kind) => Self(format!(
                "script-src '{}-{}';",
                kind.directive_prefix(),
                hash.as_base64()
            )),
            None => Self::script_src_none(),
        }
    }

    /// Policy blocking all script execution.
    pub fn script_src_none() -> Self {
        Self("script-src 'none';".to_string())
    }

    /// Caller-supplied policy text, used by the override path.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CspPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the active policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Uninitialized,
    Derived,
    Overridden,
}

/// Per-frame policy holder.
///
/// Applying a hash always recomputes the derived policy and discards any
/// override, so a renavigation can never inherit a stale caller policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEngine {
    policy: Option<CspPolicy>,
    state: PolicyState,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            policy: None,
            state: PolicyState::Uninitialized,
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    pub fn policy(&self) -> Option<&CspPolicy> {
        self.policy.as_ref()
    }

    /// Derives and stores the policy for `hash`, returning the result.
    pub fn apply_hash(&mut self, hash: &IntegrityHash) -> CspPolicy {
        let policy = CspPolicy::script_src_for(hash);
        self.policy = Some(policy.clone());
        self.state = PolicyState::Derived;
        policy
    }

    /// Stores a caller-supplied policy verbatim.
    ///
    /// Only a frame that already derived a policy may be overridden.
    pub fn apply_override(&mut self, policy: impl Into<String>) -> ShellResult<()> {
        if self.state == PolicyState::Uninitialized {
            return Err(ShellError::new(
                "policy.not_derived",
                "cannot override a policy that was never derived",
            ));
        }
        self.policy = Some(CspPolicy::from_text(policy));
        self.state = PolicyState::Overridden;
        Ok(())
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{BASE64, CspPolicy, DigestKind, IntegrityHash, PolicyEngine, PolicyState};
    use base64::Engine;

    const SHA256_B64: &str = "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=";

    #[test]
    fn digest_kind_follows_decoded_length() {
        let sha256 = IntegrityHash::new(SHA256_B64);
        assert_eq!(sha256.decoded_len(), Some(32));
        assert_eq!(sha256.digest_kind(), Some(DigestKind::Sha256));

        let sha384 = IntegrityHash::new(BASE64.encode([7u8; 48]));
        assert_eq!(sha384.digest_kind(), Some(DigestKind::Sha384));

        let sha512 = IntegrityHash::new(BASE64.encode([7u8; 64]));
        assert_eq!(sha512.digest_kind(), Some(DigestKind::Sha512));
    }

    #[test]
    fn unknown_decoded_lengths_have_no_digest_kind() {
        let short = IntegrityHash::new(BASE64.encode(b"hello"));
        assert_eq!(short.decoded_len(), Some(5));
        assert_eq!(short.digest_kind(), None);
    }

    #[test]
    fn malformed_base64_decodes_to_nothing() {
        let bad = IntegrityHash::new("not-base64!!");
        assert_eq!(bad.decoded_len(), None);
        assert_eq!(bad.digest_kind(), None);
    }

    #[test]
    fn sha256_policy_is_the_exact_directive_string() {
        let policy = CspPolicy::script_src_for(&IntegrityHash::new(SHA256_B64));
        assert_eq!(
            policy.as_str(),
            "script-src 'sha256-LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=';"
        );
    }

    #[test]
    fn sha384_and_sha512_pick_their_prefixes() {
        let b384 = BASE64.encode([1u8; 48]);
        let policy = CspPolicy::script_src_for(&IntegrityHash::new(b384.clone()));
        assert_eq!(policy.as_str(), format!("script-src 'sha384-{b384}';"));

        let b512 = BASE64.encode([1u8; 64]);
        let policy = CspPolicy::script_src_for(&IntegrityHash::new(b512.clone()));
        assert_eq!(policy.as_str(), format!("script-src 'sha512-{b512}';"));
    }

    #[test]
    fn malformed_or_odd_hashes_degrade_to_blocking_policy() {
        let bad = CspPolicy::script_src_for(&IntegrityHash::new("!!!"));
        assert_eq!(bad.as_str(), "script-src 'none';");

        let odd = CspPolicy::script_src_for(&IntegrityHash::new(BASE64.encode([0u8; 20])));
        assert_eq!(odd.as_str(), "script-src 'none';");
    }

    #[test]
    fn engine_starts_uninitialized_and_rejects_early_overrides() {
        let mut engine = PolicyEngine::new();
        assert_eq!(engine.state(), PolicyState::Uninitialized);
        assert!(engine.policy().is_none());
        match engine.apply_override("script-src 'self';") {
            Err(error) => assert_eq!(error.code, "policy.not_derived"),
            Ok(()) => panic!("override must not apply before a derivation"),
        }
    }

    #[test]
    fn override_replaces_derived_policy() {
        let mut engine = PolicyEngine::new();
        engine.apply_hash(&IntegrityHash::new(SHA256_B64));
        assert_eq!(engine.state(), PolicyState::Derived);

        assert!(engine.apply_override("script-src 'self';").is_ok());
        assert_eq!(engine.state(), PolicyState::Overridden);
        match engine.policy() {
            Some(policy) => assert_eq!(policy.as_str(), "script-src 'self';"),
            None => panic!("override must leave a policy in place"),
        }
    }

    #[test]
    fn hash_application_discards_an_override() {
        let mut engine = PolicyEngine::new();
        engine.apply_hash(&IntegrityHash::new(SHA256_B64));
        assert!(engine.apply_override("script-src 'self';").is_ok());

        let derived = engine.apply_hash(&IntegrityHash::new(SHA256_B64));
        assert_eq!(engine.state(), PolicyState::Derived);
        assert_eq!(
            derived.as_str(),
            "script-src 'sha256-LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=';"
        );
    }
}
