//! Codec for the `<integrity-hash>@<target-url>` pair carried in the shell's
//! location fragment.

use core::fmt;

/// Separator between the integrity hash and the target URL.
pub const FRAGMENT_SEPARATOR: &str = "@";

/// Splits on the FIRST occurrence of `separator` only.
///
/// The remainder keeps every later separator verbatim, so a target URL may
/// itself contain `@` without being mangled. No occurrence yields the whole
/// input and an empty remainder.
pub fn split_first<'a>(text: &'a str, separator: &str) -> (&'a str, &'a str) {
    match text.split_once(separator) {
        Some((first, rest)) => (first, rest),
        None => (text, ""),
    }
}

/// One pinned embed address: which hash to pin and which URL to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub hash: String,
    pub href: String,
}

impl Fragment {
    pub fn new(hash: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            href: href.into(),
        }
    }

    /// Parses a location fragment, with or without its leading `#`.
    ///
    /// Never fails: absent parts come back as empty strings and the caller
    /// decides whether the address is complete.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.strip_prefix('#').unwrap_or(raw);
        let (hash, href) = split_first(trimmed, FRAGMENT_SEPARATOR);
        Self::new(hash, href)
    }

    /// Canonical form written back into the address bar and into rewritten
    /// manifest start URLs: `#<hash>@<href>`.
    pub fn encode(&self) -> String {
        format!("#{}{}{}", self.hash, FRAGMENT_SEPARATOR, self.href)
    }

    /// Whether the address names a page to embed.
    pub fn has_target(&self) -> bool {
        !self.href.is_empty()
    }

    /// The renavigation value for a target change that keeps the pin.
    pub fn with_href(&self, href: impl Into<String>) -> Self {
        Self::new(self.hash.clone(), href)
    }

    /// The renavigation value for a pin change that keeps the target.
    pub fn with_hash(&self, hash: impl Into<String>) -> Self {
        Self::new(hash, self.href.clone())
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.hash, FRAGMENT_SEPARATOR, self.href)
    }
}
