//! Content digests used as layer keys and image ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// A SHA-256 digest rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Prefix for SHA-256 digests
    pub const PREFIX: &'static str = "sha256:";

    /// Wrap an existing digest string, adding the prefix if missing.
    pub fn new(raw: &str) -> Self {
        if raw.starts_with(Self::PREFIX) {
            Self(raw.to_owned())
        } else {
            Self(format!("{}{raw}", Self::PREFIX))
        }
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{}{:x}", Self::PREFIX, Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the prefix.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0)
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..hex.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental digest over length-prefixed fields.
///
/// Every field is framed by its length so that `("ab", "c")` and
/// `("a", "bc")` never collide.
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.field(domain.as_bytes());
        builder
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.field(s.as_bytes())
    }

    pub fn finish(self) -> Digest {
        Digest(format!("{}{:x}", Digest::PREFIX, self.hasher.finalize()))
    }
}
