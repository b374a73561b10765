//! Credential secret handling (spec §9 / SPEC_FULL §B "Crypto"): the
//! plaintext API key is held only in memory, zeroized on drop, and never
//! reachable through `Debug`/`Display` — generalizing the original's
//! encryption-at-rest concern down to the slice of it that is this core's
//! responsibility (persistence/encryption-at-rest is the storage layer's
//! job, spec §1).

use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The only sanctioned way to read the plaintext: the Request
    /// Dispatcher injecting it into the upstream auth header (spec §4.8).
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(\"[redacted]\")")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        // Not constant-time: equality is only used in tests/fixtures, never
        // on a verification path.
        self.0 == other.0
    }
}
