//! One-time job secrets.
//!
//! The secret is both the lookup key for a job and the memo the client must
//! attach to the payment, so it has to be impossible to guess within a
//! payment window. Secrets are drawn from the operating system RNG.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fewest random bytes a secret may carry.
pub const MIN_SECRET_BYTES: usize = 8;

/// Default number of random bytes (128 bits).
const DEFAULT_SECRET_BYTES: usize = 16;

/// Opaque job secret (lowercase hex).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// The secret as sent to clients and expected in the payment memo.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keep full secrets out of debug output.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({}…)", self.short())
    }
}

/// Generates job secrets from a cryptographically secure source.
#[derive(Debug, Clone, Copy)]
pub struct SecretGenerator {
    bytes: usize,
}

impl SecretGenerator {
    /// Create a generator producing secrets of `bytes` random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `bytes` is below [`MIN_SECRET_BYTES`].
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes < MIN_SECRET_BYTES {
            return Err(Error::Config(format!(
                "secrets need at least {MIN_SECRET_BYTES} random bytes, got {bytes}"
            )));
        }
        Ok(Self { bytes })
    }

    /// Draw a fresh secret.
    #[must_use]
    pub fn generate(&self) -> Secret {
        let mut buf = vec![0u8; self.bytes];
        OsRng.fill_bytes(&mut buf);
        Secret(hex::encode(buf))
    }

    /// Random bytes per secret.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for SecretGenerator {
    fn default() -> Self {
        Self {
            bytes: DEFAULT_SECRET_BYTES,
        }
    }
}
