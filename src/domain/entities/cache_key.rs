//! Cache key type and its on-disk name derivation.

use std::path::Path;

/// Longest path extension carried over to the on-disk file name.
const MAX_FILE_EXTENSION_LENGTH: usize = 8;

/// Identifies a logical resource in both cache tiers.
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key, returning `None` for an empty string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the filesystem-safe file name for this key.
    ///
    /// The name is the hex of the first 16 bytes of the key's SHA-256,
    /// followed by the key's path extension when it is short and alphanumeric.
    #[must_use]
    pub fn file_name(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        let stem = hex::encode(&digest[..16]);

        match self.extension() {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }

    fn extension(&self) -> Option<&str> {
        // Drop query and fragment so "a.png?w=10" keeps "png".
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        let ext = Path::new(path).extension()?.to_str()?;
        (!ext.is_empty()
            && ext.len() <= MAX_FILE_EXTENSION_LENGTH
            && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
