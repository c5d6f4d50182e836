use vigil_types::{AuditEntry, EntryHash};

/// Domain-separated BLAKE3 entry hasher.
///
/// The domain tag is prepended to every computation, so a digest taken
/// over ledger entries can never collide with one taken over some other
/// byte stream that happens to be identical.
pub struct EntryHasher {
    domain: &'static str,
}

impl EntryHasher {
    /// Hasher for ledger entries.
    pub const ENTRY: Self = Self {
        domain: "vigil-entry-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// `BLAKE3(domain ":" prev_hash canonical)`.
    pub fn link(&self, prev_hash: &EntryHash, canonical: &[u8]) -> EntryHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(prev_hash.as_bytes());
        hasher.update(canonical);
        EntryHash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Compute the digest an entry should carry, from its own fields.
    pub fn hash_entry(&self, entry: &AuditEntry) -> Result<EntryHash, HasherError> {
        let canonical = entry
            .canonical_bytes()
            .map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.link(&entry.prev_hash, &canonical))
    }

    /// Returns `true` if the stored `hash` matches a fresh computation.
    pub fn verify(&self, entry: &AuditEntry) -> Result<bool, HasherError> {
        Ok(self.hash_entry(entry)? == entry.hash)
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
