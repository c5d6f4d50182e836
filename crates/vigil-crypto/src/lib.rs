//! Hash chain primitives for the Vigil audit ledger.
//!
//! Every entry's `hash` is a domain-separated BLAKE3 digest over the
//! predecessor's hash followed by the entry's canonical bytes. The first
//! entry links to the all-zero genesis digest.
//!
//! All hashing wraps `blake3`; there is no custom cryptography here.

pub mod chain;
pub mod hasher;

pub use chain::{ChainError, ChainLinked, ChainSealer, HashChainVerifier, LinkFault};
pub use hasher::{EntryHasher, HasherError};
