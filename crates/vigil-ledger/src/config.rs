use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Ledger tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Deadline for every individual store call, in milliseconds.
    pub store_timeout_ms: u64,
    /// Backoff for head-conflict retries during `create`.
    pub retry: RetryPolicy,
    /// Page size used when a query does not ask for one.
    pub default_page_size: usize,
    /// Upper clamp for requested page sizes.
    pub max_page_size: usize,
    /// Entries loaded per page by the integrity verifier and exports.
    pub verify_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
            default_page_size: 50,
            max_page_size: 500,
            verify_page_size: 1_000,
        }
    }
}

impl LedgerConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    pub fn batch_size(&self) -> usize {
        self.verify_page_size.max(1)
    }
}
