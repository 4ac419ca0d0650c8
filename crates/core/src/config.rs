//! STM configuration
//!
//! One `StmConfig` per client; there is no process-wide mutable
//! configuration. The defaults match the protocol's documented values and
//! every knob has a `with_*` builder for tests that need boundary behavior
//! (`max_retries = 1`, `history_retention = 1`, short timeouts).

use std::time::Duration;

/// Configuration for an STM client
#[derive(Debug, Clone)]
pub struct StmConfig {
    /// Coordinator path prefix for the STM subtree
    pub root: String,
    /// Per-transaction retry ceiling (retries beyond the first attempt)
    pub max_retries: u32,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub backoff_initial_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub backoff_max_ms: u64,
    /// Committed versions retained per ref; older versions are pruned
    pub history_retention: usize,
    /// Deadline for a whole `transact` call, all attempts included
    pub transaction_timeout_ms: u64,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            root: "/stm".to_string(),
            max_retries: 100,
            backoff_initial_ms: 10,
            backoff_max_ms: 500,
            history_retention: 10,
            transaction_timeout_ms: 10_000,
        }
    }
}

impl StmConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coordinator path prefix
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff window
    pub fn with_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.backoff_initial_ms = initial;
        self.backoff_max_ms = max;
        self
    }

    /// Set the per-ref history retention
    pub fn with_history_retention(mut self, retention: usize) -> Self {
        self.history_retention = retention;
        self
    }

    /// Set the transaction deadline
    pub fn with_transaction_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transaction_timeout_ms = timeout_ms;
        self
    }

    /// The transaction deadline as a `Duration`
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StmConfig::default();
        assert_eq!(config.root, "/stm");
        assert_eq!(config.max_retries, 100);
        assert_eq!(config.backoff_initial_ms, 10);
        assert_eq!(config.backoff_max_ms, 500);
        assert_eq!(config.history_retention, 10);
        assert_eq!(config.transaction_timeout_ms, 10_000);
    }

    #[test]
    fn test_builder() {
        let config = StmConfig::new()
            .with_root("/stm-test")
            .with_max_retries(1)
            .with_backoff_ms(1, 20)
            .with_history_retention(1)
            .with_transaction_timeout_ms(500);
        assert_eq!(config.root, "/stm-test");
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.backoff_initial_ms, 1);
        assert_eq!(config.backoff_max_ms, 20);
        assert_eq!(config.history_retention, 1);
        assert_eq!(config.transaction_timeout(), Duration::from_millis(500));
    }
}
