//! Mint module - orchestration, status reporting and the mint session.
//!
//! The session refreshes sale and wallet data on a schedule, the orchestrator
//! submits mint batches, and both report to a shared status channel.

pub mod errors;
pub mod instructions;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod transfer;
pub mod types;

// Re-export main public types and the session
pub use errors::MintError;
pub use orchestrator::{BatchOutcome, MintBatchReport, MintOrchestrator};
pub use scheduler::{RefreshGate, RefreshScheduler, RefreshTarget, SchedulerHandle};
pub use session::{MintSession, SessionSources, SessionView};
pub use status::{Severity, StatusChannel, StatusMessage, StatusView};
pub use transfer::TokenTransfer;
pub use types::{BatchPhase, MintBatchStatus, MintConfig, MintUnitPlan, UnitState};

/// Config builder for convenient construction with sensible defaults.
pub struct MintConfigBuilder {
    config: MintConfig,
}

impl MintConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: MintConfig::default(),
        }
    }

    /// Start from the environment instead of the defaults.
    pub fn from_env() -> Self {
        Self {
            config: MintConfig::from_env(),
        }
    }

    /// Set the RPC endpoints.
    pub fn with_rpc_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.config.rpc_endpoints = endpoints;
        self
    }

    /// Set the cluster name used for explorer links.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    pub fn with_candy_machine(mut self, candy_machine: impl Into<String>) -> Self {
        self.config.candy_machine = Some(candy_machine.into());
        self
    }

    pub fn with_catalog(mut self, path: impl Into<String>) -> Self {
        self.config.catalog_path = Some(path.into());
        self
    }

    pub fn with_keypair(mut self, path: impl Into<String>) -> Self {
        self.config.keypair_path = Some(path.into());
        self
    }

    pub fn with_allow_lists(mut self, paths: Vec<String>) -> Self {
        self.config.allow_list_paths = paths;
        self
    }

    /// Set the refresh interval in seconds.
    pub fn with_refresh_interval(mut self, seconds: u64) -> Self {
        self.config.refresh_interval_seconds = seconds;
        self
    }

    /// Set the delay before refreshing after a batch, in milliseconds.
    pub fn with_resume_delay(mut self, delay_ms: u64) -> Self {
        self.config.resume_delay_ms = delay_ms;
        self
    }

    pub fn with_compute_unit_limit(mut self, units: u32) -> Self {
        self.config.compute_unit_limit = units;
        self
    }

    pub fn with_max_batch_size(mut self, size: u32) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Set message auto-dismiss timing in milliseconds.
    pub fn with_dismiss_timing(mut self, delay_ms: u64, clear_grace_ms: u64) -> Self {
        self.config.dismiss_delay_ms = delay_ms;
        self.config.clear_grace_ms = clear_grace_ms;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    /// Set max cache entries.
    pub fn with_max_cache_entries(mut self, max_entries: usize) -> Self {
        self.config.max_cache_entries = max_entries;
        self
    }

    /// Set circuit breaker configuration.
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown_seconds: u64) -> Self {
        self.config.circuit_breaker_failure_threshold = failure_threshold;
        self.config.circuit_breaker_cooldown_seconds = cooldown_seconds;
        self
    }

    /// Build the configuration.
    pub fn build_config(self) -> MintConfig {
        self.config
    }
}

impl Default for MintConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MintConfigBuilder::new()
            .with_network("devnet")
            .with_refresh_interval(5)
            .with_rate_limit(50)
            .with_dismiss_timing(1000, 100)
            .with_catalog("catalog.json")
            .with_keypair("id.json")
            .build_config();

        assert_eq!(config.network, "devnet");
        assert_eq!(config.refresh_interval_seconds, 5);
        assert_eq!(config.rate_limit_requests_per_second, 50);
        assert_eq!(config.dismiss_delay_ms, 1000);
        assert_eq!(config.clear_grace_ms, 100);
        assert_eq!(config.catalog_path.as_deref(), Some("catalog.json"));
        assert_eq!(config.keypair_path.as_deref(), Some("id.json"));
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = MintConfigBuilder::new().build_config();

        assert_eq!(config.refresh_interval_seconds, 20);
        assert_eq!(config.resume_delay_ms, 1000);
        assert_eq!(config.compute_unit_limit, 800_000);
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.dismiss_delay_ms, 5000);
        assert_eq!(config.clear_grace_ms, 500);
        assert_eq!(config.circuit_breaker_failure_threshold, 3);
        assert!(config.keypair_path.is_none());
    }
}
