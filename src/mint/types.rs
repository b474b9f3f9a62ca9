//! Types for the mint orchestration layer.

use crate::chain::BlockhashStrategy;
use crate::types::Pubkey;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use std::time::Duration;

/// Runtime configuration of the mint client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConfig {
    /// RPC endpoints, tried in order on failure
    pub rpc_endpoints: Vec<String>,
    /// Cluster name ("mainnet-beta", "devnet", ...)
    pub network: String,
    /// Candy machine address
    pub candy_machine: Option<String>,
    /// Path to the guard catalog JSON file
    pub catalog_path: Option<String>,
    /// Paths to allow-list JSON files, in table order
    pub allow_list_paths: Vec<String>,
    /// Path to the wallet keypair file
    pub keypair_path: Option<String>,
    /// Refresh interval in seconds
    pub refresh_interval_seconds: u64,
    /// Delay before refreshing again after a batch settles, in milliseconds
    pub resume_delay_ms: u64,
    /// Compute unit limit of each mint transaction
    pub compute_unit_limit: u32,
    /// Largest quantity a single batch may request
    pub max_batch_size: u32,
    /// Auto-dismiss delay of status messages in milliseconds
    pub dismiss_delay_ms: u64,
    /// Time between hiding and clearing a dismissed message in milliseconds
    pub clear_grace_ms: u64,
    /// RPC retry attempts
    pub rpc_retry_attempts: usize,
    /// RPC timeout in seconds
    pub rpc_timeout_seconds: u64,
    /// Poll interval while confirming a signature in milliseconds
    pub confirm_poll_interval_ms: u64,
    /// Rate limit requests per second
    pub rate_limit_requests_per_second: u32,
    /// Maximum metadata cache entries
    pub max_cache_entries: usize,
    /// Circuit breaker failure threshold
    pub circuit_breaker_failure_threshold: u32,
    /// Circuit breaker cooldown in seconds
    pub circuit_breaker_cooldown_seconds: u64,
}

impl Default for MintConfig {
    fn default() -> Self {
        Self {
            rpc_endpoints: vec!["https://api.mainnet-beta.solana.com".to_string()],
            network: "mainnet-beta".to_string(),
            candy_machine: None,
            catalog_path: None,
            allow_list_paths: Vec::new(),
            keypair_path: None,
            refresh_interval_seconds: 20,
            resume_delay_ms: 1000,
            compute_unit_limit: 800_000,
            max_batch_size: 20,
            dismiss_delay_ms: 5000,
            clear_grace_ms: 500,
            rpc_retry_attempts: 3,
            rpc_timeout_seconds: 30,
            confirm_poll_interval_ms: 500,
            rate_limit_requests_per_second: 20,
            max_cache_entries: 1000,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_seconds: 30,
        }
    }
}

impl MintConfig {
    /// Load configuration from `MINT_*` environment variables over the defaults.
    ///
    /// `MINT_RPC` holds one or more endpoints separated by `||`;
    /// `MINT_ALLOW_LISTS` holds comma separated file paths.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(rpc) = lookup("MINT_RPC") {
            let endpoints: Vec<String> = rpc
                .split("||")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !endpoints.is_empty() {
                config.rpc_endpoints = endpoints;
            }
        }
        if let Some(network) = lookup("MINT_NETWORK") {
            config.network = network;
        }
        config.candy_machine = lookup("MINT_CANDY_MACHINE").or(config.candy_machine);
        config.catalog_path = lookup("MINT_CATALOG").or(config.catalog_path);
        config.keypair_path = lookup("MINT_KEYPAIR").or(config.keypair_path);
        if let Some(lists) = lookup("MINT_ALLOW_LISTS") {
            config.allow_list_paths = lists
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.dismiss_delay_ms)
    }

    pub fn clear_grace(&self) -> Duration {
        Duration::from_millis(self.clear_grace_ms)
    }
}

/// Lifecycle of a mint batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    /// No batch has been started
    Idle,
    /// Units are being submitted and confirmed
    Submitting,
    /// Every unit resolved
    Settled,
}

/// Outcome of a single unit in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Pending,
    Confirmed,
    Failed(String),
}

/// Aggregated progress of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintBatchStatus {
    pub requested: u32,
    /// Units whose submission was attempted
    pub submitted: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Error lines in completion order, "{unit}. {message}"
    pub errors: Vec<String>,
    pub phase: BatchPhase,
    pub units: Vec<UnitState>,
}

impl MintBatchStatus {
    pub fn idle() -> Self {
        Self::new(0)
    }

    pub fn new(requested: u32) -> Self {
        Self {
            requested,
            submitted: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            phase: if requested == 0 {
                BatchPhase::Idle
            } else {
                BatchPhase::Submitting
            },
            units: vec![UnitState::Pending; requested as usize],
        }
    }

    pub fn resolved(&self) -> u32 {
        self.succeeded + self.failed
    }

    /// Fraction of units resolved, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.resolved() as f64 / self.requested as f64
    }

    pub fn is_settled(&self) -> bool {
        self.requested > 0 && self.resolved() == self.requested
    }

    pub(crate) fn record_success(&mut self, unit: usize) {
        self.succeeded += 1;
        if let Some(state) = self.units.get_mut(unit) {
            *state = UnitState::Confirmed;
        }
        self.settle_if_done();
    }

    pub(crate) fn record_failure(&mut self, unit: usize, message: String) {
        self.failed += 1;
        self.errors.push(format!("{}. {}", unit + 1, message));
        if let Some(state) = self.units.get_mut(unit) {
            *state = UnitState::Failed(message);
        }
        self.settle_if_done();
    }

    fn settle_if_done(&mut self) {
        if self.is_settled() {
            self.phase = BatchPhase::Settled;
        }
    }

    /// Error lines, each on its own line.
    pub fn error_block(&self) -> String {
        self.errors.iter().map(|e| format!("\n{}", e)).collect()
    }
}

/// Everything needed to submit one unit of a batch.
pub struct MintUnitPlan {
    pub index: usize,
    /// Fresh keypair of the asset being minted
    pub asset: Keypair,
    /// Associated token account receiving the asset
    pub token_account: Pubkey,
    /// Signed transaction payload
    pub transaction: Transaction,
    pub strategy: BlockhashStrategy,
}
