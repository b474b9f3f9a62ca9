//! Chain module - collaborator traits and their adapters.
//!
//! The mint session consumes the blockchain only through the traits defined
//! here. `RpcChain` implements them against a Solana RPC node plus a
//! DAS-capable endpoint; `SimulatedChain` implements them in memory.

pub mod catalog;
pub mod das;
pub mod endpoints;
pub mod metadata_cache;
pub mod rpc;
pub mod simulated;
pub mod throttle;

use crate::eligibility::MerkleNode;
use crate::types::{NftHolding, OwnershipSnapshot, Pubkey, SaleState};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

pub use catalog::{CatalogError, CatalogFile, FileCatalog, LiveCatalog};
pub use endpoints::{EndpointRotation, EndpointState};
pub use metadata_cache::MetadataCache;
pub use rpc::RpcChain;
pub use simulated::SimulatedChain;
pub use throttle::RequestThrottle;

/// Blockhash a transaction was signed with and the height it expires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockhashStrategy {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Source of wallet holdings.
#[async_trait]
pub trait OwnershipSource: Send + Sync {
    async fn fetch_snapshot(&self, owner: &Pubkey) -> Result<OwnershipSnapshot>;
}

/// Source of the sale state and its guard groups.
#[async_trait]
pub trait GuardCatalogSource: Send + Sync {
    async fn fetch_sale(&self) -> Result<SaleState>;
}

/// Source of per-wallet mint-limit counters.
#[async_trait]
pub trait MintCounterSource: Send + Sync {
    /// Units minted by `wallet` under counter `id`; 0 when the counter does not exist.
    async fn fetch_mint_counter(&self, sale: &SaleState, id: u8, wallet: &Pubkey) -> Result<u32>;
}

/// Existence check for registered allow-list proofs.
#[async_trait]
pub trait AllowListProofSource: Send + Sync {
    async fn proof_exists(
        &self,
        sale: &SaleState,
        merkle_root: &MerkleNode,
        wallet: &Pubkey,
    ) -> Result<bool>;
}

/// Submission and confirmation of signed transactions.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn latest_blockhash(&self) -> Result<BlockhashStrategy>;

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature>;

    /// Wait until `signature` is confirmed or its blockhash expires.
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        strategy: &BlockhashStrategy,
    ) -> Result<()>;
}

/// Resolution of a freshly minted asset back to its metadata.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve_asset(&self, mint: &Pubkey, token_account: &Pubkey) -> Result<NftHolding>;
}

/// Endpoint rotation consumed on data-endpoint failures.
pub trait EndpointSelector: Send + Sync {
    fn current(&self) -> String;

    /// Move to the next usable endpoint and return it.
    fn pick_next(&self) -> String;
}
