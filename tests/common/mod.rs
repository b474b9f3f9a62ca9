//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use candy_mint::chain::{
    AllowListProofSource, AssetResolver, BlockhashStrategy, EndpointSelector, GuardCatalogSource,
    MintCounterSource, OwnershipSource, TransactionSender,
};
use candy_mint::eligibility::MerkleNode;
use candy_mint::types::{
    GuardGroup, NftHolding, OwnershipSnapshot, Pubkey, SaleState, SolPayment, TokenStandard,
};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Chain whose failures are scripted per call.
pub struct ScriptedChain {
    pub sale: Mutex<SaleState>,
    pub snapshot: Mutex<OwnershipSnapshot>,
    /// Mint sends (0-based, in submission order) that are rejected
    pub failing_sends: Mutex<HashSet<usize>>,
    /// Mint sends whose confirmation fails
    pub failing_confirms: Mutex<HashSet<usize>>,
    /// Extra confirmation latency per mint send
    pub confirm_delays: Mutex<HashMap<usize, Duration>>,
    sent: Mutex<HashMap<Signature, usize>>,
    pub mint_sends: AtomicUsize,
    pub route_sends: AtomicUsize,
    pub snapshot_fetches: AtomicUsize,
    pub endpoint_picks: AtomicUsize,
    pub proof_registered: AtomicBool,
    pub fail_blockhash: AtomicBool,
    pub fail_catalog: AtomicBool,
    pub fail_route: AtomicBool,
    pub mint_counter: AtomicUsize,
}

impl ScriptedChain {
    pub fn new(sale: SaleState, snapshot: OwnershipSnapshot) -> Self {
        Self {
            sale: Mutex::new(sale),
            snapshot: Mutex::new(snapshot),
            failing_sends: Mutex::new(HashSet::new()),
            failing_confirms: Mutex::new(HashSet::new()),
            confirm_delays: Mutex::new(HashMap::new()),
            sent: Mutex::new(HashMap::new()),
            mint_sends: AtomicUsize::new(0),
            route_sends: AtomicUsize::new(0),
            snapshot_fetches: AtomicUsize::new(0),
            endpoint_picks: AtomicUsize::new(0),
            proof_registered: AtomicBool::new(false),
            fail_blockhash: AtomicBool::new(false),
            fail_catalog: AtomicBool::new(false),
            fail_route: AtomicBool::new(false),
            mint_counter: AtomicUsize::new(0),
        }
    }

    pub fn fail_sends(&self, indices: &[usize]) {
        *self.failing_sends.lock().unwrap() = indices.iter().copied().collect();
    }

    pub fn fail_confirms(&self, indices: &[usize]) {
        *self.failing_confirms.lock().unwrap() = indices.iter().copied().collect();
    }

    pub fn delay_confirm(&self, index: usize, delay: Duration) {
        self.confirm_delays.lock().unwrap().insert(index, delay);
    }

    pub fn fetches(&self) -> usize {
        self.snapshot_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuardCatalogSource for ScriptedChain {
    async fn fetch_sale(&self) -> Result<SaleState> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            bail!("catalog endpoint unavailable");
        }
        Ok(self.sale.lock().unwrap().clone())
    }
}

#[async_trait]
impl OwnershipSource for ScriptedChain {
    async fn fetch_snapshot(&self, _owner: &Pubkey) -> Result<OwnershipSnapshot> {
        self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

#[async_trait]
impl MintCounterSource for ScriptedChain {
    async fn fetch_mint_counter(&self, _sale: &SaleState, _id: u8, _wallet: &Pubkey) -> Result<u32> {
        Ok(self.mint_counter.load(Ordering::SeqCst) as u32)
    }
}

#[async_trait]
impl AllowListProofSource for ScriptedChain {
    async fn proof_exists(
        &self,
        _sale: &SaleState,
        _merkle_root: &MerkleNode,
        _wallet: &Pubkey,
    ) -> Result<bool> {
        Ok(self.proof_registered.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl TransactionSender for ScriptedChain {
    async fn latest_blockhash(&self) -> Result<BlockhashStrategy> {
        if self.fail_blockhash.load(Ordering::SeqCst) {
            bail!("blockhash unavailable");
        }
        Ok(BlockhashStrategy {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 1_000,
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let signature = transaction.signatures[0];
        // Mint transactions are co-signed by the new asset
        if transaction.signatures.len() == 1 {
            self.route_sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_route.load(Ordering::SeqCst) {
                bail!("route rejected by scripted chain");
            }
            self.proof_registered.store(true, Ordering::SeqCst);
            return Ok(signature);
        }

        let index = self.mint_sends.fetch_add(1, Ordering::SeqCst);
        if self.failing_sends.lock().unwrap().contains(&index) {
            return Err(anyhow!("rejected by scripted chain"));
        }
        self.sent.lock().unwrap().insert(signature, index);
        Ok(signature)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _strategy: &BlockhashStrategy,
    ) -> Result<()> {
        let index = self.sent.lock().unwrap().get(signature).copied();
        let Some(index) = index else {
            tokio::task::yield_now().await;
            return Ok(());
        };

        let delay = self.confirm_delays.lock().unwrap().get(&index).copied();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        if self.failing_confirms.lock().unwrap().contains(&index) {
            bail!("block height exceeded before confirmation");
        }
        Ok(())
    }
}

#[async_trait]
impl AssetResolver for ScriptedChain {
    async fn resolve_asset(&self, mint: &Pubkey, _token_account: &Pubkey) -> Result<NftHolding> {
        let sale = self.sale.lock().unwrap();
        Ok(NftHolding {
            mint: *mint,
            collection: Some(sale.collection_mint),
            collection_verified: true,
            name: "Scripted".to_string(),
            symbol: "SCR".to_string(),
            uri: String::new(),
            image: None,
            token_standard: sale.token_standard,
        })
    }
}

impl EndpointSelector for ScriptedChain {
    fn current(&self) -> String {
        format!("scripted-{}", self.endpoint_picks.load(Ordering::SeqCst))
    }

    fn pick_next(&self) -> String {
        let picks = self.endpoint_picks.fetch_add(1, Ordering::SeqCst) + 1;
        format!("scripted-{}", picks)
    }
}

pub fn sale_with(groups: Vec<GuardGroup>) -> SaleState {
    SaleState {
        candy_machine: Pubkey::new_unique(),
        candy_guard: Pubkey::new_unique(),
        collection_mint: Pubkey::new_unique(),
        collection_update_authority: Pubkey::new_unique(),
        token_standard: TokenStandard::NonFungible,
        items_available: 100,
        items_minted: 0,
        groups,
    }
}

/// An open group charging `price` SOL per unit.
pub fn paid_group(label: &str, price: f64) -> GuardGroup {
    let mut group = GuardGroup::new(label);
    group.sol_payment = Some(SolPayment {
        price,
        destination: Pubkey::new_unique(),
    });
    group
}

pub fn funded_snapshot(owner: Pubkey, sol_balance: f64) -> OwnershipSnapshot {
    let mut snapshot = OwnershipSnapshot::empty(owner);
    snapshot.sol_balance = sol_balance;
    snapshot
}

pub fn nft_of(collection: Pubkey, verified: bool) -> NftHolding {
    NftHolding {
        mint: Pubkey::new_unique(),
        collection: Some(collection),
        collection_verified: verified,
        name: "Held".to_string(),
        symbol: "HLD".to_string(),
        uri: String::new(),
        image: None,
        token_standard: TokenStandard::NonFungible,
    }
}
