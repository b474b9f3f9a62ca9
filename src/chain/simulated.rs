//! In-memory chain for demos and tests.
//!
//! Transactions are classified by their candy guard or token instruction and
//! applied to the in-memory sale and wallet when confirmed. Each submission
//! fails with the configured probability.

use crate::chain::{
    AllowListProofSource, AssetResolver, BlockhashStrategy, EndpointSelector, GuardCatalogSource,
    MintCounterSource, OwnershipSource, TransactionSender,
};
use crate::eligibility::MerkleNode;
use crate::mint::instructions::{sighash, DEFAULT_GROUP_LABEL, TRANSFER_CHECKED_TAG};
use crate::pdas::{allow_list_proof_pda, mint_counter_pda, CANDY_GUARD_PROGRAM_ID, SPL_TOKEN_ID};
use crate::types::{NftHolding, OwnershipSnapshot, Pubkey, SaleState};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Blocks a simulated blockhash stays valid for.
const BLOCKHASH_VALIDITY: u64 = 150;

/// Index of the asset mint among `mint_v2` accounts.
const MINT_V2_NFT_MINT_INDEX: usize = 6;

/// Index of the proof account among `route` accounts.
const ROUTE_PROOF_INDEX: usize = 3;

#[derive(Debug, Clone)]
enum Effect {
    Mint {
        payer: Pubkey,
        nft_mint: Pubkey,
        label: String,
        accounts: Vec<Pubkey>,
    },
    RegisterProof(Pubkey),
    Transfer {
        source: Pubkey,
        amount: u64,
        decimals: u8,
    },
    Noop,
}

#[derive(Debug)]
struct Pending {
    fails: bool,
    effect: Effect,
}

#[derive(Debug)]
struct SimState {
    sale: SaleState,
    snapshot: OwnershipSnapshot,
    counters: HashMap<Pubkey, u32>,
    proofs: HashSet<Pubkey>,
    pending: HashMap<Signature, Pending>,
    next_item: u64,
}

/// Simulated candy machine and wallet.
pub struct SimulatedChain {
    state: Mutex<SimState>,
    failure_rate: f64,
    confirm_delay: (Duration, Duration),
    block_height: AtomicU64,
    endpoint_switches: AtomicUsize,
}

impl SimulatedChain {
    pub fn new(sale: SaleState, snapshot: OwnershipSnapshot) -> Self {
        Self {
            state: Mutex::new(SimState {
                sale,
                snapshot,
                counters: HashMap::new(),
                proofs: HashSet::new(),
                pending: HashMap::new(),
                next_item: 1,
            }),
            failure_rate: 0.0,
            confirm_delay: (Duration::from_millis(200), Duration::from_millis(800)),
            block_height: AtomicU64::new(1),
            endpoint_switches: AtomicUsize::new(0),
        }
    }

    /// Probability in `[0, 1]` that a submitted transaction fails.
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_confirm_delay(mut self, min: Duration, max: Duration) -> Self {
        self.confirm_delay = (min, max.max(min));
        self
    }

    pub fn sale(&self) -> SaleState {
        self.lock().sale.clone()
    }

    pub fn snapshot(&self) -> OwnershipSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn endpoint_switches(&self) -> usize {
        self.endpoint_switches.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn random_delay(&self) -> Duration {
        let (min, max) = self.confirm_delay;
        if max <= min {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    fn classify(transaction: &Transaction) -> Effect {
        let keys = &transaction.message.account_keys;
        let key = |ix: &CompiledInstruction, i: usize| -> Option<Pubkey> {
            ix.accounts.get(i).and_then(|&k| keys.get(k as usize)).copied()
        };
        let Some(payer) = keys.first().copied() else {
            return Effect::Noop;
        };

        for ix in &transaction.message.instructions {
            let Some(program) = keys.get(ix.program_id_index as usize) else {
                continue;
            };
            if *program == CANDY_GUARD_PROGRAM_ID {
                if ix.data.starts_with(&sighash("mint_v2")) {
                    if let Some(nft_mint) = key(ix, MINT_V2_NFT_MINT_INDEX) {
                        return Effect::Mint {
                            payer,
                            nft_mint,
                            label: decode_mint_label(&ix.data),
                            accounts: ix
                                .accounts
                                .iter()
                                .filter_map(|&k| keys.get(k as usize).copied())
                                .collect(),
                        };
                    }
                }
                if ix.data.starts_with(&sighash("route")) {
                    if let Some(proof) = key(ix, ROUTE_PROOF_INDEX) {
                        return Effect::RegisterProof(proof);
                    }
                }
            }
            if *program == SPL_TOKEN_ID && ix.data.len() == 10 && ix.data[0] == TRANSFER_CHECKED_TAG {
                if let Some(source) = key(ix, 0) {
                    let mut amount = [0u8; 8];
                    amount.copy_from_slice(&ix.data[1..9]);
                    return Effect::Transfer {
                        source,
                        amount: u64::from_le_bytes(amount),
                        decimals: ix.data[9],
                    };
                }
            }
        }
        Effect::Noop
    }

    fn apply(state: &mut SimState, effect: Effect) {
        match effect {
            Effect::Mint {
                payer,
                nft_mint,
                label,
                accounts,
            } => {
                let fee = state.sale.mint_fee();
                let group = state.sale.groups.iter().find(|g| g.label == label).cloned();
                let price = group
                    .as_ref()
                    .and_then(|g| g.sol_payment.as_ref())
                    .map_or(0.0, |p| p.price);
                if let Some(limit) = group.as_ref().and_then(|g| g.mint_limit.as_ref()) {
                    let counter = mint_counter_pda(
                        limit.id,
                        &payer,
                        &state.sale.candy_guard,
                        &state.sale.candy_machine,
                    );
                    if accounts.contains(&counter) {
                        *state.counters.entry(counter).or_insert(0) += 1;
                    }
                }

                let number = state.next_item;
                state.next_item += 1;
                state.sale.items_minted += 1;
                state.snapshot.sol_balance = (state.snapshot.sol_balance - price - fee).max(0.0);
                state.snapshot.non_fungible_holdings.push(NftHolding {
                    mint: nft_mint,
                    collection: Some(state.sale.collection_mint),
                    collection_verified: true,
                    name: format!("Candy #{}", number),
                    symbol: "CNDY".to_string(),
                    uri: format!("https://example.invalid/candy/{}.json", number),
                    image: Some(format!("https://example.invalid/candy/{}.png", number)),
                    token_standard: state.sale.token_standard,
                });
            }
            Effect::RegisterProof(proof) => {
                state.proofs.insert(proof);
            }
            Effect::Transfer {
                source,
                amount,
                decimals,
            } => {
                if let Some(holding) = state
                    .snapshot
                    .fungible_holdings
                    .iter_mut()
                    .find(|h| h.account == Some(source))
                {
                    holding.amount -= amount as f64 / 10f64.powi(decimals as i32);
                }
            }
            Effect::Noop => {}
        }
    }
}

/// Group label encoded after the empty `mint_args` of a `mint_v2` call.
fn decode_mint_label(data: &[u8]) -> String {
    // discriminator (8) + empty mint_args (4) + option tag
    match data.get(12) {
        Some(1) => data
            .get(13..17)
            .and_then(|len| {
                let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
                data.get(17..17 + len)
            })
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default(),
        _ => DEFAULT_GROUP_LABEL.to_string(),
    }
}

#[async_trait]
impl GuardCatalogSource for SimulatedChain {
    async fn fetch_sale(&self) -> Result<SaleState> {
        Ok(self.sale())
    }
}

#[async_trait]
impl OwnershipSource for SimulatedChain {
    async fn fetch_snapshot(&self, owner: &Pubkey) -> Result<OwnershipSnapshot> {
        let state = self.lock();
        if state.snapshot.address == *owner {
            Ok(state.snapshot.clone())
        } else {
            Ok(OwnershipSnapshot::empty(*owner))
        }
    }
}

#[async_trait]
impl MintCounterSource for SimulatedChain {
    async fn fetch_mint_counter(&self, sale: &SaleState, id: u8, wallet: &Pubkey) -> Result<u32> {
        let counter = mint_counter_pda(id, wallet, &sale.candy_guard, &sale.candy_machine);
        Ok(self.lock().counters.get(&counter).copied().unwrap_or(0))
    }
}

#[async_trait]
impl AllowListProofSource for SimulatedChain {
    async fn proof_exists(
        &self,
        sale: &SaleState,
        merkle_root: &MerkleNode,
        wallet: &Pubkey,
    ) -> Result<bool> {
        let proof = allow_list_proof_pda(merkle_root, wallet, &sale.candy_guard, &sale.candy_machine);
        Ok(self.lock().proofs.contains(&proof))
    }
}

#[async_trait]
impl TransactionSender for SimulatedChain {
    async fn latest_blockhash(&self) -> Result<BlockhashStrategy> {
        let height = self.block_height.load(Ordering::SeqCst);
        Ok(BlockhashStrategy {
            blockhash: Hash::new_unique(),
            last_valid_block_height: height + BLOCKHASH_VALIDITY,
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let signature = transaction
            .signatures
            .first()
            .copied()
            .ok_or_else(|| anyhow!("Transaction is not signed"))?;
        let fails = rand::thread_rng().gen_range(0.0..1.0) < self.failure_rate;
        let effect = Self::classify(transaction);
        debug!("Simulated send {} ({:?})", signature, effect);

        self.lock().pending.insert(signature, Pending { fails, effect });
        Ok(signature)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        strategy: &BlockhashStrategy,
    ) -> Result<()> {
        tokio::time::sleep(self.random_delay()).await;
        let height = self.block_height.fetch_add(1, Ordering::SeqCst) + 1;
        if height > strategy.last_valid_block_height {
            bail!("Transaction {} expired", signature);
        }

        let mut state = self.lock();
        let pending = state
            .pending
            .remove(signature)
            .ok_or_else(|| anyhow!("Unknown signature {}", signature))?;
        if pending.fails {
            bail!("Simulated failure for {}", signature);
        }
        Self::apply(&mut state, pending.effect);
        Ok(())
    }
}

#[async_trait]
impl AssetResolver for SimulatedChain {
    async fn resolve_asset(&self, mint: &Pubkey, _token_account: &Pubkey) -> Result<NftHolding> {
        self.lock()
            .snapshot
            .non_fungible_holdings
            .iter()
            .find(|nft| nft.mint == *mint)
            .cloned()
            .ok_or_else(|| anyhow!("Asset {} not found", mint))
    }
}

impl EndpointSelector for SimulatedChain {
    fn current(&self) -> String {
        format!("simulated-{}", self.endpoint_switches())
    }

    fn pick_next(&self) -> String {
        let switches = self.endpoint_switches.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Simulated endpoint switch #{}", switches);
        format!("simulated-{}", switches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::GuardMintArgs;
    use crate::mint::instructions::{mint_v2_ix, route_allow_list_proof_ix};
    use crate::types::{GuardGroup, MintLimit, SolPayment, TokenStandard};
    use solana_sdk::signature::{Keypair, Signer};

    fn sale() -> SaleState {
        let mut group = GuardGroup::new("public");
        group.sol_payment = Some(SolPayment {
            price: 1.0,
            destination: Pubkey::new_unique(),
        });
        group.mint_limit = Some(MintLimit {
            id: 1,
            limit: 3,
            minted: None,
        });
        SaleState {
            candy_machine: Pubkey::new_unique(),
            candy_guard: Pubkey::new_unique(),
            collection_mint: Pubkey::new_unique(),
            collection_update_authority: Pubkey::new_unique(),
            token_standard: TokenStandard::NonFungible,
            items_available: 10,
            items_minted: 0,
            groups: vec![group],
        }
    }

    fn chain(wallet: &Keypair, failure_rate: f64) -> SimulatedChain {
        let mut snapshot = OwnershipSnapshot::empty(wallet.pubkey());
        snapshot.sol_balance = 5.0;
        SimulatedChain::new(sale(), snapshot)
            .with_failure_rate(failure_rate)
            .with_confirm_delay(Duration::from_millis(10), Duration::from_millis(20))
    }

    async fn mint_tx(chain: &SimulatedChain, wallet: &Keypair) -> (Transaction, BlockhashStrategy, Pubkey) {
        let sale = chain.sale();
        let asset = Keypair::new();
        let args = GuardMintArgs {
            sol_payment_destination: sale.groups[0].sol_payment.as_ref().map(|p| p.destination),
            mint_limit_id: Some(1),
            ..Default::default()
        };
        let ix = mint_v2_ix(&sale, &wallet.pubkey(), &asset.pubkey(), "public", &args);
        let strategy = chain.latest_blockhash().await.unwrap();
        let signers: Vec<&dyn Signer> = vec![wallet, &asset];
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&wallet.pubkey()), &signers, strategy.blockhash);
        (tx, strategy, asset.pubkey())
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_mint_updates_state() {
        let wallet = Keypair::new();
        let chain = chain(&wallet, 0.0);
        let (tx, strategy, nft_mint) = mint_tx(&chain, &wallet).await;

        let signature = chain.send_transaction(&tx).await.unwrap();
        chain.confirm_transaction(&signature, &strategy).await.unwrap();

        let sale = chain.sale();
        assert_eq!(sale.items_minted, 1);
        let snapshot = chain.fetch_snapshot(&wallet.pubkey()).await.unwrap();
        assert!((snapshot.sol_balance - (5.0 - 1.0 - sale.mint_fee())).abs() < 1e-9);
        assert!(snapshot.non_fungible_holdings.iter().any(|n| n.mint == nft_mint));
        assert_eq!(chain.fetch_mint_counter(&sale, 1, &wallet.pubkey()).await.unwrap(), 1);
        assert_eq!(
            chain.resolve_asset(&nft_mint, &Pubkey::new_unique()).await.unwrap().mint,
            nft_mint
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_mint_leaves_state() {
        let wallet = Keypair::new();
        let chain = chain(&wallet, 1.0);
        let (tx, strategy, _) = mint_tx(&chain, &wallet).await;

        let signature = chain.send_transaction(&tx).await.unwrap();
        assert!(chain.confirm_transaction(&signature, &strategy).await.is_err());
        assert_eq!(chain.sale().items_minted, 0);
        assert_eq!(chain.snapshot().sol_balance, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_registers_proof() {
        let wallet = Keypair::new();
        let chain = chain(&wallet, 0.0);
        let sale = chain.sale();
        let root = [7u8; 32];
        assert!(!chain.proof_exists(&sale, &root, &wallet.pubkey()).await.unwrap());

        let ix = route_allow_list_proof_ix(&sale, &wallet.pubkey(), "public", &root, &[[1u8; 32]]);
        let strategy = chain.latest_blockhash().await.unwrap();
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&wallet.pubkey()), &[&wallet], strategy.blockhash);
        let signature = chain.send_transaction(&tx).await.unwrap();
        chain.confirm_transaction(&signature, &strategy).await.unwrap();

        assert!(chain.proof_exists(&sale, &root, &wallet.pubkey()).await.unwrap());
    }

    #[test]
    fn test_decode_mint_label() {
        let mut data = sighash("mint_v2");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(0);
        assert_eq!(decode_mint_label(&data), "default");

        let mut data = sighash("mint_v2");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(1);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(b"OG");
        assert_eq!(decode_mint_label(&data), "OG");
    }

    #[test]
    fn test_endpoint_switches_are_counted() {
        let wallet = Keypair::new();
        let chain = chain(&wallet, 0.0);
        assert_eq!(chain.current(), "simulated-0");
        assert_eq!(chain.pick_next(), "simulated-1");
        assert_eq!(chain.endpoint_switches(), 1);
    }
}
