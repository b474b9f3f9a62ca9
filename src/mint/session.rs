//! Mint session - the consistent view a wallet mints against.
//!
//! A session owns the refresh cycle: each refresh loads the sale state, the
//! wallet snapshot and the mint counters, then swaps the new [`SessionView`]
//! in as a whole. Evaluation and minting read one view per call.

use crate::chain::{
    AllowListProofSource, AssetResolver, EndpointSelector, GuardCatalogSource, MintCounterSource,
    OwnershipSource, TransactionSender,
};
use crate::eligibility::{
    select_current_group, AllowListTables, EligibilityEngine, EligibilityResult, GroupReport,
};
use crate::mint::errors::MintError;
use crate::mint::orchestrator::{BatchOutcome, MintOrchestrator};
use crate::mint::scheduler::{RefreshGate, RefreshScheduler, RefreshTarget, SchedulerHandle};
use crate::mint::status::{StatusChannel, StatusMessage};
use crate::mint::transfer::TokenTransfer;
use crate::mint::types::{MintBatchStatus, MintConfig};
use crate::types::{GuardGroup, NftHolding, OwnershipSnapshot, Pubkey, SaleState, TokenHolding};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Collaborators a session reads from and writes to.
#[derive(Clone)]
pub struct SessionSources {
    pub catalog: Arc<dyn GuardCatalogSource>,
    pub ownership: Arc<dyn OwnershipSource>,
    pub counters: Arc<dyn MintCounterSource>,
    pub proofs: Arc<dyn AllowListProofSource>,
    pub sender: Arc<dyn TransactionSender>,
    pub assets: Arc<dyn AssetResolver>,
    pub endpoints: Arc<dyn EndpointSelector>,
}

impl SessionSources {
    /// Use one chain adapter for everything but the catalog.
    pub fn from_chain<C>(chain: Arc<C>, catalog: Arc<dyn GuardCatalogSource>) -> Self
    where
        C: OwnershipSource
            + MintCounterSource
            + AllowListProofSource
            + TransactionSender
            + AssetResolver
            + EndpointSelector
            + 'static,
    {
        Self {
            catalog,
            ownership: chain.clone(),
            counters: chain.clone(),
            proofs: chain.clone(),
            sender: chain.clone(),
            assets: chain.clone(),
            endpoints: chain,
        }
    }
}

/// Sale state and wallet snapshot loaded by one refresh.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub sale: Arc<SaleState>,
    pub snapshot: Option<Arc<OwnershipSnapshot>>,
    pub refreshed_at: DateTime<Utc>,
}

/// Resets the minting flag when a mint call returns.
struct MintingGuard<'a>(&'a AtomicBool);

impl Drop for MintingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MintSession {
    config: Arc<MintConfig>,
    engine: EligibilityEngine,
    sources: SessionSources,
    wallet: Option<Arc<Keypair>>,
    orchestrator: Option<MintOrchestrator>,
    transfers: Option<TokenTransfer>,
    status: StatusChannel,
    gate: RefreshGate,
    view: RwLock<Option<Arc<SessionView>>>,
    mint_multiplier: AtomicU32,
    /// Assets minted by this session that the snapshot may not show yet
    minted: Mutex<Vec<NftHolding>>,
    minting: AtomicBool,
    refreshing: AtomicUsize,
}

impl MintSession {
    pub fn new(
        config: MintConfig,
        sources: SessionSources,
        allow_lists: Arc<AllowListTables>,
        wallet: Option<Arc<Keypair>>,
    ) -> Self {
        let config = Arc::new(config);
        let status = StatusChannel::new(config.dismiss_delay(), config.clear_grace());

        let orchestrator = wallet.as_ref().map(|wallet| {
            MintOrchestrator::new(
                config.clone(),
                wallet.clone(),
                sources.sender.clone(),
                sources.proofs.clone(),
                sources.assets.clone(),
                status.clone(),
            )
        });
        let transfers = wallet.as_ref().map(|wallet| {
            TokenTransfer::new(
                config.network.clone(),
                wallet.clone(),
                sources.sender.clone(),
                status.clone(),
            )
        });

        Self {
            config,
            engine: EligibilityEngine::new(allow_lists),
            sources,
            wallet,
            orchestrator,
            transfers,
            status,
            gate: RefreshGate::new(),
            view: RwLock::new(None),
            mint_multiplier: AtomicU32::new(1),
            minted: Mutex::new(Vec::new()),
            minting: AtomicBool::new(false),
            refreshing: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &MintConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    pub fn wallet_address(&self) -> Option<Pubkey> {
        self.wallet.as_ref().map(|w| w.pubkey())
    }

    pub fn is_minting(&self) -> bool {
        self.minting.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub fn is_auto_refresh_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// The current view, if a refresh has completed.
    pub async fn view(&self) -> Option<Arc<SessionView>> {
        self.view.read().await.clone()
    }

    /// Start the periodic refresh task.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> SchedulerHandle {
        RefreshScheduler::spawn(self.clone(), self.config.refresh_interval(), self.gate.clone())
    }

    /// Reload sale state, snapshot and counters and swap the view in.
    ///
    /// A failure rotates the data endpoint and leaves the previous view in place.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        self.refreshing.fetch_add(1, Ordering::SeqCst);
        let loaded = self.load_view().await;
        self.refreshing.fetch_sub(1, Ordering::SeqCst);

        match loaded {
            Ok(view) => {
                if let Some(snapshot) = &view.snapshot {
                    self.minted.lock().await.retain(|extra| {
                        !snapshot
                            .non_fungible_holdings
                            .iter()
                            .any(|nft| nft.mint == extra.mint)
                    });
                }
                debug!(
                    "View refreshed: {} groups, {} of {} minted",
                    view.sale.groups.len(),
                    view.sale.items_minted,
                    view.sale.items_available
                );
                *self.view.write().await = Some(Arc::new(view));
                Ok(())
            }
            Err(e) => {
                error!("Failed to refresh mint state: {:#}", e);
                let next = self.sources.endpoints.pick_next();
                warn!("Switching data endpoint to {}", next);
                Err(e)
            }
        }
    }

    async fn load_view(&self) -> Result<SessionView> {
        let mut sale = self
            .sources
            .catalog
            .fetch_sale()
            .await
            .context("Failed to fetch sale state")?;

        let snapshot = match &self.wallet {
            Some(wallet) => {
                let owner = wallet.pubkey();
                let snapshot = self
                    .sources
                    .ownership
                    .fetch_snapshot(&owner)
                    .await
                    .context("Failed to fetch wallet holdings")?;
                self.load_mint_counters(&mut sale, &owner).await?;
                Some(Arc::new(snapshot))
            }
            None => None,
        };

        Ok(SessionView {
            sale: Arc::new(sale),
            snapshot,
            refreshed_at: Utc::now(),
        })
    }

    async fn load_mint_counters(&self, sale: &mut SaleState, owner: &Pubkey) -> Result<()> {
        let limited: Vec<(usize, u8)> = sale
            .groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.mint_limit.as_ref().map(|l| (i, l.id)))
            .collect();
        if limited.is_empty() {
            return Ok(());
        }

        let counts = {
            let sale = &*sale;
            try_join_all(limited.iter().map(|(_, id)| {
                self.sources.counters.fetch_mint_counter(sale, *id, owner)
            }))
            .await
            .context("Failed to fetch mint counters")?
        };

        for ((index, _), minted) in limited.into_iter().zip(counts) {
            if let Some(limit) = sale.groups[index].mint_limit.as_mut() {
                limit.minted = Some(minted);
            }
        }
        Ok(())
    }

    /// The group minting would use at `now`.
    pub async fn current_group(&self, now: DateTime<Utc>) -> Option<GuardGroup> {
        let view = self.view().await?;
        select_current_group(&view.sale.groups, now).cloned()
    }

    /// Eligibility of the current group at quantity `q`.
    pub async fn evaluate(&self, now: DateTime<Utc>, q: u32) -> Option<EligibilityResult> {
        let view = self.view().await?;
        let snapshot = view.snapshot.as_deref()?;
        let group = select_current_group(&view.sale.groups, now)?;
        Some(self.engine.evaluate(&view.sale, group, snapshot, now, q))
    }

    pub async fn can_mint(&self, now: DateTime<Utc>) -> bool {
        let q = self.mint_multiplier();
        self.evaluate(now, q)
            .await
            .map_or(false, |result| result.can_mint())
    }

    pub async fn max_mintable(&self, now: DateTime<Utc>) -> u32 {
        let Some(view) = self.view().await else {
            return 0;
        };
        let (Some(snapshot), Some(group)) = (
            view.snapshot.as_deref(),
            select_current_group(&view.sale.groups, now),
        ) else {
            return 0;
        };
        self.engine.max_mintable(&view.sale, group, snapshot, now)
    }

    /// Eligibility of every group for the connected wallet.
    pub async fn group_reports(&self, now: DateTime<Utc>) -> Vec<GroupReport> {
        match self.view().await {
            Some(view) => match view.snapshot.as_deref() {
                Some(snapshot) => self.engine.report(&view.sale, snapshot, now),
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    pub fn mint_multiplier(&self) -> u32 {
        self.mint_multiplier.load(Ordering::SeqCst)
    }

    /// Set the requested quantity, clamped into `[1, max_mintable]`.
    pub async fn set_mint_multiplier(&self, q: u32, now: DateTime<Utc>) -> u32 {
        let max = self.max_mintable(now).await.max(1);
        let clamped = q.clamp(1, max);
        self.mint_multiplier.store(clamped, Ordering::SeqCst);
        clamped
    }

    /// Verified NFTs of the sale's collection owned by the wallet, plus fresh mints.
    pub async fn my_collection_minted(&self) -> Vec<NftHolding> {
        let Some(view) = self.view().await else {
            return Vec::new();
        };
        let mut owned: Vec<NftHolding> = view
            .snapshot
            .as_deref()
            .map(|snapshot| {
                snapshot
                    .non_fungible_holdings
                    .iter()
                    .filter(|nft| nft.in_verified_collection(&view.sale.collection_mint))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for extra in self.minted.lock().await.iter() {
            if !owned.iter().any(|nft| nft.mint == extra.mint) {
                owned.push(extra.clone());
            }
        }
        owned
    }

    pub async fn batch_status(&self) -> Option<MintBatchStatus> {
        match &self.orchestrator {
            Some(orchestrator) => Some(orchestrator.batch_status().await),
            None => None,
        }
    }

    /// Mint the current quantity with the group open at `now`.
    ///
    /// Auto refresh is paused for the duration of the batch. The view is
    /// refreshed after the configured delay once the batch settles, or right
    /// away when setup fails. A rejected mint is reported on the status channel.
    #[instrument(skip(self))]
    pub async fn mint(&self, now: DateTime<Utc>) -> Result<BatchOutcome, MintError> {
        let outcome = match self.run_batch(now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Mint rejected: {}", e);
                self.status
                    .publish(StatusMessage::error(format!("Failed to mint: {}", e)).auto_hide());
                return Err(e);
            }
        };

        let delay = match &outcome {
            BatchOutcome::Settled(_) => self.config.resume_delay(),
            BatchOutcome::Aborted(_) => Duration::ZERO,
        };
        self.refresh_after_batch(delay).await;
        Ok(outcome)
    }

    /// Hand the post-batch refresh to the scheduler, or run it here when no
    /// scheduler is attached.
    async fn refresh_after_batch(&self, delay: Duration) {
        if self.gate.has_scheduler() {
            if delay.is_zero() {
                self.gate.resume();
            } else {
                self.gate.resume_after(delay);
            }
            return;
        }

        self.gate.resume();
        tokio::time::sleep(delay).await;
        if let Err(e) = self.refresh().await {
            warn!("Refresh after mint failed: {:#}", e);
        }
    }

    async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchOutcome, MintError> {
        let orchestrator = self
            .orchestrator
            .as_ref()
            .ok_or(MintError::WalletNotConnected)?;
        if self.minting.swap(true, Ordering::SeqCst) {
            return Err(MintError::AlreadyMinting);
        }
        let _minting = MintingGuard(&self.minting);

        let view = self.view().await.ok_or(MintError::NotReady)?;
        let snapshot = view
            .snapshot
            .as_deref()
            .ok_or(MintError::WalletNotConnected)?;
        let group =
            select_current_group(&view.sale.groups, now).ok_or(MintError::NoActiveGroup)?;
        let quantity = self.mint_multiplier();

        let eligibility = self.engine.evaluate(&view.sale, group, snapshot, now, quantity);
        if !eligibility.can_mint() {
            let failing = eligibility
                .failing()
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(MintError::NotEligible {
                label: group.label.clone(),
                quantity,
                failing,
            });
        }
        let inputs = self
            .engine
            .mint_inputs(group, Some(snapshot))
            .ok_or(MintError::WalletNotConnected)?;

        info!("Minting {} with group '{}'", quantity, group.label);
        self.gate.pause();
        let outcome = orchestrator.execute(&view.sale, group, &inputs, quantity).await;

        if let BatchOutcome::Settled(report) = &outcome {
            if report.status.succeeded > 0 {
                self.mint_multiplier.store(1, Ordering::SeqCst);
                self.minted.lock().await.extend(report.minted.iter().cloned());
            }
        }

        Ok(outcome)
    }

    /// Transfer tokens from one of the wallet's holdings, then refresh eligibility.
    pub async fn transfer_tokens(
        &self,
        holding: &TokenHolding,
        destination: &Pubkey,
        amount: u64,
    ) -> Result<Signature> {
        let transfers = self
            .transfers
            .as_ref()
            .ok_or(MintError::WalletNotConnected)?;
        let result = transfers.transfer(holding, destination, amount).await;

        if let Err(e) = self.refresh().await {
            warn!("Refresh after transfer failed: {:#}", e);
        }
        result
    }
}

#[async_trait]
impl RefreshTarget for MintSession {
    async fn refresh(&self) -> Result<()> {
        MintSession::refresh(self).await
    }
}
