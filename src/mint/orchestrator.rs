//! Mint orchestrator - builds, submits and confirms a batch of mints.
//!
//! A batch is `quantity` independent transactions submitted concurrently.
//! Each unit succeeds or fails on its own; the shared [`MintBatchStatus`] is
//! updated once per unit outcome and progress is republished on the status
//! channel. Only setup failures abort a batch.

use crate::chain::{AllowListProofSource, AssetResolver, TransactionSender};
use crate::eligibility::{mint_args, MintGuardInputs};
use crate::mint::errors::MintError;
use crate::mint::instructions::{compute_unit_limit_ix, mint_v2_ix, route_allow_list_proof_ix};
use crate::mint::status::{StatusChannel, StatusMessage};
use crate::mint::types::{MintBatchStatus, MintConfig, MintUnitPlan};
use crate::pdas::get_ata;
use crate::types::{GuardGroup, NftHolding, SaleState};
use futures::future::join_all;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Result of a batch that reached submission.
#[derive(Debug, Clone)]
pub struct MintBatchReport {
    pub status: MintBatchStatus,
    /// Assets minted by this batch, in completion order
    pub minted: Vec<NftHolding>,
    pub signatures: Vec<Signature>,
}

/// How a batch ended.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every unit resolved; some or all may have failed
    Settled(MintBatchReport),
    /// Setup failed before any mint was submitted
    Aborted(MintError),
}

impl BatchOutcome {
    pub fn succeeded(&self) -> u32 {
        match self {
            BatchOutcome::Settled(report) => report.status.succeeded,
            BatchOutcome::Aborted(_) => 0,
        }
    }
}

enum UnitResult {
    Minted(Signature, NftHolding),
    Failed,
}

/// Orchestrates mint batches for one wallet.
pub struct MintOrchestrator {
    config: Arc<MintConfig>,
    wallet: Arc<Keypair>,
    sender: Arc<dyn TransactionSender>,
    proofs: Arc<dyn AllowListProofSource>,
    assets: Arc<dyn AssetResolver>,
    status: StatusChannel,
    batch: Arc<Mutex<MintBatchStatus>>,
}

impl MintOrchestrator {
    pub fn new(
        config: Arc<MintConfig>,
        wallet: Arc<Keypair>,
        sender: Arc<dyn TransactionSender>,
        proofs: Arc<dyn AllowListProofSource>,
        assets: Arc<dyn AssetResolver>,
        status: StatusChannel,
    ) -> Self {
        Self {
            config,
            wallet,
            sender,
            proofs,
            assets,
            status,
            batch: Arc::new(Mutex::new(MintBatchStatus::idle())),
        }
    }

    pub fn wallet(&self) -> &Keypair {
        &self.wallet
    }

    /// Snapshot of the current (or last) batch.
    pub async fn batch_status(&self) -> MintBatchStatus {
        self.batch.lock().await.clone()
    }

    /// Run a batch and publish its outcome.
    #[instrument(skip(self, sale, group, inputs), fields(group = %group.label))]
    pub async fn execute(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        inputs: &MintGuardInputs,
        quantity: u32,
    ) -> BatchOutcome {
        match self.run_batch(sale, group, inputs, quantity).await {
            Ok(report) => {
                self.publish_summary(&report.status);
                BatchOutcome::Settled(report)
            }
            Err(err) => {
                error!("Mint batch aborted: {}", err);
                self.status
                    .publish(StatusMessage::error(format!("Failed to mint: {}", err)).auto_hide());
                BatchOutcome::Aborted(err)
            }
        }
    }

    async fn run_batch(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        inputs: &MintGuardInputs,
        quantity: u32,
    ) -> Result<MintBatchReport, MintError> {
        if quantity == 0 || quantity > self.config.max_batch_size {
            return Err(MintError::InvalidQuantity {
                requested: quantity,
                max: self.config.max_batch_size,
            });
        }

        self.register_allow_list_proof(sale, inputs).await?;

        self.status.publish(StatusMessage::info(format!(
            "Please approve the transaction to mint {} NFTs",
            quantity
        )));
        let plans = self.build_plans(sale, group, inputs, quantity).await?;

        *self.batch.lock().await = MintBatchStatus::new(quantity);
        info!("Submitting {} mint transactions", plans.len());

        let results = join_all(plans.iter().map(|plan| self.submit_unit(sale, plan))).await;

        let mut minted = Vec::new();
        let mut signatures = Vec::new();
        for result in results {
            if let UnitResult::Minted(signature, nft) = result {
                signatures.push(signature);
                minted.push(nft);
            }
        }

        let status = self.batch_status().await;
        info!(
            "Mint batch settled: {} succeeded, {} failed",
            status.succeeded, status.failed
        );
        Ok(MintBatchReport {
            status,
            minted,
            signatures,
        })
    }

    /// Store the wallet's allow-list proof on chain when it is not there yet.
    async fn register_allow_list_proof(
        &self,
        sale: &SaleState,
        inputs: &MintGuardInputs,
    ) -> Result<(), MintError> {
        let (Some(root), Some(proof)) = (&inputs.merkle_root, &inputs.merkle_proof) else {
            return Ok(());
        };
        let payer = self.wallet.pubkey();

        let exists = self
            .proofs
            .proof_exists(sale, root, &payer)
            .await
            .map_err(|e| MintError::Preflight(e.to_string()))?;
        if exists {
            debug!("Allow list proof already registered");
            return Ok(());
        }

        self.status.publish(StatusMessage::info(
            "Please approve the transaction to be able to mint in the whitelist",
        ));

        let strategy = self
            .sender
            .latest_blockhash()
            .await
            .map_err(|e| MintError::Preflight(e.to_string()))?;
        let tx = {
            let ix = route_allow_list_proof_ix(sale, &payer, &inputs.label, root, proof);
            let signers: Vec<&dyn Signer> = vec![self.wallet.as_ref()];
            Transaction::new_signed_with_payer(&[ix], Some(&payer), &signers, strategy.blockhash)
        };

        let signature = self
            .sender
            .send_transaction(&tx)
            .await
            .map_err(|e| MintError::Preflight(e.to_string()))?;
        self.sender
            .confirm_transaction(&signature, &strategy)
            .await
            .map_err(|e| MintError::Preflight(e.to_string()))?;

        info!("Allow list proof registered: {}", signature);
        Ok(())
    }

    /// One signed transaction per unit, all sharing one blockhash.
    async fn build_plans(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        inputs: &MintGuardInputs,
        quantity: u32,
    ) -> Result<Vec<MintUnitPlan>, MintError> {
        let strategy = self
            .sender
            .latest_blockhash()
            .await
            .map_err(MintError::setup)?;
        let args = mint_args(group, inputs);
        let payer = self.wallet.pubkey();

        let plans = (0..quantity as usize)
            .map(|index| {
                let asset = Keypair::new();
                let mint = asset.pubkey();
                let instructions = [
                    compute_unit_limit_ix(self.config.compute_unit_limit),
                    mint_v2_ix(sale, &payer, &mint, &inputs.label, &args),
                ];
                let signers: Vec<&dyn Signer> = vec![self.wallet.as_ref(), &asset];
                let transaction = Transaction::new_signed_with_payer(
                    &instructions,
                    Some(&payer),
                    &signers,
                    strategy.blockhash,
                );

                MintUnitPlan {
                    index,
                    token_account: get_ata(&payer, &mint),
                    asset,
                    transaction,
                    strategy,
                }
            })
            .collect();

        Ok(plans)
    }

    async fn submit_unit(&self, sale: &SaleState, plan: &MintUnitPlan) -> UnitResult {
        self.batch.lock().await.submitted += 1;
        let mint = plan.asset.pubkey();

        let outcome = async {
            let signature = self.sender.send_transaction(&plan.transaction).await?;
            debug!("Unit {} sent: {}", plan.index + 1, signature);
            self.sender
                .confirm_transaction(&signature, &plan.strategy)
                .await?;
            Ok::<_, anyhow::Error>(signature)
        }
        .await;

        match outcome {
            Ok(signature) => {
                {
                    let mut batch = self.batch.lock().await;
                    batch.record_success(plan.index);
                    self.publish_progress(&batch);
                }
                info!("Unit {} minted {}", plan.index + 1, mint);

                let nft = match self.assets.resolve_asset(&mint, &plan.token_account).await {
                    Ok(nft) => nft,
                    Err(e) => {
                        warn!("Could not resolve minted asset {}: {}", mint, e);
                        placeholder_asset(sale, mint)
                    }
                };
                UnitResult::Minted(signature, nft)
            }
            Err(e) => {
                warn!("Unit {} failed: {}", plan.index + 1, e);
                let mut batch = self.batch.lock().await;
                batch.record_failure(plan.index, e.to_string());
                self.publish_progress(&batch);
                UnitResult::Failed
            }
        }
    }

    fn publish_progress(&self, batch: &MintBatchStatus) {
        self.status.publish(
            StatusMessage::info(format!(
                "{} of {} mints succeded!{}",
                batch.succeeded,
                batch.requested,
                batch.error_block()
            ))
            .with_progress(batch.progress()),
        );
    }

    fn publish_summary(&self, batch: &MintBatchStatus) {
        if batch.succeeded > 0 {
            let failures = if batch.failed > 0 {
                format!("\nFailed mints:{}", batch.error_block())
            } else {
                String::new()
            };
            self.status.publish(
                StatusMessage::success(format!(
                    "{} of {} mints succeded! Your new NFTs shows now under My collection.{}",
                    batch.succeeded, batch.requested, failures
                ))
                .auto_hide(),
            );
        } else {
            self.status.publish(
                StatusMessage::error(format!("All mints failed!{}", batch.error_block()))
                    .auto_hide(),
            );
        }
    }
}

/// Minimal record for a confirmed asset whose metadata could not be fetched.
fn placeholder_asset(sale: &SaleState, mint: crate::types::Pubkey) -> NftHolding {
    NftHolding {
        mint,
        collection: Some(sale.collection_mint),
        collection_verified: true,
        name: String::new(),
        symbol: String::new(),
        uri: String::new(),
        image: None,
        token_standard: sale.token_standard,
    }
}
