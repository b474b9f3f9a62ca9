//! Solana RPC chain adapter.
//!
//! Implements every collaborator trait against a set of RPC endpoints. Reads
//! go through a shared throttle and an exponential-backoff retry, and each
//! outcome is reported to the endpoint rotation so a failing endpoint is
//! eventually quarantined.

use crate::chain::das::DasClient;
use crate::chain::endpoints::EndpointRotation;
use crate::chain::metadata_cache::MetadataCache;
use crate::chain::throttle::RequestThrottle;
use crate::chain::{
    AllowListProofSource, AssetResolver, BlockhashStrategy, EndpointSelector, MintCounterSource,
    OwnershipSource, TransactionSender,
};
use crate::eligibility::MerkleNode;
use crate::mint::MintConfig;
use crate::pdas::{allow_list_proof_pda, mint_counter_pda, SPL_TOKEN_ID};
use crate::types::{
    NftHolding, OwnershipSnapshot, Pubkey, SaleState, TokenHolding, TokenStandard,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::{TransactionConfirmationStatus, TransactionStatus};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, info, instrument, warn};

// Candy machine account layout after the 8-byte discriminator
const TOKEN_STANDARD_OFFSET: usize = 9;
const COLLECTION_MINT_OFFSET: usize = 80;
const ITEMS_REDEEMED_OFFSET: usize = 112;

/// Token metadata `TokenStandard` discriminants stored by the candy machine.
const TOKEN_STANDARD_NON_FUNGIBLE: u8 = 0;
const TOKEN_STANDARD_PROGRAMMABLE: u8 = 4;

/// Fields of a candy machine account that override the catalog file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandyMachineHeader {
    /// `None` for standards this client does not mint
    pub token_standard: Option<TokenStandard>,
    pub collection_mint: Pubkey,
    pub items_redeemed: u64,
}

/// Chain access over Solana RPC plus a DAS-capable endpoint.
pub struct RpcChain {
    config: Arc<MintConfig>,
    rotation: Arc<EndpointRotation>,
    clients: Vec<Arc<RpcClient>>,
    das: DasClient,
    metadata: MetadataCache,
    throttle: Arc<RequestThrottle>,
}

impl RpcChain {
    pub fn new(config: Arc<MintConfig>) -> Result<Self> {
        let rotation = Arc::new(EndpointRotation::from_config(&config)?);
        let timeout = Duration::from_secs(config.rpc_timeout_seconds);
        let clients = rotation
            .endpoints()
            .map(|url| {
                Arc::new(RpcClient::new_with_timeout_and_commitment(
                    url.clone(),
                    timeout,
                    CommitmentConfig::confirmed(),
                ))
            })
            .collect();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let throttle = Arc::new(RequestThrottle::new(config.rate_limit_requests_per_second));

        info!("RPC chain using {} endpoint(s)", rotation.len());
        Ok(Self {
            das: DasClient::new(http.clone(), throttle.clone()),
            metadata: MetadataCache::new(http, config.max_cache_entries),
            config,
            rotation,
            clients,
            throttle,
        })
    }

    pub fn rotation(&self) -> &Arc<EndpointRotation> {
        &self.rotation
    }

    fn client(&self) -> Arc<RpcClient> {
        self.clients[self.rotation.current_index() % self.clients.len()].clone()
    }

    /// Run `op` against the current endpoint with throttling and retries.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.config.rpc_retry_attempts);

        let result = Retry::spawn(strategy, || {
            let request = op(self.client());
            let throttle = self.throttle.clone();
            async move {
                throttle.acquire().await;
                request.await
            }
        })
        .await;

        match &result {
            Ok(_) => self.rotation.record_success(),
            Err(_) => self.rotation.record_failure(),
        }
        result
    }

    /// Token standard, collection and minted count of the candy machine account.
    #[instrument(skip(self))]
    pub async fn candy_machine_header(&self, candy_machine: &Pubkey) -> Result<CandyMachineHeader> {
        let address = *candy_machine;
        let data = self
            .with_retry(|rpc| async move {
                rpc.get_account_data(&address)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;
        read_candy_machine_header(&data)
    }

    async fn sol_balance(&self, owner: &Pubkey) -> Result<f64> {
        let owner = *owner;
        let lamports = self
            .with_retry(|rpc| async move { rpc.get_balance(&owner).await.map_err(anyhow::Error::from) })
            .await
            .context("Failed to fetch SOL balance")?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL as f64)
    }

    async fn token_holdings(&self, owner: &Pubkey) -> Result<Vec<TokenHolding>> {
        let owner = *owner;
        let accounts = self
            .with_retry(|rpc| async move {
                rpc.get_token_accounts_by_owner(&owner, TokenAccountsFilter::ProgramId(SPL_TOKEN_ID))
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
            .context("Failed to fetch token accounts")?;

        Ok(accounts
            .iter()
            .filter_map(|keyed| parse_token_account(&keyed.pubkey, &keyed.account.data))
            .collect())
    }

    async fn nft_holdings(&self, owner: &Pubkey) -> Result<Vec<NftHolding>> {
        let endpoint = self.rotation.current();
        let result = self.das.assets_by_owner(&endpoint, owner).await;
        match &result {
            Ok(_) => self.rotation.record_success(),
            Err(_) => self.rotation.record_failure(),
        }
        result.context("Failed to fetch NFT holdings")
    }

    async fn account_exists(&self, address: Pubkey) -> Result<bool> {
        let account = self
            .with_retry(|rpc| async move {
                rpc.get_account_with_commitment(&address, CommitmentConfig::confirmed())
                    .await
                    .map(|response| response.value)
                    .map_err(anyhow::Error::from)
            })
            .await?;
        Ok(account.is_some())
    }
}

/// Token holding from a `jsonParsed` SPL token account; `None` for other encodings.
pub fn parse_token_account(address: &str, data: &UiAccountData) -> Option<TokenHolding> {
    let UiAccountData::Json(parsed) = data else {
        return None;
    };
    let info = parsed.parsed.get("info")?;
    let mint = Pubkey::from_str(info.get("mint")?.as_str()?).ok()?;
    let token_amount = info.get("tokenAmount")?;
    let decimals = token_amount.get("decimals")?.as_u64()? as u8;
    let amount = match token_amount.get("uiAmount").and_then(|v| v.as_f64()) {
        Some(amount) => amount,
        None => token_amount
            .get("uiAmountString")?
            .as_str()?
            .parse()
            .ok()?,
    };

    Some(TokenHolding {
        account: Pubkey::from_str(address).ok(),
        mint,
        decimals,
        amount,
        name: None,
        symbol: None,
    })
}

/// True once a signature reached `confirmed` or `finalized`.
pub fn is_confirmed(status: &TransactionStatus) -> bool {
    match &status.confirmation_status {
        Some(level) => matches!(
            level,
            TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized
        ),
        // Nodes without confirmation levels report rooted signatures with no count
        None => status.confirmations.is_none(),
    }
}

/// `items_redeemed` from raw candy machine account data.
pub fn read_items_redeemed(data: &[u8]) -> Result<u64> {
    let bytes = data
        .get(ITEMS_REDEEMED_OFFSET..ITEMS_REDEEMED_OFFSET + 8)
        .ok_or_else(|| anyhow!("Candy machine account too short ({} bytes)", data.len()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Catalog overrides from raw candy machine account data.
pub fn read_candy_machine_header(data: &[u8]) -> Result<CandyMachineHeader> {
    let items_redeemed = read_items_redeemed(data)?;
    let collection_bytes: [u8; 32] = data[COLLECTION_MINT_OFFSET..COLLECTION_MINT_OFFSET + 32]
        .try_into()
        .context("Invalid collection mint bytes")?;
    let token_standard = match data[TOKEN_STANDARD_OFFSET] {
        TOKEN_STANDARD_NON_FUNGIBLE => Some(TokenStandard::NonFungible),
        TOKEN_STANDARD_PROGRAMMABLE => Some(TokenStandard::ProgrammableNonFungible),
        _ => None,
    };

    Ok(CandyMachineHeader {
        token_standard,
        collection_mint: Pubkey::new_from_array(collection_bytes),
        items_redeemed,
    })
}

#[async_trait]
impl OwnershipSource for RpcChain {
    #[instrument(skip(self))]
    async fn fetch_snapshot(&self, owner: &Pubkey) -> Result<OwnershipSnapshot> {
        let (sol_balance, fungible_holdings, non_fungible_holdings) = tokio::try_join!(
            self.sol_balance(owner),
            self.token_holdings(owner),
            self.nft_holdings(owner),
        )?;
        debug!(
            "Snapshot: {:.3} SOL, {} token accounts, {} NFTs",
            sol_balance,
            fungible_holdings.len(),
            non_fungible_holdings.len()
        );
        Ok(OwnershipSnapshot {
            address: *owner,
            sol_balance,
            fungible_holdings,
            non_fungible_holdings,
        })
    }
}

#[async_trait]
impl MintCounterSource for RpcChain {
    async fn fetch_mint_counter(&self, sale: &SaleState, id: u8, wallet: &Pubkey) -> Result<u32> {
        let address = mint_counter_pda(id, wallet, &sale.candy_guard, &sale.candy_machine);
        let account = self
            .with_retry(|rpc| async move {
                rpc.get_account_with_commitment(&address, CommitmentConfig::processed())
                    .await
                    .map(|response| response.value)
                    .map_err(anyhow::Error::from)
            })
            .await
            .context("Failed to fetch mint counter")?;

        Ok(account
            .and_then(|account| account.data.first().copied())
            .map_or(0, u32::from))
    }
}

#[async_trait]
impl AllowListProofSource for RpcChain {
    async fn proof_exists(
        &self,
        sale: &SaleState,
        merkle_root: &MerkleNode,
        wallet: &Pubkey,
    ) -> Result<bool> {
        let address = allow_list_proof_pda(merkle_root, wallet, &sale.candy_guard, &sale.candy_machine);
        self.account_exists(address)
            .await
            .context("Failed to check allow-list proof")
    }
}

#[async_trait]
impl TransactionSender for RpcChain {
    async fn latest_blockhash(&self) -> Result<BlockhashStrategy> {
        let (blockhash, last_valid_block_height) = self
            .with_retry(|rpc| async move {
                rpc.get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
            .context("Failed to fetch latest blockhash")?;
        Ok(BlockhashStrategy {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        self.throttle.acquire().await;
        let signature = self
            .client()
            .send_transaction(transaction)
            .await
            .context("Failed to send transaction")?;
        debug!("Sent transaction {}", signature);
        Ok(signature)
    }

    #[instrument(skip(self, strategy))]
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        strategy: &BlockhashStrategy,
    ) -> Result<()> {
        let poll = Duration::from_millis(self.config.confirm_poll_interval_ms);
        let rpc = self.client();
        loop {
            self.throttle.acquire().await;
            let statuses = rpc.get_signature_statuses(&[*signature]).await?.value;
            if let Some(Some(status)) = statuses.first() {
                if let Some(err) = &status.err {
                    bail!("Transaction {} failed: {}", signature, err);
                }
                if is_confirmed(status) {
                    debug!("Transaction {} confirmed", signature);
                    return Ok(());
                }
            }

            let height = rpc.get_block_height().await?;
            if height > strategy.last_valid_block_height {
                bail!(
                    "Transaction {} expired at block height {}",
                    signature,
                    strategy.last_valid_block_height
                );
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl AssetResolver for RpcChain {
    #[instrument(skip(self))]
    async fn resolve_asset(&self, mint: &Pubkey, token_account: &Pubkey) -> Result<NftHolding> {
        let endpoint = self.rotation.current();
        let mut holding = self.das.asset(&endpoint, mint).await?;
        if holding.image.is_none() {
            match self.metadata.image_for(&holding.uri).await {
                Ok(image) => holding.image = Some(image),
                Err(e) => warn!("No image for {}: {:#}", mint, e),
            }
        }
        debug!("Resolved {} held in {}", holding.name, token_account);
        Ok(holding)
    }
}

impl EndpointSelector for RpcChain {
    fn current(&self) -> String {
        self.rotation.current()
    }

    fn pick_next(&self) -> String {
        self.rotation.pick_next()
    }
}
