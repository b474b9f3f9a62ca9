//! Guard catalog files and their resolution into [`SaleState`].
//!
//! A catalog mirrors the candy guard account: a default guard set plus
//! labelled groups, with amounts in lamports or token base units and dates
//! as unix timestamps. Resolution merges each group over the defaults and
//! converts everything into the typed guard schema.

use crate::chain::rpc::{CandyMachineHeader, RpcChain};
use crate::chain::GuardCatalogSource;
use crate::eligibility::allow_list::root_from_hex;
use crate::mint::instructions::DEFAULT_GROUP_LABEL;
use crate::types::{
    AllowListGuard, GuardGroup, MintLimit, NftPayment, NftRequirement, Pubkey, SaleState,
    SolPayment, TokenPayment, TokenRequirement, TokenStandard,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid public key in {field}: {value}")]
    InvalidPubkey { field: &'static str, value: String },

    #[error("invalid merkle root in group '{label}'")]
    InvalidMerkleRoot { label: String },

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDate {
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRedeemedAmount {
    pub maximum: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSolPayment {
    pub lamports: u64,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAddressGate {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAllowList {
    /// Hex-encoded 32-byte root
    pub merkle_root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMintLimit {
    pub id: u8,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNftRequirement {
    pub required_collection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNftPayment {
    pub required_collection: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTokenRequirement {
    pub amount: u64,
    pub mint: String,
    #[serde(default)]
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenPayment {
    pub amount: u64,
    pub mint: String,
    pub destination_ata: String,
    #[serde(default)]
    pub decimals: u8,
}

/// Guard set as stored on the candy guard account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawGuardSet {
    pub start_date: Option<RawDate>,
    pub end_date: Option<RawDate>,
    pub redeemed_amount: Option<RawRedeemedAmount>,
    pub sol_payment: Option<RawSolPayment>,
    pub freeze_sol_payment: Option<RawSolPayment>,
    pub address_gate: Option<RawAddressGate>,
    pub allow_list: Option<RawAllowList>,
    pub mint_limit: Option<RawMintLimit>,
    pub nft_burn: Option<RawNftRequirement>,
    pub nft_gate: Option<RawNftRequirement>,
    pub nft_payment: Option<RawNftPayment>,
    pub token_burn: Option<RawTokenRequirement>,
    pub token_gate: Option<RawTokenRequirement>,
    pub token_payment: Option<RawTokenPayment>,
    pub freeze_token_payment: Option<RawTokenPayment>,
}

impl RawGuardSet {
    /// This set with every guard it leaves unset taken from `defaults`.
    pub fn merged_over(&self, defaults: &RawGuardSet) -> RawGuardSet {
        fn pick<T: Clone>(own: &Option<T>, fallback: &Option<T>) -> Option<T> {
            own.clone().or_else(|| fallback.clone())
        }

        RawGuardSet {
            start_date: pick(&self.start_date, &defaults.start_date),
            end_date: pick(&self.end_date, &defaults.end_date),
            redeemed_amount: pick(&self.redeemed_amount, &defaults.redeemed_amount),
            sol_payment: pick(&self.sol_payment, &defaults.sol_payment),
            freeze_sol_payment: pick(&self.freeze_sol_payment, &defaults.freeze_sol_payment),
            address_gate: pick(&self.address_gate, &defaults.address_gate),
            allow_list: pick(&self.allow_list, &defaults.allow_list),
            mint_limit: pick(&self.mint_limit, &defaults.mint_limit),
            nft_burn: pick(&self.nft_burn, &defaults.nft_burn),
            nft_gate: pick(&self.nft_gate, &defaults.nft_gate),
            nft_payment: pick(&self.nft_payment, &defaults.nft_payment),
            token_burn: pick(&self.token_burn, &defaults.token_burn),
            token_gate: pick(&self.token_gate, &defaults.token_gate),
            token_payment: pick(&self.token_payment, &defaults.token_payment),
            freeze_token_payment: pick(
                &self.freeze_token_payment,
                &defaults.freeze_token_payment,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGroup {
    pub label: String,
    #[serde(default)]
    pub guards: RawGuardSet,
}

/// JSON catalog describing one candy machine and its guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub candy_machine: String,
    pub candy_guard: String,
    pub collection_mint: String,
    pub collection_update_authority: String,
    #[serde(default)]
    pub token_standard: TokenStandard,
    pub items_available: u64,
    #[serde(default)]
    pub items_minted: u64,
    #[serde(default)]
    pub guards: RawGuardSet,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

impl CatalogFile {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

fn pubkey(field: &'static str, value: &str) -> Result<Pubkey, CatalogError> {
    Pubkey::from_str(value).map_err(|_| CatalogError::InvalidPubkey {
        field,
        value: value.to_string(),
    })
}

fn timestamp(raw: &Option<RawDate>) -> Result<Option<DateTime<Utc>>, CatalogError> {
    raw.as_ref()
        .map(|d| DateTime::from_timestamp(d.date, 0).ok_or(CatalogError::InvalidTimestamp(d.date)))
        .transpose()
}

fn token_requirement(raw: &RawTokenRequirement) -> Result<TokenRequirement, CatalogError> {
    Ok(TokenRequirement {
        mint: pubkey("token mint", &raw.mint)?,
        decimals: raw.decimals,
        amount: raw.amount,
    })
}

fn resolve_group(
    label: &str,
    guards: &RawGuardSet,
    items_available: u64,
) -> Result<GuardGroup, CatalogError> {
    let sol = guards.sol_payment.as_ref().or(guards.freeze_sol_payment.as_ref());
    let token = guards
        .token_payment
        .as_ref()
        .or(guards.freeze_token_payment.as_ref());

    let max_units = match &guards.redeemed_amount {
        Some(redeemed) if redeemed.maximum > 0 => redeemed.maximum,
        _ => items_available,
    };

    let allow_list = match &guards.allow_list {
        Some(raw) => Some(AllowListGuard {
            merkle_root: root_from_hex(&raw.merkle_root).ok_or_else(|| {
                CatalogError::InvalidMerkleRoot {
                    label: label.to_string(),
                }
            })?,
        }),
        None => None,
    };

    Ok(GuardGroup {
        label: label.to_string(),
        start_time: timestamp(&guards.start_date)?,
        end_time: timestamp(&guards.end_date)?,
        max_units: Some(max_units),
        sol_payment: sol
            .map(|raw| -> Result<SolPayment, CatalogError> {
                Ok(SolPayment {
                    price: raw.lamports as f64 / LAMPORTS_PER_SOL,
                    destination: pubkey("sol payment destination", &raw.destination)?,
                })
            })
            .transpose()?,
        address_allow: guards
            .address_gate
            .as_ref()
            .map(|raw| pubkey("address gate", &raw.address))
            .transpose()?,
        allow_list,
        mint_limit: guards.mint_limit.as_ref().map(|raw| MintLimit {
            id: raw.id,
            limit: raw.limit,
            minted: None,
        }),
        nft_burn: guards
            .nft_burn
            .as_ref()
            .map(|raw| -> Result<NftRequirement, CatalogError> {
                Ok(NftRequirement {
                    collection: pubkey("nft burn collection", &raw.required_collection)?,
                })
            })
            .transpose()?,
        nft_gate: guards
            .nft_gate
            .as_ref()
            .map(|raw| -> Result<NftRequirement, CatalogError> {
                Ok(NftRequirement {
                    collection: pubkey("nft gate collection", &raw.required_collection)?,
                })
            })
            .transpose()?,
        nft_payment: guards
            .nft_payment
            .as_ref()
            .map(|raw| -> Result<NftPayment, CatalogError> {
                Ok(NftPayment {
                    collection: pubkey("nft payment collection", &raw.required_collection)?,
                    destination: pubkey("nft payment destination", &raw.destination)?,
                })
            })
            .transpose()?,
        token_burn: guards.token_burn.as_ref().map(token_requirement).transpose()?,
        token_gate: guards.token_gate.as_ref().map(token_requirement).transpose()?,
        token_payment: token
            .map(|raw| -> Result<TokenPayment, CatalogError> {
                Ok(TokenPayment {
                    mint: pubkey("token payment mint", &raw.mint)?,
                    decimals: raw.decimals,
                    amount: raw.amount,
                    destination_ata: pubkey("token payment destination", &raw.destination_ata)?,
                })
            })
            .transpose()?,
        freeze_active: guards.freeze_sol_payment.is_some()
            || guards.freeze_token_payment.is_some(),
    })
}

/// Resolve a catalog into the sale state the engine evaluates.
///
/// A catalog without groups yields a single "default" group built from the
/// default guards.
pub fn resolve_sale(file: &CatalogFile) -> Result<SaleState, CatalogError> {
    let groups = if file.groups.is_empty() {
        vec![resolve_group(
            DEFAULT_GROUP_LABEL,
            &file.guards,
            file.items_available,
        )?]
    } else {
        file.groups
            .iter()
            .map(|group| {
                let merged = group.guards.merged_over(&file.guards);
                resolve_group(&group.label, &merged, file.items_available)
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(SaleState {
        candy_machine: pubkey("candy machine", &file.candy_machine)?,
        candy_guard: pubkey("candy guard", &file.candy_guard)?,
        collection_mint: pubkey("collection mint", &file.collection_mint)?,
        collection_update_authority: pubkey(
            "collection update authority",
            &file.collection_update_authority,
        )?,
        token_standard: file.token_standard,
        items_available: file.items_available,
        items_minted: file.items_minted,
        groups,
    })
}

/// Catalog read from a JSON file on every fetch.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GuardCatalogSource for FileCatalog {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn fetch_sale(&self) -> Result<SaleState> {
        let file = CatalogFile::load(&self.path).await?;
        let sale = resolve_sale(&file)?;
        debug!("Loaded {} guard groups", sale.groups.len());
        Ok(sale)
    }
}

/// Apply the on-chain candy machine fields over a catalog sale.
pub fn overlay_candy_machine(sale: &mut SaleState, header: &CandyMachineHeader) {
    match header.token_standard {
        Some(standard) if standard != sale.token_standard => {
            warn!(
                "Catalog token standard {:?} differs from the candy machine ({:?})",
                sale.token_standard, standard
            );
            sale.token_standard = standard;
        }
        Some(_) => {}
        None => warn!("Candy machine uses an unsupported token standard, keeping the catalog's"),
    }
    if header.collection_mint != sale.collection_mint {
        warn!("Catalog collection mint differs from the candy machine");
        sale.collection_mint = header.collection_mint;
    }
    sale.items_minted = header.items_redeemed;
}

/// Catalog file with the token standard, collection and minted count read
/// live from the candy machine.
pub struct LiveCatalog {
    file: FileCatalog,
    chain: Arc<RpcChain>,
}

impl LiveCatalog {
    pub fn new(path: impl Into<PathBuf>, chain: Arc<RpcChain>) -> Self {
        Self {
            file: FileCatalog::new(path),
            chain,
        }
    }
}

#[async_trait]
impl GuardCatalogSource for LiveCatalog {
    async fn fetch_sale(&self) -> Result<SaleState> {
        let mut sale = self.file.fetch_sale().await?;
        match self.chain.candy_machine_header(&sale.candy_machine).await {
            Ok(header) => overlay_candy_machine(&mut sale, &header),
            Err(e) => warn!("Falling back to the catalog candy machine fields: {:#}", e),
        }
        info!("{} of {} items minted", sale.items_minted, sale.items_available);
        Ok(sale)
    }
}
