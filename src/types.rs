//! Core types and data structures for the candy-mint client.
//!
//! These are the explicit schemas every chain adapter converts into: the
//! wallet ownership snapshot, the resolved sale state and the guard groups
//! it carries. Each optional guard field on a [`GuardGroup`] is an active
//! constraint when present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use solana_sdk::pubkey::Pubkey;

/// Per-unit protocol fee for a standard NFT mint, in SOL.
pub const MINT_NFT_FEE: f64 = 0.022;

/// Per-unit protocol fee for a programmable NFT mint, in SOL.
pub const MINT_PNFT_FEE: f64 = 0.0235;

/// Base-unit divisor applied to token guard amounts.
///
/// Token requirements are compared against UI amounts after dividing by this
/// constant regardless of the token's own decimals.
pub const TOKEN_AMOUNT_DIVISOR: f64 = 1_000_000_000.0;

/// Metaplex token standard of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenStandard {
    #[default]
    NonFungible,
    ProgrammableNonFungible,
}

impl TokenStandard {
    /// Protocol fee charged per minted unit of this standard.
    pub fn mint_fee(&self) -> f64 {
        match self {
            TokenStandard::NonFungible => MINT_NFT_FEE,
            TokenStandard::ProgrammableNonFungible => MINT_PNFT_FEE,
        }
    }
}

/// A fungible token balance held by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHolding {
    /// Token account address, when known
    pub account: Option<Pubkey>,
    /// Mint of the token
    pub mint: Pubkey,
    /// Decimals of the mint
    pub decimals: u8,
    /// UI amount (already scaled by decimals)
    pub amount: f64,
    /// Optional display metadata
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// A non-fungible asset held by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftHolding {
    pub mint: Pubkey,
    /// Collection key, when the asset belongs to one
    pub collection: Option<Pubkey>,
    /// Whether the collection membership is verified
    pub collection_verified: bool,
    pub name: String,
    pub symbol: String,
    /// Off-chain metadata URI
    pub uri: String,
    /// Image URL resolved from the off-chain metadata
    pub image: Option<String>,
    pub token_standard: TokenStandard,
}

impl NftHolding {
    /// True when this asset is a verified member of `collection`.
    pub fn in_verified_collection(&self, collection: &Pubkey) -> bool {
        self.collection_verified && self.collection.as_ref() == Some(collection)
    }
}

/// Wallet holdings captured at one point in time.
///
/// Immutable once fetched; a refresh replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipSnapshot {
    pub address: Pubkey,
    /// Native balance in SOL
    pub sol_balance: f64,
    pub fungible_holdings: Vec<TokenHolding>,
    pub non_fungible_holdings: Vec<NftHolding>,
}

impl OwnershipSnapshot {
    /// An empty snapshot for `address`.
    pub fn empty(address: Pubkey) -> Self {
        Self {
            address,
            sol_balance: 0.0,
            fungible_holdings: Vec::new(),
            non_fungible_holdings: Vec::new(),
        }
    }

    /// Number of verified NFTs of `collection` held.
    pub fn verified_count(&self, collection: &Pubkey) -> usize {
        self.non_fungible_holdings
            .iter()
            .filter(|nft| nft.in_verified_collection(collection))
            .count()
    }

    /// First verified NFT of `collection`, in holding order.
    pub fn first_verified(&self, collection: &Pubkey) -> Option<&NftHolding> {
        self.non_fungible_holdings
            .iter()
            .find(|nft| nft.in_verified_collection(collection))
    }
}

/// SOL payment guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolPayment {
    /// Price per unit in SOL
    pub price: f64,
    pub destination: Pubkey,
}

/// Merkle-root allow list guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListGuard {
    pub merkle_root: [u8; 32],
}

/// Per-wallet mint limit guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintLimit {
    /// Counter identifier
    pub id: u8,
    pub limit: u32,
    /// Units already minted by the wallet, when known
    pub minted: Option<u32>,
}

/// NFT requirement keyed by collection (burn and gate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftRequirement {
    pub collection: Pubkey,
}

/// NFT payment guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftPayment {
    pub collection: Pubkey,
    pub destination: Pubkey,
}

/// Fungible token requirement (burn and gate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequirement {
    pub mint: Pubkey,
    pub decimals: u8,
    /// Required amount in base units
    pub amount: u64,
}

/// Fungible token payment guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayment {
    pub mint: Pubkey,
    pub decimals: u8,
    /// Price per unit in base units
    pub amount: u64,
    /// Associated token account receiving the payment
    pub destination_ata: Pubkey,
}

/// A labelled set of guard conditions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardGroup {
    pub label: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum number of items mintable through the machine
    pub max_units: Option<u64>,
    pub sol_payment: Option<SolPayment>,
    pub address_allow: Option<Pubkey>,
    pub allow_list: Option<AllowListGuard>,
    pub mint_limit: Option<MintLimit>,
    pub nft_burn: Option<NftRequirement>,
    pub nft_gate: Option<NftRequirement>,
    pub nft_payment: Option<NftPayment>,
    pub token_burn: Option<TokenRequirement>,
    pub token_gate: Option<TokenRequirement>,
    pub token_payment: Option<TokenPayment>,
    /// Whether payments go through a freeze escrow
    pub freeze_active: bool,
}

impl GuardGroup {
    /// An unconstrained group with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// True when the group requires wallet token accounts to be evaluated.
    pub fn needs_token_accounts(&self) -> bool {
        self.nft_burn.is_some()
            || self.nft_gate.is_some()
            || self.nft_payment.is_some()
            || self.token_burn.is_some()
            || self.token_gate.is_some()
            || self.token_payment.is_some()
    }
}

/// Resolved state of the candy machine being minted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleState {
    pub candy_machine: Pubkey,
    pub candy_guard: Pubkey,
    pub collection_mint: Pubkey,
    pub collection_update_authority: Pubkey,
    pub token_standard: TokenStandard,
    pub items_available: u64,
    pub items_minted: u64,
    /// Guard groups in catalog order
    pub groups: Vec<GuardGroup>,
}

impl SaleState {
    /// Per-unit protocol fee for this sale.
    pub fn mint_fee(&self) -> f64 {
        self.token_standard.mint_fee()
    }

    pub fn items_remaining(&self) -> u64 {
        self.items_available.saturating_sub(self.items_minted)
    }

    pub fn group(&self, label: &str) -> Option<&GuardGroup> {
        self.groups.iter().find(|g| g.label == label)
    }
}
