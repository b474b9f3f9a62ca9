//! Eligibility engine - guard evaluation for a connected wallet.
//!
//! The engine is synchronous and pure: given the sale state, a wallet
//! snapshot and "now", it evaluates every guard condition per group, finds
//! the largest mintable quantity and derives the inputs a mint needs.

pub mod allow_list;
pub mod conditions;
pub mod mint_inputs;
pub mod selection;

pub use allow_list::{AllowListTable, AllowListTables, MerkleNode};
pub use conditions::{
    evaluate, max_mintable, Condition, EligibilityResult, EvaluationContext, MAX_MINT_QUANTITY,
};
pub use mint_inputs::{
    derive_mint_inputs, mint_args, GuardMintArgs, MintGuardInputs, NftMintArg, NftPaymentInput,
    ResolvedNft,
};
pub use selection::{select_current_group, select_current_index};

use crate::types::{GuardGroup, OwnershipSnapshot, SaleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Eligibility of one group for the current wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub label: String,
    /// Conditions evaluated at quantity 1
    pub eligibility: EligibilityResult,
    pub max_mintable: u32,
}

/// Guard evaluation bound to a set of allow-list tables.
#[derive(Debug, Clone, Default)]
pub struct EligibilityEngine {
    allow_lists: Arc<AllowListTables>,
}

impl EligibilityEngine {
    pub fn new(allow_lists: Arc<AllowListTables>) -> Self {
        Self { allow_lists }
    }

    pub fn allow_lists(&self) -> &AllowListTables {
        &self.allow_lists
    }

    fn context<'a>(
        &'a self,
        sale: &SaleState,
        snapshot: &'a OwnershipSnapshot,
        now: DateTime<Utc>,
    ) -> EvaluationContext<'a> {
        EvaluationContext::new(sale, snapshot, &self.allow_lists, now)
    }

    /// Evaluate every condition of `group` at quantity `q`.
    pub fn evaluate(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        snapshot: &OwnershipSnapshot,
        now: DateTime<Utc>,
        q: u32,
    ) -> EligibilityResult {
        evaluate(group, &self.context(sale, snapshot, now), q)
    }

    pub fn can_mint(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        snapshot: &OwnershipSnapshot,
        now: DateTime<Utc>,
        q: u32,
    ) -> bool {
        self.evaluate(sale, group, snapshot, now, q).can_mint()
    }

    pub fn max_mintable(
        &self,
        sale: &SaleState,
        group: &GuardGroup,
        snapshot: &OwnershipSnapshot,
        now: DateTime<Utc>,
    ) -> u32 {
        max_mintable(group, &self.context(sale, snapshot, now))
    }

    /// Per-group eligibility for every group of the sale.
    pub fn report(
        &self,
        sale: &SaleState,
        snapshot: &OwnershipSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<GroupReport> {
        let ctx = self.context(sale, snapshot, now);
        sale.groups
            .iter()
            .map(|group| GroupReport {
                label: group.label.clone(),
                eligibility: evaluate(group, &ctx, 1),
                max_mintable: max_mintable(group, &ctx),
            })
            .collect()
    }

    pub fn mint_inputs(
        &self,
        group: &GuardGroup,
        snapshot: Option<&OwnershipSnapshot>,
    ) -> Option<MintGuardInputs> {
        derive_mint_inputs(group, snapshot, &self.allow_lists)
    }
}
