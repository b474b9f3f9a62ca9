//! Guard condition evaluation.
//!
//! Each of the fourteen conditions is a pure function of the guard group, the
//! wallet snapshot, the sale state, "now" and the requested quantity. A
//! condition whose guard is absent always passes, except the fee reserve
//! check which is evaluated for every group.

use crate::eligibility::allow_list::AllowListTables;
use crate::types::{
    GuardGroup, NftRequirement, OwnershipSnapshot, Pubkey, SaleState, TokenRequirement,
    TOKEN_AMOUNT_DIVISOR,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound of the max-mintable search.
pub const MAX_MINT_QUANTITY: u32 = 20;

/// Kinds of guard conditions checked before minting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Group start time has passed
    StartTime,
    /// Group end time has not passed
    EndTime,
    /// Machine cap leaves room for the quantity
    MaxUnits,
    /// Balance covers price plus fee per unit
    SolPayment,
    /// Balance covers the protocol fee per unit
    SolFeeReserve,
    /// Wallet is the single allowed address
    AddressAllow,
    /// Wallet is in the Merkle allow list
    AllowList,
    /// Per-wallet counter leaves room for the quantity
    MintLimit,
    NftBurn,
    NftGate,
    NftPayment,
    TokenBurn,
    TokenGate,
    TokenPayment,
}

impl Condition {
    /// Number of condition kinds.
    pub const COUNT: usize = 14;

    /// Returns the string representation of the condition for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::StartTime => "start_time",
            Condition::EndTime => "end_time",
            Condition::MaxUnits => "max_units",
            Condition::SolPayment => "sol_payment",
            Condition::SolFeeReserve => "sol_fee_reserve",
            Condition::AddressAllow => "address_allow",
            Condition::AllowList => "allow_list",
            Condition::MintLimit => "mint_limit",
            Condition::NftBurn => "nft_burn",
            Condition::NftGate => "nft_gate",
            Condition::NftPayment => "nft_payment",
            Condition::TokenBurn => "token_burn",
            Condition::TokenGate => "token_gate",
            Condition::TokenPayment => "token_payment",
        }
    }

    /// Returns all condition kinds in evaluation order.
    pub fn all() -> [Condition; Condition::COUNT] {
        [
            Condition::StartTime,
            Condition::EndTime,
            Condition::MaxUnits,
            Condition::SolPayment,
            Condition::SolFeeReserve,
            Condition::AddressAllow,
            Condition::AllowList,
            Condition::MintLimit,
            Condition::NftBurn,
            Condition::NftGate,
            Condition::NftPayment,
            Condition::TokenBurn,
            Condition::TokenGate,
            Condition::TokenPayment,
        ]
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Outcome of every condition for one group and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    checks: [bool; Condition::COUNT],
}

impl EligibilityResult {
    /// A result with every condition passing.
    pub fn all_passing() -> Self {
        Self {
            checks: [true; Condition::COUNT],
        }
    }

    pub fn get(&self, condition: Condition) -> bool {
        self.checks[condition.index()]
    }

    pub fn set(&mut self, condition: Condition, value: bool) {
        self.checks[condition.index()] = value;
    }

    /// Aggregate eligibility: every condition holds.
    pub fn can_mint(&self) -> bool {
        self.checks.iter().all(|c| *c)
    }

    /// Conditions that do not hold, in evaluation order.
    pub fn failing(&self) -> Vec<Condition> {
        Condition::all()
            .into_iter()
            .filter(|c| !self.get(*c))
            .collect()
    }

    /// Convert to a name → outcome map.
    pub fn to_hashmap(&self) -> HashMap<String, bool> {
        Condition::all()
            .iter()
            .map(|c| (c.as_str().to_string(), self.get(*c)))
            .collect()
    }
}

/// Inputs shared by every condition for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub now: DateTime<Utc>,
    pub snapshot: &'a OwnershipSnapshot,
    pub items_minted: u64,
    /// Per-unit protocol fee in SOL
    pub mint_fee: f64,
    pub allow_lists: &'a AllowListTables,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        sale: &SaleState,
        snapshot: &'a OwnershipSnapshot,
        allow_lists: &'a AllowListTables,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            now,
            snapshot,
            items_minted: sale.items_minted,
            mint_fee: sale.mint_fee(),
            allow_lists,
        }
    }
}

/// Evaluate all fourteen conditions for `group` at quantity `q`.
pub fn evaluate(group: &GuardGroup, ctx: &EvaluationContext<'_>, q: u32) -> EligibilityResult {
    let mut result = EligibilityResult::all_passing();
    let snapshot = ctx.snapshot;
    let qf = q as f64;

    result.set(
        Condition::StartTime,
        group.start_time.map_or(true, |start| start <= ctx.now),
    );
    result.set(
        Condition::EndTime,
        group.end_time.map_or(true, |end| ctx.now < end),
    );
    result.set(
        Condition::MaxUnits,
        group
            .max_units
            .map_or(true, |cap| ctx.items_minted + q as u64 <= cap),
    );
    result.set(
        Condition::SolPayment,
        group.sol_payment.as_ref().map_or(true, |payment| {
            snapshot.sol_balance > qf * (payment.price + ctx.mint_fee)
        }),
    );
    result.set(
        Condition::SolFeeReserve,
        snapshot.sol_balance > qf * ctx.mint_fee,
    );
    result.set(
        Condition::AddressAllow,
        group
            .address_allow
            .map_or(true, |allowed| allowed == snapshot.address),
    );
    result.set(
        Condition::AllowList,
        group.allow_list.as_ref().map_or(true, |list| {
            ctx.allow_lists.is_member(&list.merkle_root, &snapshot.address)
        }),
    );
    result.set(
        Condition::MintLimit,
        group.mint_limit.as_ref().map_or(true, |limit| {
            limit.minted.unwrap_or(0) as u64 + q as u64 <= limit.limit as u64
        }),
    );
    result.set(
        Condition::NftBurn,
        holds_collection(group.nft_burn.as_ref(), snapshot, q),
    );
    result.set(
        Condition::NftGate,
        holds_collection(group.nft_gate.as_ref(), snapshot, 1),
    );
    result.set(
        Condition::NftPayment,
        holds_collection(
            group
                .nft_payment
                .as_ref()
                .map(|p| NftRequirement {
                    collection: p.collection,
                })
                .as_ref(),
            snapshot,
            q,
        ),
    );
    result.set(
        Condition::TokenBurn,
        holds_tokens(group.token_burn.as_ref(), snapshot, q),
    );
    result.set(
        Condition::TokenGate,
        holds_tokens(group.token_gate.as_ref(), snapshot, 1),
    );
    result.set(
        Condition::TokenPayment,
        group.token_payment.as_ref().map_or(true, |payment| {
            holds_amount(snapshot, &payment.mint, payment.amount, q)
        }),
    );

    result
}

/// Largest quantity in `1..=MAX_MINT_QUANTITY` with aggregate eligibility, 0 if none.
pub fn max_mintable(group: &GuardGroup, ctx: &EvaluationContext<'_>) -> u32 {
    let mut max = 0;
    while max < MAX_MINT_QUANTITY {
        if !evaluate(group, ctx, max + 1).can_mint() {
            break;
        }
        max += 1;
    }
    max
}

fn holds_collection(
    requirement: Option<&NftRequirement>,
    snapshot: &OwnershipSnapshot,
    q: u32,
) -> bool {
    requirement.map_or(true, |req| {
        snapshot.verified_count(&req.collection) >= q as usize
    })
}

fn holds_tokens(requirement: Option<&TokenRequirement>, snapshot: &OwnershipSnapshot, q: u32) -> bool {
    requirement.map_or(true, |req| holds_amount(snapshot, &req.mint, req.amount, q))
}

fn holds_amount(snapshot: &OwnershipSnapshot, mint: &Pubkey, amount: u64, q: u32) -> bool {
    let required = q as f64 * amount as f64 / TOKEN_AMOUNT_DIVISOR;
    snapshot
        .fungible_holdings
        .iter()
        .any(|holding| holding.mint == *mint && holding.amount >= required)
}
