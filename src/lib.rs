//! candy-mint - Client-side minting for Metaplex candy machines
//!
//! This crate evaluates candy guard groups against a connected wallet,
//! submits mint batches with per-unit progress reporting, and keeps the
//! sale view fresh with a pausable refresh scheduler.

pub mod chain;
pub mod eligibility;
pub mod format;
pub mod mint;
pub mod pdas;
pub mod types;

// Re-export main types for convenience
pub use eligibility::{AllowListTables, EligibilityEngine, EligibilityResult};
pub use mint::{MintConfig, MintConfigBuilder, MintSession, StatusChannel};
pub use types::{GuardGroup, OwnershipSnapshot, SaleState};
