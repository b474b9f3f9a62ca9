//! Derivation of the per-mint guard inputs and mint arguments.
//!
//! Inputs resolve what the wallet will actually spend or present for a group:
//! the Merkle proof for an allow list, the token account of the NFT to burn,
//! present or pay with, and the token requirements passed through unchanged.

use crate::eligibility::allow_list::{AllowListTables, MerkleNode};
use crate::types::{
    GuardGroup, NftHolding, OwnershipSnapshot, Pubkey, TokenPayment, TokenRequirement,
    TokenStandard,
};
use serde::{Deserialize, Serialize};

/// An owned NFT resolved to the token account holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNft {
    /// Token account holding exactly one unit, when known
    pub token_account: Option<Pubkey>,
    pub nft: NftHolding,
}

impl ResolvedNft {
    pub fn mint(&self) -> Pubkey {
        self.nft.mint
    }
}

/// NFT chosen for an NFT payment, with its payment destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftPaymentInput {
    pub resolved: ResolvedNft,
    pub destination: Pubkey,
}

/// Everything the wallet presents to mint under one group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MintGuardInputs {
    pub label: String,
    pub merkle_root: Option<MerkleNode>,
    pub merkle_proof: Option<Vec<MerkleNode>>,
    pub nft_burn: Option<ResolvedNft>,
    pub nft_gate: Option<ResolvedNft>,
    pub nft_payment: Option<NftPaymentInput>,
    pub token_burn: Option<TokenRequirement>,
    pub token_gate: Option<TokenRequirement>,
    pub token_payment: Option<TokenPayment>,
}

impl MintGuardInputs {
    /// True when the allow-list proof must be registered before minting.
    pub fn has_allow_list_proof(&self) -> bool {
        self.merkle_root.is_some() && self.merkle_proof.is_some()
    }
}

/// Resolve the inputs for `group`; `None` when no wallet snapshot is available.
pub fn derive_mint_inputs(
    group: &GuardGroup,
    snapshot: Option<&OwnershipSnapshot>,
    allow_lists: &AllowListTables,
) -> Option<MintGuardInputs> {
    let snapshot = snapshot?;

    let (merkle_root, merkle_proof) = match &group.allow_list {
        Some(guard) => match allow_lists.find_by_root(&guard.merkle_root) {
            Some(table) => match table.proof(&snapshot.address) {
                Some(proof) => (Some(table.root()), Some(proof)),
                None => (None, None),
            },
            None => (None, None),
        },
        None => (None, None),
    };

    let nft_payment = group.nft_payment.as_ref().and_then(|payment| {
        resolve_nft(snapshot, &payment.collection).map(|resolved| NftPaymentInput {
            resolved,
            destination: payment.destination,
        })
    });

    Some(MintGuardInputs {
        label: group.label.clone(),
        merkle_root,
        merkle_proof,
        nft_burn: group
            .nft_burn
            .as_ref()
            .and_then(|req| resolve_nft(snapshot, &req.collection)),
        nft_gate: group
            .nft_gate
            .as_ref()
            .and_then(|req| resolve_nft(snapshot, &req.collection)),
        nft_payment,
        token_burn: group.token_burn.clone(),
        token_gate: group.token_gate.clone(),
        token_payment: group.token_payment.clone(),
    })
}

/// First verified NFT of `collection` and the token account holding exactly one of it.
pub fn resolve_nft(snapshot: &OwnershipSnapshot, collection: &Pubkey) -> Option<ResolvedNft> {
    let nft = snapshot.first_verified(collection)?;
    let holding = snapshot
        .fungible_holdings
        .iter()
        .find(|t| t.mint == nft.mint && t.amount == 1.0)?;

    Some(ResolvedNft {
        token_account: holding.account,
        nft: nft.clone(),
    })
}

/// NFT argument of the burn and payment guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftMintArg {
    pub mint: Pubkey,
    pub token_account: Option<Pubkey>,
    pub collection: Pubkey,
    pub token_standard: TokenStandard,
}

/// Per-guard arguments the mint instruction needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardMintArgs {
    pub allow_list_root: Option<MerkleNode>,
    pub mint_limit_id: Option<u8>,
    pub sol_payment_destination: Option<Pubkey>,
    pub token_burn_mint: Option<Pubkey>,
    pub token_gate_mint: Option<Pubkey>,
    /// (mint, destination ATA)
    pub token_payment: Option<(Pubkey, Pubkey)>,
    pub nft_burn: Option<NftMintArg>,
    pub nft_gate: Option<NftMintArg>,
    /// NFT payment argument with its destination wallet
    pub nft_payment: Option<(NftMintArg, Pubkey)>,
    pub freeze_active: bool,
}

fn nft_arg(resolved: &ResolvedNft, collection: Pubkey) -> NftMintArg {
    NftMintArg {
        mint: resolved.mint(),
        token_account: resolved.token_account,
        collection: resolved.nft.collection.unwrap_or(collection),
        token_standard: resolved.nft.token_standard,
    }
}

/// Combine the group guards and resolved inputs into mint arguments.
pub fn mint_args(group: &GuardGroup, inputs: &MintGuardInputs) -> GuardMintArgs {
    GuardMintArgs {
        allow_list_root: inputs.merkle_root,
        mint_limit_id: group.mint_limit.as_ref().map(|l| l.id),
        sol_payment_destination: group.sol_payment.as_ref().map(|p| p.destination),
        token_burn_mint: inputs.token_burn.as_ref().map(|t| t.mint),
        token_gate_mint: inputs.token_gate.as_ref().map(|t| t.mint),
        token_payment: inputs
            .token_payment
            .as_ref()
            .map(|t| (t.mint, t.destination_ata)),
        nft_burn: inputs.nft_burn.as_ref().zip(group.nft_burn.as_ref()).map(
            |(resolved, req)| nft_arg(resolved, req.collection),
        ),
        nft_gate: inputs.nft_gate.as_ref().zip(group.nft_gate.as_ref()).map(
            |(resolved, req)| nft_arg(resolved, req.collection),
        ),
        nft_payment: inputs
            .nft_payment
            .as_ref()
            .zip(group.nft_payment.as_ref())
            .map(|(input, payment)| {
                (nft_arg(&input.resolved, payment.collection), input.destination)
            }),
        freeze_active: group.freeze_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::allow_list::{leaf_hash, verify_proof, AllowListTable};
    use crate::types::{AllowListGuard, MintLimit, NftRequirement, TokenHolding};

    fn nft(mint: Pubkey, collection: Pubkey, verified: bool) -> NftHolding {
        NftHolding {
            mint,
            collection: Some(collection),
            collection_verified: verified,
            name: "Gate".to_string(),
            symbol: "GT".to_string(),
            uri: String::new(),
            image: None,
            token_standard: TokenStandard::NonFungible,
        }
    }

    fn token(mint: Pubkey, amount: f64) -> TokenHolding {
        TokenHolding {
            account: Some(Pubkey::new_unique()),
            mint,
            decimals: 0,
            amount,
            name: None,
            symbol: None,
        }
    }

    #[test]
    fn test_no_snapshot_no_inputs() {
        let group = GuardGroup::new("default");
        assert!(derive_mint_inputs(&group, None, &AllowListTables::default()).is_none());
    }

    #[test]
    fn test_allow_list_proof_only_for_members() {
        let member = OwnershipSnapshot::empty(Pubkey::new_unique());
        let outsider = OwnershipSnapshot::empty(Pubkey::new_unique());
        let tables = AllowListTables::new(vec![AllowListTable::new(
            "og",
            vec![member.address.to_string(), Pubkey::new_unique().to_string()],
        )]);
        let root = tables.get(0).unwrap().root();
        let mut group = GuardGroup::new("og");
        group.allow_list = Some(AllowListGuard { merkle_root: root });

        let inputs = derive_mint_inputs(&group, Some(&member), &tables).unwrap();
        assert_eq!(inputs.merkle_root, Some(root));
        let proof = inputs.merkle_proof.as_ref().unwrap();
        assert!(verify_proof(proof, &root, &leaf_hash(&member.address.to_string())));
        assert!(inputs.has_allow_list_proof());

        let inputs = derive_mint_inputs(&group, Some(&outsider), &tables).unwrap();
        assert!(inputs.merkle_root.is_none());
        assert!(inputs.merkle_proof.is_none());
    }

    #[test]
    fn test_nft_resolution_requires_single_unit_account() {
        let collection = Pubkey::new_unique();
        let unverified = Pubkey::new_unique();
        let verified = Pubkey::new_unique();
        let mut snapshot = OwnershipSnapshot::empty(Pubkey::new_unique());
        snapshot.non_fungible_holdings = vec![
            nft(unverified, collection, false),
            nft(verified, collection, true),
        ];
        snapshot.fungible_holdings = vec![token(unverified, 1.0), token(verified, 1.0)];

        let resolved = resolve_nft(&snapshot, &collection).unwrap();
        assert_eq!(resolved.mint(), verified);
        assert_eq!(resolved.token_account, snapshot.fungible_holdings[1].account);

        snapshot.fungible_holdings[1].amount = 0.0;
        assert!(resolve_nft(&snapshot, &collection).is_none());
    }

    #[test]
    fn test_mint_args_from_group_and_inputs() {
        let collection = Pubkey::new_unique();
        let gate_mint = Pubkey::new_unique();
        let mut snapshot = OwnershipSnapshot::empty(Pubkey::new_unique());
        snapshot.non_fungible_holdings = vec![nft(gate_mint, collection, true)];
        snapshot.fungible_holdings = vec![token(gate_mint, 1.0)];

        let mut group = GuardGroup::new("holders");
        group.nft_gate = Some(NftRequirement { collection });
        group.mint_limit = Some(MintLimit {
            id: 4,
            limit: 2,
            minted: None,
        });

        let inputs = derive_mint_inputs(&group, Some(&snapshot), &AllowListTables::default())
            .unwrap();
        let args = mint_args(&group, &inputs);

        assert_eq!(args.mint_limit_id, Some(4));
        let gate = args.nft_gate.unwrap();
        assert_eq!(gate.mint, gate_mint);
        assert_eq!(gate.collection, collection);
        assert_eq!(gate.token_standard, TokenStandard::NonFungible);
        assert!(args.allow_list_root.is_none());
        assert!(args.sol_payment_destination.is_none());
    }
}
