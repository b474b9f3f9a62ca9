//! Instruction and transaction construction for minting and transfers.
//!
//! Candy guard instructions are built by hand: an Anchor discriminator, the
//! borsh-encoded arguments, the fixed account list and the remaining accounts
//! each active guard expects in guard-set order.

use crate::eligibility::{GuardMintArgs, MerkleNode, NftMintArg};
use crate::pdas::{
    allow_list_proof_pda, candy_machine_authority_pda, collection_delegate_record_pda,
    freeze_escrow_pda, get_ata, master_edition_pda, metadata_pda, mint_counter_pda,
    token_record_for, ATA_PROGRAM_ID, CANDY_GUARD_PROGRAM_ID, CANDY_MACHINE_PROGRAM_ID,
    METADATA_PROGRAM_ID, SPL_TOKEN_ID, SYSTEM_PROGRAM_ID, SYSVAR_INSTRUCTIONS_ID,
    SYSVAR_SLOT_HASHES_ID,
};
use crate::types::{Pubkey, SaleState};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};

/// Label of the implicit group used when a guard has no groups.
pub const DEFAULT_GROUP_LABEL: &str = "default";

/// Index of the allow-list guard in the guard set, used by `route`.
const ALLOW_LIST_GUARD_INDEX: u8 = 8;

/// Route path registering an allow-list proof.
const ALLOW_LIST_PROOF_PATH: u8 = 0;

/// SPL token `TransferChecked` instruction tag.
pub(crate) const TRANSFER_CHECKED_TAG: u8 = 12;

/// Associated token account `CreateIdempotent` instruction tag.
const CREATE_IDEMPOTENT_TAG: u8 = 1;

/// Anchor instruction discriminator: first 8 bytes of SHA-256("global:<name>")
pub(crate) fn sighash(name: &str) -> Vec<u8> {
    let hash = solana_sdk::hash::hash(format!("global:{}", name).as_bytes());
    hash.to_bytes()[..8].to_vec()
}

fn put_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(bytes);
}

/// Borsh `Option<String>` of the group label; the default group has none.
fn put_group(data: &mut Vec<u8>, label: &str) {
    if label == DEFAULT_GROUP_LABEL {
        data.push(0);
    } else {
        data.push(1);
        put_bytes(data, label.as_bytes());
    }
}

/// Optional Anchor accounts are passed as the program id when absent.
fn optional(key: Option<Pubkey>, writable: bool) -> AccountMeta {
    match key {
        Some(key) if writable => AccountMeta::new(key, false),
        Some(key) => AccountMeta::new_readonly(key, false),
        None => AccountMeta::new_readonly(CANDY_GUARD_PROGRAM_ID, false),
    }
}

pub fn compute_unit_limit_ix(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

/// Remaining accounts for every active guard, in guard-set order.
pub fn guard_remaining_accounts(
    sale: &SaleState,
    payer: &Pubkey,
    nft_mint: &Pubkey,
    args: &GuardMintArgs,
) -> Vec<AccountMeta> {
    let mut accounts = Vec::new();
    let nft_token = get_ata(payer, nft_mint);

    if let Some(destination) = args.sol_payment_destination {
        accounts.push(AccountMeta::new(destination, false));
    }
    if let Some((mint, destination_ata)) = args.token_payment {
        accounts.push(AccountMeta::new(get_ata(payer, &mint), false));
        accounts.push(AccountMeta::new(destination_ata, false));
    }
    if let Some(mint) = args.token_gate_mint {
        accounts.push(AccountMeta::new_readonly(get_ata(payer, &mint), false));
    }
    if let Some(root) = args.allow_list_root {
        accounts.push(AccountMeta::new_readonly(
            allow_list_proof_pda(&root, payer, &sale.candy_guard, &sale.candy_machine),
            false,
        ));
    }
    if let Some(id) = args.mint_limit_id {
        accounts.push(AccountMeta::new(
            mint_counter_pda(id, payer, &sale.candy_guard, &sale.candy_machine),
            false,
        ));
    }
    if let Some((nft, destination)) = &args.nft_payment {
        push_nft_accounts(&mut accounts, payer, nft);
        accounts.push(AccountMeta::new_readonly(*destination, false));
        accounts.push(AccountMeta::new(get_ata(destination, &nft.mint), false));
        accounts.push(AccountMeta::new_readonly(ATA_PROGRAM_ID, false));
    }
    if let Some(nft) = &args.nft_gate {
        accounts.push(AccountMeta::new_readonly(nft_token_account(payer, nft), false));
        accounts.push(AccountMeta::new_readonly(metadata_pda(&nft.mint), false));
    }
    if let Some(nft) = &args.nft_burn {
        push_nft_accounts(&mut accounts, payer, nft);
        accounts.push(AccountMeta::new(master_edition_pda(&nft.mint), false));
        accounts.push(AccountMeta::new(metadata_pda(&nft.collection), false));
    }
    if let Some(mint) = args.token_burn_mint {
        accounts.push(AccountMeta::new(get_ata(payer, &mint), false));
        accounts.push(AccountMeta::new(mint, false));
    }
    if args.freeze_active {
        if let Some(destination) = args.sol_payment_destination {
            accounts.push(AccountMeta::new(
                freeze_escrow_pda(&destination, &sale.candy_guard, &sale.candy_machine),
                false,
            ));
            accounts.push(AccountMeta::new_readonly(nft_token, false));
        }
    }

    accounts
}

fn nft_token_account(payer: &Pubkey, nft: &NftMintArg) -> Pubkey {
    nft.token_account.unwrap_or_else(|| get_ata(payer, &nft.mint))
}

fn push_nft_accounts(accounts: &mut Vec<AccountMeta>, payer: &Pubkey, nft: &NftMintArg) {
    let token = nft_token_account(payer, nft);
    accounts.push(AccountMeta::new(token, false));
    accounts.push(AccountMeta::new(metadata_pda(&nft.mint), false));
    accounts.push(AccountMeta::new(nft.mint, false));
    if let Some(record) = token_record_for(nft.token_standard, &nft.mint, &token) {
        accounts.push(AccountMeta::new(record, false));
    }
}

/// Candy guard `mint_v2` for one asset.
pub fn mint_v2_ix(
    sale: &SaleState,
    payer: &Pubkey,
    nft_mint: &Pubkey,
    label: &str,
    args: &GuardMintArgs,
) -> Instruction {
    let authority_pda = candy_machine_authority_pda(&sale.candy_machine);
    let nft_token = get_ata(payer, nft_mint);
    let token_record = token_record_for(sale.token_standard, nft_mint, &nft_token);
    let delegate_record = collection_delegate_record_pda(
        &sale.collection_mint,
        &sale.collection_update_authority,
        &authority_pda,
    );

    let mut data = sighash("mint_v2");
    // mint_args carry no inline data; guards read their remaining accounts
    put_bytes(&mut data, &[]);
    put_group(&mut data, label);

    let mut accounts = vec![
        AccountMeta::new_readonly(sale.candy_guard, false),
        AccountMeta::new_readonly(CANDY_MACHINE_PROGRAM_ID, false),
        AccountMeta::new(sale.candy_machine, false),
        AccountMeta::new(authority_pda, false),
        AccountMeta::new(*payer, true),
        AccountMeta::new(*payer, true),
        AccountMeta::new(*nft_mint, true),
        AccountMeta::new_readonly(*payer, true),
        AccountMeta::new(metadata_pda(nft_mint), false),
        AccountMeta::new(master_edition_pda(nft_mint), false),
        AccountMeta::new(nft_token, false),
        optional(token_record, true),
        AccountMeta::new_readonly(delegate_record, false),
        AccountMeta::new_readonly(sale.collection_mint, false),
        AccountMeta::new(metadata_pda(&sale.collection_mint), false),
        AccountMeta::new_readonly(master_edition_pda(&sale.collection_mint), false),
        AccountMeta::new_readonly(sale.collection_update_authority, false),
        AccountMeta::new_readonly(METADATA_PROGRAM_ID, false),
        AccountMeta::new_readonly(SPL_TOKEN_ID, false),
        AccountMeta::new_readonly(ATA_PROGRAM_ID, false),
        AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        AccountMeta::new_readonly(SYSVAR_INSTRUCTIONS_ID, false),
        AccountMeta::new_readonly(SYSVAR_SLOT_HASHES_ID, false),
        // Authorization rules program and rules
        optional(None, false),
        optional(None, false),
    ];
    accounts.extend(guard_remaining_accounts(sale, payer, nft_mint, args));

    Instruction {
        program_id: CANDY_GUARD_PROGRAM_ID,
        accounts,
        data,
    }
}

/// Candy guard `route` call storing the wallet's allow-list proof on chain.
pub fn route_allow_list_proof_ix(
    sale: &SaleState,
    payer: &Pubkey,
    label: &str,
    merkle_root: &MerkleNode,
    merkle_proof: &[MerkleNode],
) -> Instruction {
    let mut route_data = vec![ALLOW_LIST_PROOF_PATH];
    route_data.extend_from_slice(merkle_root);
    route_data.extend_from_slice(&(merkle_proof.len() as u32).to_le_bytes());
    for node in merkle_proof {
        route_data.extend_from_slice(node);
    }

    let mut data = sighash("route");
    data.push(ALLOW_LIST_GUARD_INDEX);
    put_bytes(&mut data, &route_data);
    put_group(&mut data, label);

    let proof_pda = allow_list_proof_pda(merkle_root, payer, &sale.candy_guard, &sale.candy_machine);
    Instruction {
        program_id: CANDY_GUARD_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new_readonly(sale.candy_guard, false),
            AccountMeta::new(sale.candy_machine, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new(proof_pda, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(*payer, false),
        ],
        data,
    }
}

/// Create `owner`'s associated token account for `mint` if it does not exist.
pub fn create_ata_idempotent_ix(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    Instruction {
        program_id: ATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(get_ata(owner, mint), false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(SPL_TOKEN_ID, false),
        ],
        data: vec![CREATE_IDEMPOTENT_TAG],
    }
}

/// SPL token transfer with mint and decimals checked.
pub fn transfer_checked_ix(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Instruction {
    let mut data = vec![TRANSFER_CHECKED_TAG];
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);

    Instruction {
        program_id: SPL_TOKEN_ID,
        accounts: vec![
            AccountMeta::new(*source, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data,
    }
}
