//! Program addresses and derived account addresses used by minting.

use crate::types::{Pubkey, TokenStandard};

// Well-known program IDs
pub const CANDY_MACHINE_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("CndyV3LdqHUfDLmE5naZjVN8rBZz4tqhdefbAnjHG3JR");
pub const CANDY_GUARD_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("Guard1JwRhJkVH6XZhzoYxeBVQe872VH6QggF4BWmS9g");
pub const METADATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");
pub const SPL_TOKEN_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
pub const SYSTEM_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("11111111111111111111111111111111");
pub const SYSVAR_INSTRUCTIONS_ID: Pubkey =
    solana_sdk::pubkey!("Sysvar1nstructions1111111111111111111111111");
pub const SYSVAR_SLOT_HASHES_ID: Pubkey =
    solana_sdk::pubkey!("SysvarS1otHashes111111111111111111111111111");

pub fn get_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[wallet.as_ref(), SPL_TOKEN_ID.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_ID,
    )
    .0
}

pub fn metadata_pda(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"metadata", METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &METADATA_PROGRAM_ID,
    )
    .0
}

pub fn master_edition_pda(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"metadata", METADATA_PROGRAM_ID.as_ref(), mint.as_ref(), b"edition"],
        &METADATA_PROGRAM_ID,
    )
    .0
}

/// Token record of a programmable NFT held in `token`.
pub fn token_record_pda(mint: &Pubkey, token: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"metadata",
            METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
            b"token_record",
            token.as_ref(),
        ],
        &METADATA_PROGRAM_ID,
    )
    .0
}

/// Token record only exists for programmable NFTs.
pub fn token_record_for(standard: TokenStandard, mint: &Pubkey, token: &Pubkey) -> Option<Pubkey> {
    match standard {
        TokenStandard::ProgrammableNonFungible => Some(token_record_pda(mint, token)),
        TokenStandard::NonFungible => None,
    }
}

/// Collection delegate record granting the machine authority over the collection.
pub fn collection_delegate_record_pda(
    collection_mint: &Pubkey,
    update_authority: &Pubkey,
    delegate: &Pubkey,
) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"metadata",
            METADATA_PROGRAM_ID.as_ref(),
            collection_mint.as_ref(),
            b"collection_delegate",
            update_authority.as_ref(),
            delegate.as_ref(),
        ],
        &METADATA_PROGRAM_ID,
    )
    .0
}

/// Mint authority PDA of a candy machine.
pub fn candy_machine_authority_pda(candy_machine: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"candy_machine", candy_machine.as_ref()],
        &CANDY_MACHINE_PROGRAM_ID,
    )
    .0
}

/// Per-wallet mint counter of the mint-limit guard.
pub fn mint_counter_pda(
    id: u8,
    user: &Pubkey,
    candy_guard: &Pubkey,
    candy_machine: &Pubkey,
) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"mint_limit",
            &[id],
            user.as_ref(),
            candy_guard.as_ref(),
            candy_machine.as_ref(),
        ],
        &CANDY_GUARD_PROGRAM_ID,
    )
    .0
}

/// Account proving a wallet's allow-list membership for `merkle_root`.
pub fn allow_list_proof_pda(
    merkle_root: &[u8; 32],
    user: &Pubkey,
    candy_guard: &Pubkey,
    candy_machine: &Pubkey,
) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"allow_list",
            merkle_root.as_ref(),
            user.as_ref(),
            candy_guard.as_ref(),
            candy_machine.as_ref(),
        ],
        &CANDY_GUARD_PROGRAM_ID,
    )
    .0
}

/// Escrow holding freeze payments until thaw.
pub fn freeze_escrow_pda(destination: &Pubkey, candy_guard: &Pubkey, candy_machine: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"freeze_escrow",
            destination.as_ref(),
            candy_guard.as_ref(),
            candy_machine.as_ref(),
        ],
        &CANDY_GUARD_PROGRAM_ID,
    )
    .0
}
