//! Fungible token transfer from a wallet holding to another wallet.

use crate::chain::TransactionSender;
use crate::format::explorer_tx_url;
use crate::mint::instructions::{create_ata_idempotent_ix, transfer_checked_ix};
use crate::mint::status::{StatusChannel, StatusMessage};
use crate::pdas::get_ata;
use crate::types::{Pubkey, TokenHolding};
use anyhow::{Context, Result};
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct TokenTransfer {
    network: String,
    wallet: Arc<Keypair>,
    sender: Arc<dyn TransactionSender>,
    status: StatusChannel,
}

impl TokenTransfer {
    pub fn new(
        network: impl Into<String>,
        wallet: Arc<Keypair>,
        sender: Arc<dyn TransactionSender>,
        status: StatusChannel,
    ) -> Self {
        Self {
            network: network.into(),
            wallet,
            sender,
            status,
        }
    }

    /// Send `amount` base units of `holding` to `destination`, reporting on the status channel.
    #[instrument(skip(self, holding), fields(mint = %holding.mint, destination = %destination))]
    pub async fn transfer(
        &self,
        holding: &TokenHolding,
        destination: &Pubkey,
        amount: u64,
    ) -> Result<Signature> {
        self.status
            .publish(StatusMessage::info("Please approve the transfer transaction"));

        match self.send(holding, destination, amount).await {
            Ok(signature) => {
                info!("Transfer confirmed: {}", signature);
                self.status.publish(
                    StatusMessage::success("Transfer completed")
                        .with_link(explorer_tx_url(&signature, &self.network))
                        .auto_hide(),
                );
                Ok(signature)
            }
            Err(e) => {
                self.status.publish(
                    StatusMessage::error(format!("Could not transfer the tokens. Error: {}", e))
                        .auto_hide(),
                );
                Err(e)
            }
        }
    }

    async fn send(&self, holding: &TokenHolding, destination: &Pubkey, amount: u64) -> Result<Signature> {
        let owner = self.wallet.pubkey();
        let source = holding
            .account
            .unwrap_or_else(|| get_ata(&owner, &holding.mint));
        let strategy = self.sender.latest_blockhash().await?;

        let transaction = {
            let instructions = [
                create_ata_idempotent_ix(&owner, destination, &holding.mint),
                transfer_checked_ix(
                    &source,
                    &holding.mint,
                    &get_ata(destination, &holding.mint),
                    &owner,
                    amount,
                    holding.decimals,
                ),
            ];
            let signers: Vec<&dyn Signer> = vec![self.wallet.as_ref()];
            Transaction::new_signed_with_payer(&instructions, Some(&owner), &signers, strategy.blockhash)
        };

        let signature = self
            .sender
            .send_transaction(&transaction)
            .await
            .context("Failed to send transfer")?;
        self.sender
            .confirm_transaction(&signature, &strategy)
            .await?;
        Ok(signature)
    }
}
