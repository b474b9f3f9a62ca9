//! Digital Asset Standard (DAS) JSON-RPC client.
//!
//! NFT holdings and freshly minted assets are read through `getAssetsByOwner`
//! and `getAsset` and converted into [`NftHolding`] at this boundary.

use crate::chain::throttle::RequestThrottle;
use crate::types::{NftHolding, Pubkey, TokenStandard};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AssetPage {
    #[serde(default)]
    pub total: u32,
    pub items: Vec<DasAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DasAsset {
    pub id: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub content: Option<DasContent>,
    #[serde(default)]
    pub grouping: Vec<DasGrouping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DasContent {
    #[serde(default)]
    pub json_uri: String,
    #[serde(default)]
    pub metadata: DasMetadata,
    #[serde(default)]
    pub links: Option<DasLinks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DasMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DasLinks {
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DasGrouping {
    pub group_key: String,
    pub group_value: String,
    /// Absent on indexers that only report verified collections
    pub verified: Option<bool>,
}

impl DasAsset {
    fn is_fungible(&self) -> bool {
        matches!(self.interface.as_str(), "FungibleToken" | "FungibleAsset")
    }

    /// Convert into a holding; `None` for fungible assets.
    pub fn into_holding(self) -> Result<Option<NftHolding>> {
        if self.is_fungible() {
            return Ok(None);
        }
        let mint = Pubkey::from_str(&self.id).map_err(|_| anyhow!("Invalid asset id {}", self.id))?;

        let collection = self
            .grouping
            .iter()
            .find(|g| g.group_key == "collection");
        let token_standard = if self.interface == "ProgrammableNFT" {
            TokenStandard::ProgrammableNonFungible
        } else {
            TokenStandard::NonFungible
        };
        let content = self.content.unwrap_or_default();

        Ok(Some(NftHolding {
            mint,
            collection: collection.and_then(|g| Pubkey::from_str(&g.group_value).ok()),
            collection_verified: collection.map_or(false, |g| g.verified.unwrap_or(true)),
            name: content.metadata.name,
            symbol: content.metadata.symbol,
            uri: content.json_uri,
            image: content.links.and_then(|l| l.image),
            token_standard,
        }))
    }
}

/// JSON-RPC client for a DAS-capable endpoint.
pub struct DasClient {
    http: Client,
    throttle: Arc<RequestThrottle>,
}

impl DasClient {
    pub fn new(http: Client, throttle: Arc<RequestThrottle>) -> Self {
        Self { http, throttle }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<T> {
        self.throttle.acquire().await;
        let body = json!({
            "jsonrpc": "2.0",
            "id": "candy-mint",
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Malformed {} response", method))?;

        if let Some(error) = response.error {
            return Err(anyhow!("{} returned an error: {}", method, error));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{} returned no result", method))
    }

    /// Every non-fungible asset owned by `owner`, following pagination.
    #[instrument(skip(self))]
    pub async fn assets_by_owner(&self, endpoint: &str, owner: &Pubkey) -> Result<Vec<NftHolding>> {
        let mut holdings = Vec::new();
        let mut page = 1;
        loop {
            let result: AssetPage = self
                .call(
                    endpoint,
                    "getAssetsByOwner",
                    json!({
                        "ownerAddress": owner.to_string(),
                        "page": page,
                        "limit": PAGE_LIMIT,
                    }),
                )
                .await?;
            let count = result.items.len();
            for asset in result.items {
                let id = asset.id.clone();
                match asset.into_holding() {
                    Ok(Some(holding)) => holdings.push(holding),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping asset {}: {}", id, e),
                }
            }
            if count < PAGE_LIMIT as usize {
                break;
            }
            page += 1;
        }
        debug!("Wallet holds {} non-fungible assets", holdings.len());
        Ok(holdings)
    }

    #[instrument(skip(self))]
    pub async fn asset(&self, endpoint: &str, mint: &Pubkey) -> Result<NftHolding> {
        let asset: DasAsset = self
            .call(endpoint, "getAsset", json!({ "id": mint.to_string() }))
            .await?;
        asset
            .into_holding()?
            .ok_or_else(|| anyhow!("Asset {} is fungible", mint))
    }
}
