// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::constants::LOTUS_TIMEOUT_SECS;

/// Subset of the miner's on-chain info needed to dial its deal endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MinerInfo {
    #[serde(rename = "PeerId")]
    pub peer_id: Option<String>,
    /// Raw multiaddr bytes, base64 encoded by the RPC layer.
    #[serde(rename = "Multiaddrs")]
    pub multiaddrs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollateralBounds {
    #[serde(rename = "Min")]
    pub min: String,
    #[serde(rename = "Max")]
    pub max: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TipSet {
    #[serde(rename = "Height")]
    pub height: i64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Storage-network JSON-RPC client (v0 API over HTTP).
pub struct LotusClient {
    http: reqwest::Client,
    url: String,
}

impl LotusClient {
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOTUS_TIMEOUT_SECS))
            .build()
            .context("failed to build lotus http client")?;
        Ok(Self {
            http,
            url: canonical_rpc_url(url),
        })
    }

    pub async fn state_miner_info(&self, miner: &str) -> Result<MinerInfo> {
        self.call("Filecoin.StateMinerInfo", json!([miner, []])).await
    }

    pub async fn state_deal_provider_collateral_bounds(
        &self,
        piece_size: u64,
        verified: bool,
    ) -> Result<CollateralBounds> {
        self.call(
            "Filecoin.StateDealProviderCollateralBounds",
            json!([piece_size, verified, []]),
        )
        .await
    }

    pub async fn chain_head(&self) -> Result<TipSet> {
        self.call("Filecoin.ChainHead", json!([])).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?
            .error_for_status()
            .with_context(|| format!("{method} returned an error status"))?;
        let rpc: RpcResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("failed to decode {method} response"))?;
        if let Some(err) = rpc.error {
            return Err(anyhow!("{method} rpc error {}: {}", err.code, err.message));
        }
        rpc.result
            .ok_or_else(|| anyhow!("{method} response has no result"))
    }
}

/// The v0 API lives under `/rpc/v0`; append it unless already present.
fn canonical_rpc_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/rpc/v0") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/rpc/v0")
    }
}
