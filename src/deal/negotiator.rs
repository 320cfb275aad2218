// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cid::Cid;
use ethers::types::{Address as EthAddress, U256};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use libp2p_stream::OpenStreamError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::host::DealHost;
use crate::aggregation::engine::DealProposer;
use super::types::{
    ClientDealProposal, DealParams, DealProposal, DealResponse, HttpRequest, Signature, Transfer,
};
use super::wire;
use crate::constants::{
    DEAL_DELAY_EPOCHS, DEAL_DURATION_EPOCHS, DEAL_PROTOCOL_V120, ETHEREUM_ADDRESS_MANAGER_ACTOR_ID,
};
use crate::filaddr::FilAddress;
use crate::lotus::{LotusClient, MinerInfo};

#[derive(Debug, Error)]
pub enum DealError {
    #[error("failed to connect to peer {peer}: {reason}")]
    Connect { peer: PeerId, reason: String },

    #[error("cannot make a deal with storage provider {peer} because it does not support protocol version 1.2.0")]
    ProtocolUnsupported { peer: PeerId },

    #[error("storage-network rpc: {0}")]
    Rpc(String),

    #[error("send proposal rpc: {0}")]
    Stream(String),

    #[error("deal proposal rejected: {0}")]
    Rejected(String),

    #[error("deal rpc cancelled")]
    Cancelled,
}

/// Resolve the provider's libp2p dial info from its on-chain miner info.
pub fn miner_peer_info(provider: &str, info: &MinerInfo) -> Result<(PeerId, Vec<Multiaddr>)> {
    let peer_id = info
        .peer_id
        .as_deref()
        .ok_or_else(|| anyhow!("sp has no peer id set on chain"))?
        .parse::<PeerId>()
        .context("invalid peer id in miner info")?;

    let mut maddrs = Vec::new();
    for encoded in info.multiaddrs.iter().flatten() {
        let bytes = BASE64.decode(encoded).with_context(|| {
            format!("storage provider {provider} had invalid multiaddrs in their info")
        })?;
        let addr = Multiaddr::try_from(bytes).with_context(|| {
            format!("storage provider {provider} had invalid multiaddrs in their info")
        })?;
        maddrs.push(addr);
    }
    if maddrs.is_empty() {
        return Err(anyhow!(
            "storage provider {provider} has no multiaddrs set on-chain"
        ));
    }
    Ok((peer_id, maddrs))
}

/// Proposes storage deals for committed aggregates to the configured
/// storage provider over the deal protocol. The deal client is the prover
/// contract, so the proposal carries a placeholder signature.
pub struct DealNegotiator {
    host: DealHost,
    lotus: Arc<LotusClient>,
    provider_peer: PeerId,
    provider_maddrs: Vec<Multiaddr>,
    provider_actor: FilAddress,
    prover_addr: EthAddress,
    transfer_addr: String,
    target_deal_size: u64,
    cancel: CancellationToken,
}

impl DealNegotiator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: DealHost,
        lotus: Arc<LotusClient>,
        provider_peer: PeerId,
        provider_maddrs: Vec<Multiaddr>,
        provider_actor: FilAddress,
        prover_addr: EthAddress,
        transfer_addr: String,
        target_deal_size: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            lotus,
            provider_peer,
            provider_maddrs,
            provider_actor,
            prover_addr,
            transfer_addr,
            target_deal_size,
            cancel,
        }
    }

    /// Propose a deal for the aggregate to the storage provider and wait
    /// for its verdict.
    pub async fn send_deal(&self, agg_commp: Cid, transfer_id: u64) -> Result<(), DealError> {
        self.host
            .connect(self.provider_peer, self.provider_maddrs.clone())
            .await
            .map_err(|e| DealError::Connect {
                peer: self.provider_peer,
                reason: format!("{e:#}"),
            })?;

        // opening the stream negotiates the protocol, which doubles as
        // the version check
        let stream = self
            .host
            .open_stream(self.provider_peer, StreamProtocol::new(DEAL_PROTOCOL_V120))
            .await
            .map_err(|e| match e {
                OpenStreamError::UnsupportedProtocol(_) => DealError::ProtocolUnsupported {
                    peer: self.provider_peer,
                },
                other => DealError::Stream(other.to_string()),
            })?;

        let params = self.build_deal_params(agg_commp, transfer_id).await?;
        let response = self.do_rpc(stream, params).await?;
        if !response.accepted {
            return Err(DealError::Rejected(response.message));
        }
        Ok(())
    }

    async fn build_deal_params(
        &self,
        agg_commp: Cid,
        transfer_id: u64,
    ) -> Result<DealParams, DealError> {
        let deal_uuid = Uuid::new_v4();
        info!(commp = %agg_commp, uuid = %deal_uuid, "making deal");

        let transfer_params = HttpRequest {
            url: format!("http://{}/?id={}", self.transfer_addr, transfer_id),
        };
        let params_bytes = serde_json::to_vec(&transfer_params)
            .map_err(|e| DealError::Stream(format!("failed to marshal transfer params: {e}")))?;
        let transfer = Transfer {
            r#type: "http".to_string(),
            client_id: transfer_id.to_string(),
            params: params_bytes,
            // aggregate for transfer is not fr32 encoded
            size: self.target_deal_size - self.target_deal_size / 128,
        };

        let bounds = self
            .lotus
            .state_deal_provider_collateral_bounds(self.target_deal_size, false)
            .await
            .map_err(|e| DealError::Rpc(format!("failed to get collateral bounds: {e:#}")))?;
        let min = U256::from_dec_str(&bounds.min)
            .map_err(|e| DealError::Rpc(format!("invalid collateral bound: {e}")))?;
        // add 20% over the minimum, as the reference client does
        let provider_collateral = min * U256::from(6) / U256::from(5);

        let head = self
            .lotus
            .chain_head()
            .await
            .map_err(|e| DealError::Rpc(format!("cannot get chain head: {e:#}")))?;
        let deal_start = head.height + DEAL_DELAY_EPOCHS;
        let deal_end = deal_start + DEAL_DURATION_EPOCHS;

        let fil_client = FilAddress::new_delegated(
            ETHEREUM_ADDRESS_MANAGER_ACTOR_ID,
            self.prover_addr.as_bytes(),
        );

        let proposal = DealProposal {
            piece_cid: (&agg_commp).into(),
            piece_size: self.target_deal_size,
            verified_deal: false,
            client: fil_client.to_bytes(),
            provider: self.provider_actor.to_bytes(),
            label: String::new(),
            start_epoch: deal_start,
            end_epoch: deal_end,
            storage_price_per_epoch: "0".to_string(),
            provider_collateral: provider_collateral.to_string(),
            client_collateral: "0".to_string(),
        };

        Ok(DealParams {
            deal_uuid,
            is_offline: false,
            client_deal_proposal: ClientDealProposal {
                proposal,
                // unchecked since the client is a smart contract
                client_signature: Signature::placeholder_bls(),
            },
            deal_data_root: (&agg_commp).into(),
            transfer,
            remove_unsealed_copy: false,
            skip_ipni_announce: false,
        })
    }

    /// One request, one response. The exchange runs in its own task so
    /// cancellation interrupts a hung read.
    async fn do_rpc(
        &self,
        mut stream: libp2p::Stream,
        params: DealParams,
    ) -> Result<DealResponse, DealError> {
        let mut handle = tokio::spawn(async move {
            wire::write_cbor_frame(&mut stream, &params)
                .await
                .map_err(|e| format!("failed to send request: {e}"))?;
            wire::read_cbor_frame::<DealResponse, _>(&mut stream)
                .await
                .map_err(|e| format!("failed to read response: {e}"))
        });

        tokio::select! {
            _ = self.cancel.cancelled() => {
                handle.abort();
                Err(DealError::Cancelled)
            }
            joined = &mut handle => match joined {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(msg)) => Err(DealError::Stream(msg)),
                Err(e) => Err(DealError::Stream(format!("deal rpc task failed: {e}"))),
            },
        }
    }
}

#[async_trait]
impl DealProposer for DealNegotiator {
    async fn propose_deal(&self, agg_commp: Cid, transfer_id: u64) -> Result<(), DealError> {
        self.send_deal(agg_commp, transfer_id).await
    }
}
