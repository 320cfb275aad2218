// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cid::Cid;
use ethers::abi::{Abi, ParamType, Token};
use ethers::contract::Contract;
use ethers::prelude::*;
use thiserror::Error;
use tracing::info;

use super::client::SignerProvider;
use crate::aggregation::engine::CommitSubmitter;
use crate::datasegment::piece::cid_from_offer_bytes;
use crate::datasegment::{DatasegmentError, PaddedPieceSize, PieceInfo, ProofData};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("failed to send commitAggregate transaction: {0}")]
    Send(String),

    #[error("failed waiting for commitAggregate inclusion: {0}")]
    Mining(String),
}

/// Mirror of OnRamp.sol's `Offer` struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub comm_p: Vec<u8>,
    pub size: u64,
    pub location: String,
    pub amount: U256,
    pub token: Address,
}

impl Offer {
    /// The offer's payload as a piece, validating the padded size and
    /// commitment CID.
    pub fn piece(&self) -> Result<PieceInfo, DatasegmentError> {
        let size = PaddedPieceSize(self.size);
        size.validate()?;
        let cid = cid_from_offer_bytes(&self.comm_p)?;
        Ok(PieceInfo { size, cid })
    }
}

/// A decoded `DataReady` notification; `offer_id` is the contract's
/// ordinal of the offer.
#[derive(Debug, Clone)]
pub struct DataReadyEvent {
    pub offer: Offer,
    pub offer_id: u64,
}

/// Topic hash of the `DataReady` event per the loaded contract ABI.
pub fn data_ready_topic(abi: &Abi) -> Result<H256> {
    Ok(abi
        .event("DataReady")
        .context("abi has no DataReady event")?
        .signature())
}

/// Decode a raw `DataReady` log into an event, extracting the offer
/// fields directly from the ABI tokens.
pub fn parse_data_ready_log(log: &Log) -> Result<DataReadyEvent> {
    let mut tokens = ethers::abi::decode(
        &[
            ParamType::Tuple(vec![
                ParamType::Bytes,
                ParamType::Uint(64),
                ParamType::String,
                ParamType::Uint(256),
                ParamType::Address,
            ]),
            ParamType::Uint(64),
        ],
        &log.data,
    )
    .context("failed to unpack DataReady event")?;

    if tokens.len() != 2 {
        return Err(anyhow!(
            "unexpected field count for DataReady event: got {}, want 2",
            tokens.len()
        ));
    }
    let offer_id = tokens
        .pop()
        .and_then(|t| t.into_uint())
        .ok_or_else(|| anyhow!("offerID field is not a uint"))?
        .as_u64();
    let mut fields = tokens
        .pop()
        .and_then(|t| t.into_tuple())
        .ok_or_else(|| anyhow!("offer field is not a tuple"))?
        .into_iter();

    let comm_p = fields
        .next()
        .and_then(|t| t.into_bytes())
        .ok_or_else(|| anyhow!("offer.commP is not bytes"))?;
    let size = fields
        .next()
        .and_then(|t| t.into_uint())
        .ok_or_else(|| anyhow!("offer.size is not a uint"))?
        .as_u64();
    let location = fields
        .next()
        .and_then(|t| t.into_string())
        .ok_or_else(|| anyhow!("offer.location is not a string"))?;
    let amount = fields
        .next()
        .and_then(|t| t.into_uint())
        .ok_or_else(|| anyhow!("offer.amount is not a uint"))?;
    let token = fields
        .next()
        .and_then(|t| t.into_address())
        .ok_or_else(|| anyhow!("offer.token is not an address"))?;

    Ok(DataReadyEvent {
        offer: Offer {
            comm_p,
            size,
            location,
            amount,
            token,
        },
        offer_id,
    })
}

/// Bound on-ramp contract handle for transaction sending.
pub struct OnRamp {
    contract: Contract<SignerProvider>,
}

impl OnRamp {
    pub fn new(addr: Address, abi: Abi, signer: Arc<SignerProvider>) -> Self {
        Self {
            contract: Contract::new(addr, abi, signer),
        }
    }

    /// Post `commitAggregate(aggregateCommP, offerIDs, inclusionProofs,
    /// payoutAddress)` and wait for inclusion.
    pub async fn commit_aggregate(
        &self,
        agg_commp_bytes: Vec<u8>,
        offer_ids: &[u64],
        proofs: &[ProofData],
        payout: Address,
    ) -> Result<(), CommitError> {
        let ids = offer_ids
            .iter()
            .map(|id| Token::Uint(U256::from(*id)))
            .collect();
        let proof_tokens = proofs
            .iter()
            .map(|p| {
                Token::Tuple(vec![
                    Token::Array(p.path.iter().map(|n| Token::FixedBytes(n.to_vec())).collect()),
                    Token::Uint(U256::from(p.index)),
                ])
            })
            .collect();
        let args = (
            Token::Bytes(agg_commp_bytes),
            Token::Array(ids),
            Token::Array(proof_tokens),
            Token::Address(payout),
        );

        let call = self
            .contract
            .method::<_, ()>("commitAggregate", args)
            .map_err(|e| CommitError::Send(e.to_string()))?;
        let pending = call
            .send()
            .await
            .map_err(|e| CommitError::Send(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| CommitError::Mining(e.to_string()))?
            .ok_or_else(|| CommitError::Mining("transaction dropped from mempool".to_string()))?;
        info!(
            tx = %tx_hash,
            status = receipt.status.map(|s| s.as_u64()).unwrap_or_default(),
            "commitAggregate included"
        );
        Ok(())
    }

    /// Send `offerData(offer)` on behalf of a data client and wait for
    /// inclusion. Used by the client CLI, not the daemon.
    pub async fn offer_data(&self, offer: &Offer) -> Result<TransactionReceipt> {
        let arg = Token::Tuple(vec![
            Token::Bytes(offer.comm_p.clone()),
            Token::Uint(U256::from(offer.size)),
            Token::String(offer.location.clone()),
            Token::Uint(offer.amount),
            Token::Address(offer.token),
        ]);
        let call = self
            .contract
            .method::<_, ()>("offerData", arg)
            .context("failed to pack offerData params")?;
        let pending = call.send().await.context("failed to send offerData tx")?;
        pending
            .await
            .context("failed to wait for offerData tx")?
            .ok_or_else(|| anyhow!("offerData transaction dropped from mempool"))
    }
}

#[async_trait]
impl CommitSubmitter for OnRamp {
    async fn commit_aggregate(
        &self,
        agg_commp: &Cid,
        offer_ids: &[u64],
        proofs: &[ProofData],
        payout: Address,
    ) -> Result<(), CommitError> {
        OnRamp::commit_aggregate(self, agg_commp.to_bytes(), offer_ids, proofs, payout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasegment::piece::cid_from_commitment;

    fn encoded_data_ready(offer: &Offer, offer_id: u64) -> Vec<u8> {
        ethers::abi::encode(&[
            Token::Tuple(vec![
                Token::Bytes(offer.comm_p.clone()),
                Token::Uint(U256::from(offer.size)),
                Token::String(offer.location.clone()),
                Token::Uint(offer.amount),
                Token::Address(offer.token),
            ]),
            Token::Uint(U256::from(offer_id)),
        ])
    }

    fn sample_offer() -> Offer {
        Offer {
            comm_p: cid_from_commitment(&[5u8; 32]).unwrap().to_bytes(),
            size: 1024,
            location: "http://127.0.0.1:1729/get?id=3".to_string(),
            amount: U256::from(1_000_000u64),
            token: Address::repeat_byte(0xaa),
        }
    }

    #[test]
    fn parse_data_ready_round_trips() {
        let offer = sample_offer();
        let log = Log {
            data: encoded_data_ready(&offer, 42).into(),
            ..Default::default()
        };
        let event = parse_data_ready_log(&log).unwrap();
        assert_eq!(event.offer_id, 42);
        assert_eq!(event.offer, offer);
    }

    #[test]
    fn parse_rejects_truncated_data() {
        let log = Log {
            data: vec![0u8; 7].into(),
            ..Default::default()
        };
        assert!(parse_data_ready_log(&log).is_err());
    }

    #[test]
    fn offer_piece_validates_size() {
        let mut offer = sample_offer();
        offer.size = 1000;
        assert!(offer.piece().is_err());
        offer.size = 1024;
        let piece = offer.piece().unwrap();
        assert_eq!(piece.size.0, 1024);
    }

    #[test]
    fn offer_piece_rejects_bad_commp_bytes() {
        let mut offer = sample_offer();
        offer.comm_p = vec![0xde, 0xad];
        assert!(offer.piece().is_err());
    }
}
