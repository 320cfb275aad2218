// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use cid::Cid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signature type tag for BLS signatures.
pub const SIG_TYPE_BLS: u8 = 2;

/// CIDs travel as their raw byte form inside deal messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CidBytes(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl From<&Cid> for CidBytes {
    fn from(cid: &Cid) -> Self {
        Self(cid.to_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signature {
    pub r#type: u8,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Signature {
    /// The placeholder client signature. Providers skip verification when
    /// the deal client is a smart contract; a real signer can be wired in
    /// here if the network re-enables it.
    pub fn placeholder_bls() -> Self {
        Self {
            r#type: SIG_TYPE_BLS,
            data: vec![0xc0, 0xff, 0xee],
        }
    }
}

/// The market deal proposal carried inside the deal params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealProposal {
    #[serde(rename = "PieceCID")]
    pub piece_cid: CidBytes,
    pub piece_size: u64,
    pub verified_deal: bool,
    /// Chain-native address bytes of the deal client.
    #[serde(with = "serde_bytes")]
    pub client: Vec<u8>,
    /// Chain-native address bytes of the storage provider actor.
    #[serde(with = "serde_bytes")]
    pub provider: Vec<u8>,
    pub label: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    /// Token amounts as decimal attoFIL strings.
    pub storage_price_per_epoch: String,
    pub provider_collateral: String,
    pub client_collateral: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientDealProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

/// HTTP transfer descriptor embedded (as JSON) in the transfer params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transfer {
    pub r#type: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(with = "serde_bytes")]
    pub params: Vec<u8>,
    /// Bytes on the wire: the aggregate payload is not fr32 encoded, so
    /// this is 127/128ths of the padded piece size.
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealParams {
    #[serde(rename = "DealUUID")]
    pub deal_uuid: Uuid,
    pub is_offline: bool,
    pub client_deal_proposal: ClientDealProposal,
    pub deal_data_root: CidBytes,
    pub transfer: Transfer,
    pub remove_unsealed_copy: bool,
    #[serde(rename = "SkipIPNIAnnounce")]
    pub skip_ipni_announce: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealResponse {
    pub accepted: bool,
    pub message: String,
}
