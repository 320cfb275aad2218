// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use cid::multihash::Multihash;
use cid::Cid;

use super::merkle::{Node, NODE_SIZE};
use super::DatasegmentError;

/// Multicodec for an unsealed piece commitment (fil-commitment-unsealed).
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;
/// Multihash code for sha2-256-trunc254-padded.
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Size of a piece after fr32 padding.
///
/// Valid sizes are powers of two of at least 128 bytes; the padding adds
/// 1/128 overhead over the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaddedPieceSize(pub u64);

impl PaddedPieceSize {
    pub const MIN: u64 = 128;

    pub fn validate(&self) -> Result<(), DatasegmentError> {
        if self.0 < Self::MIN {
            return Err(DatasegmentError::InvalidPieceSize {
                size: self.0,
                reason: "minimum padded piece size is 128 bytes",
            });
        }
        if !self.0.is_power_of_two() {
            return Err(DatasegmentError::InvalidPieceSize {
                size: self.0,
                reason: "padded piece size must be a power of 2",
            });
        }
        Ok(())
    }

    /// The raw payload size carried by a piece of this padded size.
    pub fn unpadded(&self) -> u64 {
        self.0 - self.0 / 128
    }
}

impl std::fmt::Display for PaddedPieceSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A piece: its padded size and commitment CID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceInfo {
    pub size: PaddedPieceSize,
    pub cid: Cid,
}

impl PieceInfo {
    pub fn new(size: u64, cid: Cid) -> Self {
        Self {
            size: PaddedPieceSize(size),
            cid,
        }
    }

    /// Extract the raw 32-byte commitment from the piece CID.
    pub fn commitment(&self) -> Result<Node, DatasegmentError> {
        commitment_from_cid(&self.cid)
    }
}

/// Parse a piece CID from its raw bytes (as carried in an on-chain offer).
pub fn cid_from_offer_bytes(bytes: &[u8]) -> Result<Cid, DatasegmentError> {
    Cid::try_from(bytes).map_err(|e| DatasegmentError::InvalidCommitment(e.to_string()))
}

/// Extract the 32-byte commitment digest from a piece CID, checking that
/// the CID actually is a fil-commitment-unsealed.
pub fn commitment_from_cid(cid: &Cid) -> Result<Node, DatasegmentError> {
    if cid.codec() != FIL_COMMITMENT_UNSEALED {
        return Err(DatasegmentError::InvalidCommitment(format!(
            "unexpected codec {:#x}",
            cid.codec()
        )));
    }
    let hash = cid.hash();
    if hash.code() != SHA2_256_TRUNC254_PADDED {
        return Err(DatasegmentError::InvalidCommitment(format!(
            "unexpected multihash code {:#x}",
            hash.code()
        )));
    }
    let digest = hash.digest();
    if digest.len() != NODE_SIZE {
        return Err(DatasegmentError::InvalidCommitment(format!(
            "digest is {} bytes, want {}",
            digest.len(),
            NODE_SIZE
        )));
    }
    let mut node: Node = [0u8; NODE_SIZE];
    node.copy_from_slice(digest);
    Ok(node)
}

/// Wrap a raw 32-byte commitment into its piece CID.
pub fn cid_from_commitment(node: &Node) -> Result<Cid, DatasegmentError> {
    let mh = Multihash::wrap(SHA2_256_TRUNC254_PADDED, node)
        .map_err(|e| DatasegmentError::InvalidCommitment(e.to_string()))?;
    Ok(Cid::new_v1(FIL_COMMITMENT_UNSEALED, mh))
}
