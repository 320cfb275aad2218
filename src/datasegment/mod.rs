// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Piece aggregation for storage deals.
//!
//! A deal-sized aggregate packs several smaller pieces at size-aligned
//! offsets inside one padded piece. Each constituent piece can be proven
//! in-place against the aggregate commitment with a subtree Merkle proof,
//! and the aggregate payload can be streamed from the constituent payload
//! sources without materializing it.

pub mod aggregate;
pub mod index;
pub mod merkle;
pub mod piece;
pub mod reader;

pub use aggregate::Aggregate;
pub use index::SegmentDesc;
pub use merkle::{compute_root, Node, ProofData, NODE_SIZE};
pub use piece::{PaddedPieceSize, PieceInfo};
pub use reader::AggregateObjectReader;

use cid::Cid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasegmentError {
    #[error("invalid padded piece size {size}: {reason}")]
    InvalidPieceSize { size: u64, reason: &'static str },

    #[error("invalid piece commitment cid: {0}")]
    InvalidCommitment(String),

    #[error("pieces do not fit in aggregate of size {deal_size}, placement requires {required} bytes")]
    DoesNotFit { deal_size: u64, required: u64 },

    #[error("piece {cid} not part of this aggregate")]
    PieceNotFound { cid: Cid },

    #[error("aggregate has {expected} pieces but {actual} payload sources were supplied")]
    SourceCount { expected: usize, actual: usize },
}
