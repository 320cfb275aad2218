// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use cid::Cid;
use tokio::io::AsyncRead;

use super::index::SegmentDesc;
use super::merkle::{level_for_size, truncated_hash, zero_comm, Node, ProofData};
use super::piece::{cid_from_commitment, PaddedPieceSize, PieceInfo};
use super::reader::{build_object_reader, AggregateObjectReader};
use super::DatasegmentError;

/// A piece placed at a padded offset inside the aggregate.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub piece: PieceInfo,
    pub comm: Node,
    pub offset: u64,
}

impl Placement {
    pub fn unpadded_offset(&self) -> u64 {
        // offsets are multiples of 128, so this is exact
        self.offset - self.offset / 128
    }
}

/// An immutable aggregate: an ordered set of pieces placed at size-aligned
/// offsets within a single deal-sized piece.
///
/// Construction is the packing oracle: `Aggregate::new` fails when the
/// piece list cannot be placed in order within `deal_size`, which is how
/// the aggregation engine detects that its pending queue is full.
#[derive(Debug, Clone)]
pub struct Aggregate {
    deal_size: PaddedPieceSize,
    placements: Vec<Placement>,
}

impl Aggregate {
    pub fn new(deal_size: PaddedPieceSize, pieces: Vec<PieceInfo>) -> Result<Self, DatasegmentError> {
        deal_size.validate()?;
        let mut placements = Vec::with_capacity(pieces.len());
        let mut cursor = 0u64;
        for piece in pieces {
            piece.size.validate()?;
            let comm = piece.commitment()?;
            let offset = align_up(cursor, piece.size.0);
            let end = offset
                .checked_add(piece.size.0)
                .ok_or(DatasegmentError::DoesNotFit {
                    deal_size: deal_size.0,
                    required: u64::MAX,
                })?;
            if end > deal_size.0 {
                return Err(DatasegmentError::DoesNotFit {
                    deal_size: deal_size.0,
                    required: end,
                });
            }
            placements.push(Placement {
                piece,
                comm,
                offset,
            });
            cursor = end;
        }
        Ok(Self {
            deal_size,
            placements,
        })
    }

    pub fn deal_size(&self) -> PaddedPieceSize {
        self.deal_size
    }

    /// The un-padded byte length of the aggregate payload on the wire.
    pub fn payload_size(&self) -> u64 {
        self.deal_size.unpadded()
    }

    pub fn piece_count(&self) -> usize {
        self.placements.len()
    }

    /// Root commitment of the whole aggregate.
    pub fn root(&self) -> Node {
        self.region_root(0, self.deal_size.0)
    }

    /// Piece CID of the whole aggregate (the commP committed on chain).
    pub fn piece_cid(&self) -> Result<Cid, DatasegmentError> {
        cid_from_commitment(&self.root())
    }

    /// Subtree inclusion proof for a constituent piece: the Merkle path
    /// from the piece's own root up to the aggregate root.
    pub fn proof_for_piece(&self, piece: &PieceInfo) -> Result<ProofData, DatasegmentError> {
        let target = self
            .placements
            .iter()
            .find(|p| p.piece.cid == piece.cid && p.piece.size == piece.size)
            .ok_or(DatasegmentError::PieceNotFound { cid: piece.cid })?;

        let mut path = Vec::new();
        let mut offset = 0u64;
        let mut size = self.deal_size.0;
        while size > target.piece.size.0 {
            let half = size / 2;
            if target.offset < offset + half {
                path.push(self.region_root(offset + half, half));
            } else {
                path.push(self.region_root(offset, half));
                offset += half;
            }
            size = half;
        }
        // collected root-down, proofs walk leaf-up
        path.reverse();
        Ok(ProofData {
            path,
            index: target.offset / target.piece.size.0,
        })
    }

    /// Index entries describing each placed segment, in placement order.
    pub fn index_entries(&self) -> Vec<SegmentDesc> {
        self.placements
            .iter()
            .map(|p| SegmentDesc::new(p.comm, p.offset, p.piece.size.0))
            .collect()
    }

    /// Build the streaming payload reader. `sources` must supply the raw
    /// payload bytes of each piece, in placement order; the returned
    /// reader interleaves them with zero fill and the trailing segment
    /// index, emitting exactly `payload_size()` bytes.
    pub fn object_reader(
        &self,
        sources: Vec<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> Result<AggregateObjectReader, DatasegmentError> {
        build_object_reader(self, sources)
    }

    pub(crate) fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Commitment of the region `[offset, offset + size)`.
    ///
    /// Pieces are power-of-two sized and size-aligned, so halving from the
    /// deal root never splits a placed piece: every region is exactly one
    /// piece, piece-free, or splits cleanly into two halves.
    fn region_root(&self, offset: u64, size: u64) -> Node {
        if let Some(p) = self
            .placements
            .iter()
            .find(|p| p.offset == offset && p.piece.size.0 == size)
        {
            return p.comm;
        }
        let occupied = self
            .placements
            .iter()
            .any(|p| p.offset < offset + size && p.offset + p.piece.size.0 > offset);
        if !occupied {
            return zero_comm(level_for_size(size));
        }
        let half = size / 2;
        truncated_hash(
            &self.region_root(offset, half),
            &self.region_root(offset + half, half),
        )
    }
}

fn align_up(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}
