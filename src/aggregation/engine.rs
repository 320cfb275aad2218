// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cid::Cid;
use ethers::types::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::transfers::TransferRegistry;
use crate::chain::onramp::{CommitError, DataReadyEvent};
use crate::constants::prefix_piece;
use crate::datasegment::{Aggregate, PaddedPieceSize, PieceInfo, ProofData};
use crate::deal::DealError;

/// Seam to the on-chain commitment transaction, abstracted so the engine
/// can be driven against a stub in tests.
#[async_trait]
pub trait CommitSubmitter: Send + Sync {
    async fn commit_aggregate(
        &self,
        agg_commp: &Cid,
        offer_ids: &[u64],
        proofs: &[ProofData],
        payout: Address,
    ) -> Result<(), CommitError>;
}

/// Seam to the libp2p deal proposal flow.
#[async_trait]
pub trait DealProposer: Send + Sync {
    async fn propose_deal(&self, agg_commp: Cid, transfer_id: u64) -> Result<(), DealError>;
}

/// Consumes decoded offer events and greedily packs them into aggregates.
///
/// When an arriving offer no longer fits under the target deal size the
/// pending queue is closed: the aggregate is committed on chain, recorded
/// for transfer, and proposed to the storage provider. Unsorted greedy is
/// a naive knapsack strategy, but it never stalls on sizing uncertainty.
pub struct AggregationEngine {
    events_rx: mpsc::Receiver<DataReadyEvent>,
    target_deal_size: u64,
    payout_addr: Address,
    committer: Arc<dyn CommitSubmitter>,
    proposer: Arc<dyn DealProposer>,
    transfers: Arc<TransferRegistry>,
}

impl AggregationEngine {
    pub fn new(
        events_rx: mpsc::Receiver<DataReadyEvent>,
        target_deal_size: u64,
        payout_addr: Address,
        committer: Arc<dyn CommitSubmitter>,
        proposer: Arc<dyn DealProposer>,
        transfers: Arc<TransferRegistry>,
    ) -> Self {
        Self {
            events_rx,
            target_deal_size,
            payout_addr,
            committer,
            proposer,
            transfers,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let target = PaddedPieceSize(self.target_deal_size);
        let prefix = prefix_piece();
        // Invariant: the pieces in the pending queue can always make a
        // valid aggregate w.r.t. the target deal size.
        let mut pending: Vec<DataReadyEvent> = Vec::with_capacity(256);
        let mut pending_pieces: Vec<PieceInfo> = Vec::with_capacity(256);
        let mut total = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("ctx done, shutting down aggregation");
                    return Ok(());
                }
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        return Err(anyhow!("offer event channel closed"));
                    };
                    self.handle_event(event, target, &prefix, &mut pending, &mut pending_pieces, &mut total)
                        .await?;
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: DataReadyEvent,
        target: PaddedPieceSize,
        prefix: &PieceInfo,
        pending: &mut Vec<DataReadyEvent>,
        pending_pieces: &mut Vec<PieceInfo>,
        total: &mut u64,
    ) -> Result<()> {
        // An offer that cannot form a minimal aggregate on its own can
        // never be packed; admitting it would stall the queue forever.
        let piece = match event.offer.piece() {
            Ok(piece) => piece,
            Err(e) => {
                warn!(
                    offer_id = event.offer_id,
                    size = event.offer.size,
                    error = %e,
                    "skipping offer, size not a valid padded piece size"
                );
                return Ok(());
            }
        };
        if let Err(e) = Aggregate::new(target, vec![prefix.clone(), piece.clone()]) {
            warn!(
                offer_id = event.offer_id,
                size = event.offer.size,
                target = target.0,
                error = %e,
                "skipping offer, exceeds max packable size"
            );
            return Ok(());
        }

        // Trial extension: ask the aggregate constructor whether the
        // queue still fits with the new piece appended.
        let mut candidate = Vec::with_capacity(pending_pieces.len() + 2);
        candidate.push(prefix.clone());
        candidate.extend(pending_pieces.iter().cloned());
        candidate.push(piece.clone());

        if Aggregate::new(target, candidate).is_ok() {
            *total += event.offer.size;
            info!(
                offer_id = event.offer_id,
                pending = pending.len() + 1,
                total = *total,
                "offer added, pending aggregation"
            );
            pending.push(event);
            pending_pieces.push(piece);
            return Ok(());
        }

        // Overshot: commit just the pieces already pending.
        if pending.is_empty() {
            return Err(anyhow!(
                "failed to create aggregate from pending, should not be reachable"
            ));
        }
        let mut agg_pieces = Vec::with_capacity(pending_pieces.len() + 1);
        agg_pieces.push(prefix.clone());
        agg_pieces.extend(pending_pieces.iter().cloned());
        let agg = Aggregate::new(target, agg_pieces)
            .context("failed to create aggregate from pending, should not be reachable")?;

        self.close_aggregate(pending, pending_pieces, agg).await?;

        // Reset the queue to just the event that triggered aggregation.
        pending.clear();
        pending_pieces.clear();
        *total = event.offer.size;
        pending.push(event);
        pending_pieces.push(piece);
        Ok(())
    }

    async fn close_aggregate(
        &self,
        pending: &[DataReadyEvent],
        pending_pieces: &[PieceInfo],
        agg: Aggregate,
    ) -> Result<()> {
        // Only data proofs go on chain, index proofs are not collected.
        let mut offer_ids = Vec::with_capacity(pending.len());
        let mut proofs = Vec::with_capacity(pending.len());
        for (event, piece) in pending.iter().zip(pending_pieces) {
            offer_ids.push(event.offer_id);
            proofs.push(agg.proof_for_piece(piece)?);
        }
        let agg_commp = agg.piece_cid()?;

        self.committer
            .commit_aggregate(&agg_commp, &offer_ids, &proofs, self.payout_addr)
            .await
            .context("failed to commit aggregate")?;

        // After this the aggregate is served at `/?id={transfer_id}`.
        let locations = pending.iter().map(|e| e.offer.location.clone()).collect();
        let agg = Arc::new(agg);
        let transfer_id = self.transfers.register(locations, agg).await;
        info!(transfer_id, commp = %agg_commp, "transfer scheduled for aggregate");

        if let Err(e) = self.proposer.propose_deal(agg_commp, transfer_id).await {
            error!(error = %e, "failed to send deal");
        }
        Ok(())
    }
}
