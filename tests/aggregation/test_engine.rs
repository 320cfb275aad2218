use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cid::Cid;
use ethers::types::{Address, U256};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use xchain_node::chain::onramp::{CommitError, DataReadyEvent, Offer};
use xchain_node::datasegment::piece::cid_from_commitment;
use xchain_node::datasegment::{compute_root, ProofData};
use xchain_node::deal::DealError;
use xchain_node::{AggregationEngine, CommitSubmitter, DealProposer, TransferRegistry};

#[derive(Debug, Clone)]
struct CommitCall {
    agg_commp: Cid,
    offer_ids: Vec<u64>,
    proofs: Vec<ProofData>,
    payout: Address,
}

#[derive(Default)]
struct StubCommitter {
    calls: Mutex<Vec<CommitCall>>,
    fail: bool,
}

#[async_trait]
impl CommitSubmitter for StubCommitter {
    async fn commit_aggregate(
        &self,
        agg_commp: &Cid,
        offer_ids: &[u64],
        proofs: &[ProofData],
        payout: Address,
    ) -> Result<(), CommitError> {
        if self.fail {
            return Err(CommitError::Send("no funds".to_string()));
        }
        self.calls.lock().await.push(CommitCall {
            agg_commp: *agg_commp,
            offer_ids: offer_ids.to_vec(),
            proofs: proofs.to_vec(),
            payout,
        });
        Ok(())
    }
}

#[derive(Default)]
struct StubProposer {
    calls: Mutex<Vec<(Cid, u64)>>,
    reject_with: Option<String>,
}

#[async_trait]
impl DealProposer for StubProposer {
    async fn propose_deal(&self, agg_commp: Cid, transfer_id: u64) -> Result<(), DealError> {
        self.calls.lock().await.push((agg_commp, transfer_id));
        match &self.reject_with {
            Some(msg) => Err(DealError::Rejected(msg.clone())),
            None => Ok(()),
        }
    }
}

fn offer_event(fill: u8, size: u64, offer_id: u64) -> DataReadyEvent {
    DataReadyEvent {
        offer: Offer {
            comm_p: cid_from_commitment(&[fill; 32]).unwrap().to_bytes(),
            size,
            location: format!("http://127.0.0.1:1729/get?id={offer_id}"),
            amount: U256::from(100u64),
            token: Address::repeat_byte(0x11),
        },
        offer_id,
    }
}

fn malformed_event(size: u64, offer_id: u64) -> DataReadyEvent {
    let mut event = offer_event(0x7f, 1024, offer_id);
    event.offer.size = size;
    event
}

struct Harness {
    committer: Arc<StubCommitter>,
    proposer: Arc<StubProposer>,
    registry: Arc<TransferRegistry>,
    events_tx: mpsc::Sender<DataReadyEvent>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn start_engine(target: u64, committer: StubCommitter, proposer: StubProposer) -> Harness {
    let (events_tx, events_rx) = mpsc::channel(16);
    let committer = Arc::new(committer);
    let proposer = Arc::new(proposer);
    let registry = Arc::new(TransferRegistry::new());
    let engine = AggregationEngine::new(
        events_rx,
        target,
        Address::repeat_byte(0xee),
        committer.clone(),
        proposer.clone(),
        registry.clone(),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(engine.run(cancel.clone()));
    Harness {
        committer,
        proposer,
        registry,
        events_tx,
        cancel,
        handle,
    }
}

impl Harness {
    async fn send(&self, event: DataReadyEvent) {
        self.events_tx.send(event).await.expect("engine gone");
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        self.settle().await;
        self.cancel.cancel();
        self.handle.await.expect("engine task panicked")
    }
}

#[tokio::test]
async fn single_offer_commit_on_overflow() {
    // prefix (256) + 1024 fits in 2048; a second 1024 overflows and
    // closes the aggregate around the first offer alone.
    let h = start_engine(2048, StubCommitter::default(), StubProposer::default());
    h.send(offer_event(1, 1024, 1)).await;
    h.send(offer_event(2, 1024, 2)).await;
    h.settle().await;

    let commits = h.committer.calls.lock().await.clone();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].offer_ids, vec![1]);
    assert_eq!(commits[0].proofs.len(), 1);
    assert_eq!(commits[0].payout, Address::repeat_byte(0xee));

    // commit -> transfer linkage: same aggregate CID, locations in order
    let transfer = h.registry.get(0).await.expect("transfer registered");
    assert_eq!(transfer.agg.piece_cid().unwrap(), commits[0].agg_commp);
    assert_eq!(
        transfer.locations,
        vec!["http://127.0.0.1:1729/get?id=1".to_string()]
    );

    let proposals = h.proposer.calls.lock().await.clone();
    assert_eq!(proposals, vec![(commits[0].agg_commp, 0)]);

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn offers_commit_in_arrival_order() {
    // target 4096: prefix + three 1024 pieces fit, the fourth overflows
    let h = start_engine(4096, StubCommitter::default(), StubProposer::default());
    for id in 1..=4 {
        h.send(offer_event(id as u8, 1024, id)).await;
    }
    h.settle().await;

    let commits = h.committer.calls.lock().await.clone();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].offer_ids, vec![1, 2, 3]);

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn subtree_proofs_verify_against_committed_root() {
    let h = start_engine(2048, StubCommitter::default(), StubProposer::default());
    h.send(offer_event(1, 1024, 1)).await;
    h.send(offer_event(2, 1024, 2)).await;
    h.settle().await;

    let commits = h.committer.calls.lock().await.clone();
    let transfer = h.registry.get(0).await.unwrap();
    let root = transfer.agg.root();
    let leaf = cid_from_commitment(&[1; 32]).unwrap();
    let leaf_comm = xchain_node::datasegment::piece::commitment_from_cid(&leaf).unwrap();
    assert_eq!(compute_root(&leaf_comm, &commits[0].proofs[0]), root);

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversize_offer_is_skipped() {
    let h = start_engine(1024, StubCommitter::default(), StubProposer::default());
    h.send(offer_event(1, 2048, 1)).await;
    h.settle().await;

    assert!(h.committer.calls.lock().await.is_empty());
    assert!(h.proposer.calls.lock().await.is_empty());
    assert!(h.registry.get(0).await.is_none());

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_piece_size_is_skipped() {
    let h = start_engine(2048, StubCommitter::default(), StubProposer::default());
    h.send(malformed_event(1000, 1)).await;
    // a well-formed offer after the skip still aggregates normally
    h.send(offer_event(2, 1024, 2)).await;
    h.send(offer_event(3, 1024, 3)).await;
    h.settle().await;

    let commits = h.committer.calls.lock().await.clone();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].offer_ids, vec![2]);

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn skipped_offers_never_reach_any_commit() {
    let h = start_engine(2048, StubCommitter::default(), StubProposer::default());
    h.send(malformed_event(1000, 1)).await;
    h.send(offer_event(2, 4096, 2)).await; // oversize for target
    h.send(offer_event(3, 1024, 3)).await;
    h.send(offer_event(4, 1024, 4)).await;
    h.send(offer_event(5, 1024, 5)).await;
    h.settle().await;

    let commits = h.committer.calls.lock().await.clone();
    let all_ids: Vec<u64> = commits.iter().flat_map(|c| c.offer_ids.clone()).collect();
    assert!(!all_ids.contains(&1));
    assert!(!all_ids.contains(&2));
    assert_eq!(all_ids, vec![3, 4]);

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn deal_rejection_does_not_stop_the_engine() {
    let proposer = StubProposer {
        reject_with: Some("price".to_string()),
        ..Default::default()
    };
    let h = start_engine(2048, StubCommitter::default(), proposer);
    h.send(offer_event(1, 1024, 1)).await;
    h.send(offer_event(2, 1024, 2)).await;
    h.settle().await;

    // first close happened despite the rejection
    assert_eq!(h.committer.calls.lock().await.len(), 1);
    assert!(h.registry.get(0).await.is_some());

    // engine keeps aggregating: trigger a second close
    h.send(offer_event(3, 1024, 3)).await;
    h.settle().await;
    assert_eq!(h.committer.calls.lock().await.len(), 2);
    assert!(h.registry.get(1).await.is_some());

    h.shutdown().await.unwrap();
}

#[tokio::test]
async fn commit_failure_is_fatal() {
    let committer = StubCommitter {
        fail: true,
        ..Default::default()
    };
    let h = start_engine(2048, committer, StubProposer::default());
    h.send(offer_event(1, 1024, 1)).await;
    h.send(offer_event(2, 1024, 2)).await;
    h.settle().await;

    let result = h.handle.await.expect("engine task panicked");
    assert!(result.is_err());
}
