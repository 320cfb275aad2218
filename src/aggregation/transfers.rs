// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::datasegment::Aggregate;

/// Aggregate data awaiting (or having completed) transfer to the storage
/// provider: the buffer locations of each constituent payload, in piece
/// order, plus the aggregate for its streaming reader.
#[derive(Clone)]
pub struct AggregateTransfer {
    pub locations: Vec<String>,
    pub agg: Arc<Aggregate>,
}

struct RegistryInner {
    next_id: u64,
    transfers: HashMap<u64, AggregateTransfer>,
}

/// Transfer records keyed by transfer id. Written only by the aggregation
/// engine, read by the transfer server; ids are unique for the process
/// lifetime. Records are retained indefinitely, the map is bounded by
/// deal frequency.
pub struct TransferRegistry {
    inner: RwLock<RegistryInner>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                next_id: 0,
                transfers: HashMap::new(),
            }),
        }
    }

    /// Allocate the next transfer id and record the aggregate under it.
    pub async fn register(&self, locations: Vec<String>, agg: Arc<Aggregate>) -> u64 {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.transfers.insert(id, AggregateTransfer { locations, agg });
        id
    }

    pub async fn get(&self, id: u64) -> Option<AggregateTransfer> {
        self.inner.read().await.transfers.get(&id).cloned()
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
