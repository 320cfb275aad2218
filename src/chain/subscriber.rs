// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::onramp::{parse_data_ready_log, DataReadyEvent};

/// A source of raw contract logs. Each call opens one subscription whose
/// logs (and whose failure, when the underlying socket dies) arrive on
/// the returned channel.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn subscribe(&self) -> mpsc::Receiver<Result<Log>>;
}

/// Log subscription over an ethers websocket provider, filtered to the
/// on-ramp address and the `DataReady` topic.
pub struct WsLogSource {
    provider: Arc<Provider<Ws>>,
    filter: Filter,
}

impl WsLogSource {
    pub fn new(provider: Arc<Provider<Ws>>, onramp_addr: Address, topic: H256) -> Self {
        let filter = Filter::new().address(onramp_addr).topic0(topic);
        Self { provider, filter }
    }
}

#[async_trait]
impl LogSource for WsLogSource {
    async fn subscribe(&self) -> mpsc::Receiver<Result<Log>> {
        let (tx, rx) = mpsc::channel(256);
        let provider = self.provider.clone();
        let filter = self.filter.clone();
        tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(anyhow!(e))).await;
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                if tx.send(Ok(log)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Err(anyhow!("log subscription stream ended")))
                .await;
        });
        rx
    }
}

/// Listens for `DataReady` notifications and forwards decoded events to
/// the aggregation channel.
///
/// Subscription drops whose error mentions `read tcp` are re-subscribed
/// transparently; events arriving during the gap are lost (a limitation
/// of the upstream log subscription). Any other failure is fatal.
pub struct EventSubscriber<S> {
    source: S,
    events_tx: mpsc::Sender<DataReadyEvent>,
}

impl<S: LogSource> EventSubscriber<S> {
    pub fn new(source: S, events_tx: mpsc::Sender<DataReadyEvent>) -> Self {
        Self { source, events_tx }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            match self.subscribe_once(&cancel).await {
                Ok(()) => {
                    info!("context done, exiting subscribe query");
                    return Ok(());
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %format!("{e:#}"), "ignoring transient subscription error");
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe_once(&self, cancel: &CancellationToken) -> Result<()> {
        let mut logs = self.source.subscribe().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = logs.recv() => match item {
                    Some(Ok(log)) => {
                        let event = parse_data_ready_log(&log)?;
                        info!(offer_id = event.offer_id, "sending offer for aggregation");
                        if self.events_tx.send(event).await.is_err() {
                            return Err(anyhow!("aggregation channel closed"));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(anyhow!("log subscription closed")),
                }
            }
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    format!("{err:#}").contains("read tcp")
}
