// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregation::{AggregationEngine, TransferRegistry};
use crate::buffer::{self, BufferService};
use crate::chain::onramp::data_ready_topic;
use crate::chain::{ChainClient, EventSubscriber, OnRamp, WsLogSource};
use crate::config::{expand_home, Config};
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::deal::{miner_peer_info, DealHost, DealNegotiator};
use crate::filaddr::FilAddress;
use crate::lotus::LotusClient;
use crate::transfer::{self, TransferState};

/// Run the daemon: the aggregation service (event subscriber, aggregation
/// engine, transfer server) and/or the buffer service, under one task
/// group. The first task to fail cancels the rest; ctrl-c shuts down
/// cleanly.
pub async fn run(cfg: Config, run_buffer: bool, run_agg: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    if run_buffer {
        let service = Arc::new(BufferService::new(expand_home(&cfg.buffer_path)));
        let port = cfg.buffer_port;
        let child = cancel.child_token();
        tasks.spawn(async move { buffer::serve(service, port, child).await });
    }

    if run_agg {
        spawn_aggregator(&cfg, &cancel, &mut tasks).await?;
    }

    let mut first_err: Option<anyhow::Error> = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("ctrl-c received, shutting down");
                cancel.cancel();
            }
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    cancel.cancel();
                }
                Some(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(anyhow!("task panicked: {e}"));
                    }
                    cancel.cancel();
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn spawn_aggregator(
    cfg: &Config,
    cancel: &CancellationToken,
    tasks: &mut JoinSet<Result<()>>,
) -> Result<()> {
    let chain = ChainClient::connect(cfg).await?;
    let topic = data_ready_topic(&chain.abi)?;
    let payout: Address = cfg.payout_addr.parse().context("invalid PayoutAddr")?;
    let prover: Address = cfg.prover_addr.parse().context("invalid ProverAddr")?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let source = WsLogSource::new(chain.provider.clone(), chain.onramp_addr, topic);
    let subscriber = EventSubscriber::new(source, events_tx);

    let onramp = Arc::new(OnRamp::new(
        chain.onramp_addr,
        chain.abi.clone(),
        chain.signer.clone(),
    ));

    let lotus = Arc::new(LotusClient::new(&cfg.lotus_api)?);
    // Dial info for the provider's deal endpoint comes from its on-chain
    // miner info.
    let minfo = lotus.state_miner_info(&cfg.provider_addr).await?;
    let (provider_peer, provider_maddrs) = miner_peer_info(&cfg.provider_addr, &minfo)?;
    let provider_actor = FilAddress::from_id_string(&cfg.provider_addr)
        .context("failed to parse provider address")?;

    let host = DealHost::spawn()?;
    let negotiator = Arc::new(DealNegotiator::new(
        host,
        lotus,
        provider_peer,
        provider_maddrs,
        provider_actor,
        prover,
        cfg.transfer_addr(),
        cfg.target_agg_size,
        cancel.child_token(),
    ));

    let registry = Arc::new(TransferRegistry::new());
    let engine = AggregationEngine::new(
        events_rx,
        cfg.target_agg_size,
        payout,
        onramp,
        negotiator,
        registry.clone(),
    );

    info!(onramp = %chain.onramp_addr, "listening for data ready events");
    let child = cancel.child_token();
    tasks.spawn(async move { subscriber.run(child).await });
    let child = cancel.child_token();
    tasks.spawn(async move { engine.run(child).await });

    let state = TransferState {
        registry,
        target_deal_size: cfg.target_agg_size,
    };
    let addr = cfg.transfer_addr();
    let child = cancel.child_token();
    tasks.spawn(async move { transfer::serve(state, addr, child).await });
    Ok(())
}
