// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, SwarmBuilder};
use libp2p_stream::OpenStreamError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(NetworkBehaviour)]
struct HostBehaviour {
    stream: libp2p_stream::Behaviour,
}

enum Command {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        result: oneshot::Sender<Result<()>>,
    },
}

/// Minimal libp2p host for the outbound deal protocol: a dial-only swarm
/// driven in a background task, with a stream control for opening
/// request/response streams. The deal provider entertains any identity,
/// so a fresh keypair per process is fine.
pub struct DealHost {
    control: libp2p_stream::Control,
    cmd_tx: mpsc::Sender<Command>,
    local_peer_id: PeerId,
}

impl DealHost {
    pub fn spawn() -> Result<Self> {
        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| anyhow!("failed to build libp2p transport: {e}"))?
            .with_behaviour(|_| HostBehaviour {
                stream: libp2p_stream::Behaviour::new(),
            })
            .map_err(|e| anyhow!("failed to build libp2p behaviour: {e:?}"))?
            .build();

        let control = swarm.behaviour().stream.new_control();
        let local_peer_id = *swarm.local_peer_id();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);

        tokio::spawn(async move {
            let mut pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<()>>>> =
                HashMap::new();
            loop {
                tokio::select! {
                    command = cmd_rx.recv() => match command {
                        Some(Command::Dial { peer, addrs, result }) => {
                            if swarm.is_connected(&peer) {
                                let _ = result.send(Ok(()));
                                continue;
                            }
                            let opts = DialOpts::peer_id(peer).addresses(addrs).build();
                            match swarm.dial(opts) {
                                Ok(()) => pending_dials.entry(peer).or_default().push(result),
                                Err(e) => {
                                    let _ = result.send(Err(anyhow!("dial failed: {e}")));
                                }
                            }
                        }
                        None => return,
                    },
                    event = swarm.select_next_some() => match event {
                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            for tx in pending_dials.remove(&peer_id).unwrap_or_default() {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                            let msg = format!("failed to connect to peer {peer_id}: {error}");
                            for tx in pending_dials.remove(&peer_id).unwrap_or_default() {
                                let _ = tx.send(Err(anyhow!(msg.clone())));
                            }
                        }
                        other => debug!(event = ?other, "swarm event"),
                    },
                }
            }
        });

        Ok(Self {
            control,
            cmd_tx,
            local_peer_id,
        })
    }

    /// Establish a connection to the peer at the given addresses. Returns
    /// immediately if already connected.
    pub async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Dial {
                peer,
                addrs,
                result: tx,
            })
            .await
            .map_err(|_| anyhow!("deal host task stopped"))?;
        rx.await
            .map_err(|_| anyhow!("deal host task dropped the dial result"))?
    }

    /// Open a fresh stream negotiated to `protocol`.
    pub async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<libp2p::Stream, OpenStreamError> {
        self.control.clone().open_stream(peer, protocol).await
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }
}
