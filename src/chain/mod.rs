// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod client;
pub mod onramp;
pub mod subscriber;

pub use client::{load_abi, load_keystore_wallet, ChainClient, SignerProvider};
pub use onramp::{parse_data_ready_log, CommitError, DataReadyEvent, Offer, OnRamp};
pub use subscriber::{EventSubscriber, LogSource, WsLogSource};
