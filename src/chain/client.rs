// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ethers::abi::{Abi, ParamType, Token};
use ethers::prelude::*;

use crate::config::{expand_home, Config};

/// Environment variable holding the keystore passphrase.
pub const PASSPHRASE_ENV: &str = "XCHAIN_PASSPHRASE";

pub type SignerProvider = SignerMiddleware<Provider<Ws>, LocalWallet>;

/// Connection to the EVM chain: a websocket provider for log
/// subscriptions and a signing middleware for transactions, plus the
/// parsed on-ramp ABI.
pub struct ChainClient {
    pub provider: Arc<Provider<Ws>>,
    pub signer: Arc<SignerProvider>,
    pub abi: Abi,
    pub onramp_addr: Address,
}

impl ChainClient {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let provider = Provider::<Ws>::connect(&cfg.api)
            .await
            .with_context(|| format!("failed to dial chain RPC {}", cfg.api))?;
        let provider = Arc::new(provider);

        let wallet = load_keystore_wallet(&cfg.key_path, cfg.chain_id)?;
        let signer = Arc::new(SignerMiddleware::new((*provider).clone(), wallet));

        let abi = load_abi(&cfg.on_ramp_abi_path)?;
        let onramp_addr: Address = cfg
            .on_ramp_address
            .parse()
            .context("invalid OnRampAddress")?;

        Ok(Self {
            provider,
            signer,
            abi,
            onramp_addr,
        })
    }
}

/// Load the on-ramp contract ABI (a JSON array) from a file.
pub fn load_abi(path: &str) -> Result<Abi> {
    let expanded = expand_home(path);
    let file = std::fs::File::open(&expanded)
        .with_context(|| format!("failed to open abi file {}", expanded.display()))?;
    serde_json::from_reader(file).context("failed to parse abi")
}

/// Unlock the web3 secret-storage keystore at `key_path` with the
/// `XCHAIN_PASSPHRASE` environment variable and bind it to `chain_id`.
pub fn load_keystore_wallet(key_path: &str, chain_id: u64) -> Result<LocalWallet> {
    let expanded = expand_home(key_path);
    let passphrase = std::env::var(PASSPHRASE_ENV).unwrap_or_default();
    let wallet = LocalWallet::decrypt_keystore(&expanded, passphrase)
        .with_context(|| format!("failed to unlock keystore {}", expanded.display()))?;
    Ok(wallet.with_chain_id(chain_id))
}

/// ABI-encode a chain id the way the on-ramp contract consumes it.
pub fn encode_chain_id(chain_id: U256) -> Vec<u8> {
    ethers::abi::encode(&[Token::Uint(chain_id)])
}

/// Decode a chain id previously encoded with [`encode_chain_id`].
pub fn decode_chain_id(data: &[u8]) -> Result<U256> {
    let tokens = ethers::abi::decode(&[ParamType::Uint(256)], data)
        .context("failed to decode chain id")?;
    tokens
        .into_iter()
        .next()
        .and_then(|t| t.into_uint())
        .ok_or_else(|| anyhow!("no chain id in decoded data"))
}
