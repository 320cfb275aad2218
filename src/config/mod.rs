// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected exactly 1 config record, got {0}")]
    RecordCount(usize),
}

/// Daemon configuration, one record per file.
///
/// The file holds a single-element JSON array; field names mirror the
/// on-ramp deployment tooling's output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(rename = "ChainID")]
    pub chain_id: u64,
    /// EVM chain RPC URL.
    pub api: String,
    pub on_ramp_address: String,
    pub prover_addr: String,
    pub key_path: String,
    pub client_addr: String,
    pub payout_addr: String,
    #[serde(rename = "OnRampABIPath")]
    pub on_ramp_abi_path: String,
    #[serde(default)]
    pub buffer_path: String,
    #[serde(default)]
    pub buffer_port: u16,
    #[serde(rename = "TransferIP")]
    pub transfer_ip: String,
    pub transfer_port: u16,
    /// Chain-native storage provider actor address.
    pub provider_addr: String,
    #[serde(rename = "LotusAPI")]
    pub lotus_api: String,
    pub target_agg_size: u64,
}

impl Config {
    /// Address the transfer server listens on and advertises in deals.
    pub fn transfer_addr(&self) -> String {
        format!("{}:{}", self.transfer_ip, self.transfer_port)
    }
}

/// Load the config record from a JSON file, expanding a leading `~`.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let expanded = expand_home(path);
    let bytes = std::fs::read(&expanded).map_err(|source| ConfigError::Read {
        path: expanded.display().to_string(),
        source,
    })?;
    let mut records: Vec<Config> =
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: expanded.display().to_string(),
            source,
        })?;
    if records.len() != 1 {
        return Err(ConfigError::RecordCount(records.len()));
    }
    Ok(records.remove(0))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    PathBuf::from(path)
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/"))
}
