// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cid::Cid;
use clap::{Parser, Subcommand};
use ethers::types::U256;
use tokio_util::io::StreamReader;
use tracing::info;
use xchain_node::chain::{ChainClient, Offer, OnRamp};
use xchain_node::config::{load_config, Config};
use xchain_node::daemon;

#[derive(Parser)]
#[command(
    name = "xchain",
    about = "Filecoin Xchain Data Services",
    long_about = "Export filecoin data storage to any blockchain"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "~/.xchain/config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the xchain adapter daemon
    Daemon {
        /// Run a buffer server
        #[arg(long)]
        buffer_service: bool,
        /// Run an aggregation server
        #[arg(long)]
        aggregation_service: bool,
    },
    /// Send data from cross chain to filecoin
    Client {
        #[command(subcommand)]
        command: ClientCommand,
    },
    /// Store and fetch payloads on a buffer service
    Buffer {
        #[command(subcommand)]
        command: BufferCommand,
    },
}

#[derive(Subcommand)]
enum ClientCommand {
    /// Offer data by providing file and payment parameters
    Offer {
        comm_p: String,
        size: u64,
        buffer_location: String,
        token: String,
        token_amount: String,
    },
}

#[derive(Subcommand)]
enum BufferCommand {
    /// Upload a file, printing the buffer's response
    Put {
        file: PathBuf,
        /// Buffer service URL, defaults to the configured local buffer
        #[arg(long)]
        service: Option<String>,
    },
    /// Fetch a payload by id and write it to stdout
    Get {
        id: u64,
        #[arg(long)]
        service: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Command::Daemon {
            buffer_service,
            aggregation_service,
        } => {
            let run_buffer = buffer_service;
            // default to running the aggregator
            let run_agg = aggregation_service || !buffer_service;
            daemon::run(cfg, run_buffer, run_agg).await
        }
        Command::Client {
            command:
                ClientCommand::Offer {
                    comm_p,
                    size,
                    buffer_location,
                    token,
                    token_amount,
                },
        } => client_offer(cfg, comm_p, size, buffer_location, token, token_amount).await,
        Command::Buffer { command } => match command {
            BufferCommand::Put { file, service } => buffer_put(cfg, file, service).await,
            BufferCommand::Get { id, service } => buffer_get(cfg, id, service).await,
        },
    }
}

async fn client_offer(
    cfg: Config,
    comm_p: String,
    size: u64,
    location: String,
    token: String,
    amount: String,
) -> Result<()> {
    let chain = ChainClient::connect(&cfg).await?;
    let onramp = OnRamp::new(chain.onramp_addr, chain.abi.clone(), chain.signer.clone());

    let offer = Offer {
        comm_p: comm_p
            .parse::<Cid>()
            .context("failed to parse cid")?
            .to_bytes(),
        size,
        location,
        amount: U256::from_dec_str(&amount).context("invalid token amount")?,
        token: token.parse().context("invalid token address")?,
    };

    let receipt = onramp.offer_data(&offer).await?;
    info!(
        tx = %receipt.transaction_hash,
        status = receipt.status.map(|s| s.as_u64()).unwrap_or_default(),
        "offer included"
    );
    Ok(())
}

fn buffer_service_url(cfg: &Config, service: Option<String>) -> String {
    service.unwrap_or_else(|| format!("http://127.0.0.1:{}", cfg.buffer_port))
}

async fn buffer_put(cfg: Config, file: PathBuf, service: Option<String>) -> Result<()> {
    let url = buffer_service_url(&cfg, service);
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let resp = reqwest::Client::new()
        .post(format!("{url}/put"))
        .body(bytes)
        .send()
        .await
        .context("buffer put failed")?
        .error_for_status()
        .context("buffer put rejected")?;
    println!("{}", resp.text().await.context("failed to read buffer response")?);
    Ok(())
}

async fn buffer_get(cfg: Config, id: u64, service: Option<String>) -> Result<()> {
    use futures::TryStreamExt;

    let url = buffer_service_url(&cfg, service);
    let resp = reqwest::get(format!("{url}/get?id={id}"))
        .await
        .context("buffer get failed")?
        .error_for_status()
        .context("buffer get rejected")?;
    let stream = resp
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(stream);
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout)
        .await
        .context("failed to write payload to stdout")?;
    Ok(())
}
