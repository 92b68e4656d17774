//! Command line interface and logging setup.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::WrapErr;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{filter::EnvFilter, util::SubscriberInitExt, FmtSubscriber};
use url::Url;

use crate::{
    chainspec::{RelayChainSpec, RelayChainSpecParser},
    client::AlloyChainClient,
    config::{BackoffConfig, PipelineConfig, RelayConfig},
    contracts::{ContractVariant, WatchedContract},
    metrics,
    relay::{fetch_verified_header, RandaoRelay},
    sequencer::DEFAULT_CALLBACK_GAS_LIMIT,
    version::relay_version_string,
};

/// Relays RANDAO-bearing block headers to on-chain randomness consumers.
#[derive(Debug, Parser)]
#[command(name = "randao-relay", version = relay_version_string(), about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub logs: LogArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch consumer contracts and fulfill their requests.
    Run(RunArgs),
    /// Fetch, verify and print the encoding of one block header.
    EncodeHeader(EncodeHeaderArgs),
}

/// Node connection shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// Node endpoint. Must be a WebSocket URL for `run`.
    #[arg(long = "rpc-url", env = "WS_RPC_URL")]
    pub rpc_url: Url,

    /// Chain profile: one of mainnet, sepolia, dev, or a path to a JSON profile.
    #[arg(
        long,
        value_name = "CHAIN_OR_PATH",
        default_value = "mainnet",
        value_parser = parse_chain
    )]
    pub chain: Arc<RelayChainSpec>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Relayer key signing the callbacks.
    #[arg(long = "private-key", env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: PrivateKeySigner,

    /// Consumer contract fulfilled with one header.
    #[arg(long = "single-block-contract", value_delimiter = ',')]
    pub single_block_contracts: Vec<Address>,

    /// Consumer contract fulfilled with three headers.
    #[arg(long = "multi-block-contract", value_delimiter = ',')]
    pub multi_block_contracts: Vec<Address>,

    /// Backfill request events from this block on startup.
    #[arg(long = "from-block")]
    pub from_block: Option<u64>,

    #[arg(long = "fetch.min-delay-ms", default_value_t = 500)]
    pub fetch_min_delay_ms: u64,

    #[arg(long = "fetch.max-delay-ms", default_value_t = 12_000)]
    pub fetch_max_delay_ms: u64,

    /// Header fetch retries before a request is failed.
    #[arg(long = "fetch.max-retries", default_value_t = 8)]
    pub fetch_max_retries: usize,

    #[arg(long = "gas-limit", default_value_t = DEFAULT_CALLBACK_GAS_LIMIT)]
    pub gas_limit: u64,

    #[arg(long = "receipt.poll-interval-ms", default_value_t = 2_000)]
    pub receipt_poll_interval_ms: u64,

    #[arg(long = "max-concurrent-fulfillments", default_value_t = 16)]
    pub max_concurrent_fulfillments: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics", value_name = "SOCKET")]
    pub metrics: Option<SocketAddr>,
}

impl RunArgs {
    pub fn contracts(&self) -> Vec<WatchedContract> {
        let single = self
            .single_block_contracts
            .iter()
            .map(|&address| WatchedContract { address, variant: ContractVariant::SingleBlock });
        let multi = self
            .multi_block_contracts
            .iter()
            .map(|&address| WatchedContract { address, variant: ContractVariant::MultiBlock });
        single.chain(multi).collect()
    }

    pub fn into_config(self) -> RelayConfig {
        let contracts = self.contracts();
        let mut config = RelayConfig::new(
            self.node.rpc_url,
            self.private_key,
            self.node.chain,
            contracts,
        );
        config.from_block = self.from_block;
        config.pipeline = PipelineConfig {
            fetch_backoff: BackoffConfig {
                min_delay: Duration::from_millis(self.fetch_min_delay_ms),
                max_delay: Duration::from_millis(self.fetch_max_delay_ms),
                max_retries: Some(self.fetch_max_retries),
            },
            max_concurrent_fulfillments: self.max_concurrent_fulfillments,
        };
        config.gas_limit = self.gas_limit;
        config.receipt_poll_interval = Duration::from_millis(self.receipt_poll_interval_ms);
        config.metrics_addr = self.metrics;
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct EncodeHeaderArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Block number to encode.
    pub number: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Log output format. Filtering follows `RUST_LOG` (default `info`).
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Plain, global = true)]
    pub format: LogFormat,
}

impl LogArgs {
    /// Installs the global tracing subscriber.
    pub fn init(&self) -> eyre::Result<()> {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env()
            .wrap_err("Invalid RUST_LOG directive")?;
        let builder = FmtSubscriber::builder().with_env_filter(filter).with_ansi(enable_ansi());

        match self.format {
            LogFormat::Plain => builder.finish().try_init()?,
            LogFormat::Json => builder.json().finish().try_init()?,
        }
        Ok(())
    }
}

fn enable_ansi() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal() && std::io::stderr().is_terminal()
}

fn parse_chain(s: &str) -> Result<Arc<RelayChainSpec>, String> {
    RelayChainSpecParser::parse(s).map_err(|err| format!("{err:#}"))
}

impl Cli {
    pub async fn run(self) -> eyre::Result<()> {
        match self.command {
            Command::Run(args) => run_relay(args).await,
            Command::EncodeHeader(args) => encode_header(args).await,
        }
    }
}

async fn run_relay(args: RunArgs) -> eyre::Result<()> {
    let config = args.into_config();
    if let Some(addr) = config.metrics_addr {
        metrics::install_prometheus_exporter(addr)?;
    }

    let relay = RandaoRelay::connect(config).await?;
    tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "randao_relay::cli", "Received ctrl-c, shutting down");
            Ok(())
        }
    }
}

async fn encode_header(args: EncodeHeaderArgs) -> eyre::Result<()> {
    let client = AlloyChainClient::connect(&args.node.rpc_url).await?;
    let header = fetch_verified_header(&client, &args.node.chain.schedule, args.number).await?;
    let output = serde_json::json!({
        "number": header.number,
        "era": header.era.name(),
        "hash": header.hash,
        "randao": header.randao(),
        "header": header.rlp,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
