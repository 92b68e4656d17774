//! Runtime configuration of the relay, resolved once at startup.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use alloy_signer_local::PrivateKeySigner;
use backon::ExponentialBuilder;
use url::Url;

use crate::{chainspec::RelayChainSpec, contracts::WatchedContract, sequencer};

/// Bounds of an exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first attempt. `None` retries forever.
    pub max_retries: Option<usize>,
}

impl BackoffConfig {
    /// Header fetches: a block a few seconds ahead of the node shows up within the schedule.
    pub const FETCH: Self = Self {
        min_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(12),
        max_retries: Some(8),
    };

    /// Subscription reconnects.
    pub const RECONNECT: Self = Self {
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        max_retries: None,
    };

    pub fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay);
        match self.max_retries {
            Some(times) => builder.with_max_times(times),
            None => builder.without_max_times(),
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub fetch_backoff: BackoffConfig,
    /// Requests fulfilled at the same time.
    pub max_concurrent_fulfillments: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { fetch_backoff: BackoffConfig::FETCH, max_concurrent_fulfillments: 16 }
    }
}

/// Everything `randao-relay run` needs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub rpc_url: Url,
    pub signer: PrivateKeySigner,
    pub chain: Arc<RelayChainSpec>,
    pub contracts: Vec<WatchedContract>,
    /// Backfill start; `None` starts at the current head.
    pub from_block: Option<u64>,
    pub pipeline: PipelineConfig,
    pub reconnect_backoff: BackoffConfig,
    pub gas_limit: u64,
    pub receipt_poll_interval: Duration,
    /// Capacity of the subscriber -> pipeline channel.
    pub channel_capacity: usize,
    pub metrics_addr: Option<SocketAddr>,
}

impl RelayConfig {
    pub fn new(
        rpc_url: Url,
        signer: PrivateKeySigner,
        chain: Arc<RelayChainSpec>,
        contracts: Vec<WatchedContract>,
    ) -> Self {
        Self {
            rpc_url,
            signer,
            chain,
            contracts,
            from_block: None,
            pipeline: PipelineConfig::default(),
            reconnect_backoff: BackoffConfig::RECONNECT,
            gas_limit: sequencer::DEFAULT_CALLBACK_GAS_LIMIT,
            receipt_poll_interval: Duration::from_secs(2),
            channel_capacity: 1024,
            metrics_addr: None,
        }
    }
}
