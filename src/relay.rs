//! Wires the subscriber, tracker, pipeline and sequencer together.

use std::sync::Arc;

use eyre::{ensure, WrapErr};
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    chainspec::EraSchedule,
    client::{AlloyChainClient, ChainClient},
    config::RelayConfig,
    header::{self, EncodedHeader},
    pipeline::FulfillmentPipeline,
    sequencer::TransactionSequencer,
    subscriber::EventSubscriber,
    tracker::RequestTracker,
    version::relay_version_string,
};

/// A configured relay bound to a chain client.
#[derive(Debug)]
pub struct RandaoRelay<C> {
    client: Arc<C>,
    config: RelayConfig,
    tracker: Arc<RequestTracker>,
}

impl RandaoRelay<AlloyChainClient> {
    /// Connects to the node named in `config`.
    pub async fn connect(config: RelayConfig) -> eyre::Result<Self> {
        let client = AlloyChainClient::connect(&config.rpc_url).await?;
        Ok(Self::new(Arc::new(client), config))
    }
}

impl<C: ChainClient> RandaoRelay<C> {
    pub fn new(client: Arc<C>, config: RelayConfig) -> Self {
        Self { client, config, tracker: Arc::new(RequestTracker::new()) }
    }

    pub const fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Runs the relay. Only returns on startup failure or if the pipeline dies.
    pub async fn run(self) -> eyre::Result<()> {
        let Self { client, config, tracker } = self;
        ensure!(!config.contracts.is_empty(), "No consumer contracts configured");

        let chain_id = client.chain_id().await.wrap_err("Failed to query chain id")?;
        config.chain.ensure_chain_id(chain_id)?;

        let sequencer = TransactionSequencer::new(client.clone(), config.signer.clone(), chain_id)
            .with_gas_limit(config.gas_limit)
            .with_receipt_poll_interval(config.receipt_poll_interval);

        info!(
            target: "randao_relay::relay",
            version = relay_version_string(),
            chain = %config.chain.name,
            chain_id,
            relayer = %sequencer.address(),
            contracts = config.contracts.len(),
            from_block = ?config.from_block,
            "Starting RANDAO relay"
        );

        let pipeline = Arc::new(FulfillmentPipeline::new(
            client.clone(),
            config.chain.schedule,
            tracker.clone(),
            Arc::new(sequencer),
            config.pipeline,
        ));
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let subscriber = EventSubscriber::new(client, config.contracts, tracker, sender)
            .with_from_block(config.from_block)
            .with_reconnect_backoff(config.reconnect_backoff);

        let pipeline_task = tokio::spawn(pipeline.run(receiver));
        subscriber.run().await;
        pipeline_task.await.wrap_err("Fulfillment pipeline task failed")?;
        Ok(())
    }
}

/// Fetches block `number` once and verifies its encoding.
pub async fn fetch_verified_header<C: ChainClient>(
    client: &C,
    schedule: &EraSchedule,
    number: u64,
) -> eyre::Result<EncodedHeader> {
    let raw = client
        .block_header(number)
        .await
        .wrap_err_with(|| format!("Failed to fetch block {number}"))?
        .ok_or_else(|| eyre::eyre!("Block {number} is not known to the node"))?;
    ensure!(raw.number == number, "Requested block {number} but node returned {}", raw.number);
    Ok(header::verify(&raw, raw.hash, schedule.era_for(number))?)
}
