//! `RequestRandomness` intake.
//!
//! One log subscription covers every watched contract. After a reconnect the
//! gap is backfilled starting at the last seen block, so the first backfilled
//! block overlaps what was already streamed. Logs handled in blocks at or past
//! the cursor are remembered and skipped on that overlap, even when their
//! request was confirmed and evicted from the tracker in the meantime. Logs
//! that get through are recorded in the tracker and only forwarded to the
//! pipeline when the tracker had not seen the request yet.

use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::TxHash;
use alloy_rpc_types_eth::{Filter, Log};
use backon::BackoffBuilder;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    client::{ChainClient, ClientError},
    config::BackoffConfig,
    contracts::{DecodeError, RandomnessRequest, WatchedContract},
    metrics::SubscriberMetrics,
    tracker::RequestTracker,
};

/// Why a subscription session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionLost {
    #[error("failed to open log subscription: {0}")]
    Subscribe(ClientError),
    #[error("failed to backfill logs: {0}")]
    Backfill(ClientError),
    #[error("log subscription stream ended")]
    Ended,
}

/// The pipeline hung up; the subscriber has nobody left to feed.
#[derive(Debug)]
struct ChannelClosed;

/// Watches the configured consumer contracts and feeds new requests to the pipeline.
#[derive(Debug)]
pub struct EventSubscriber<C> {
    client: Arc<C>,
    contracts: Vec<WatchedContract>,
    tracker: Arc<RequestTracker>,
    requests: mpsc::Sender<RandomnessRequest>,
    from_block: Option<u64>,
    reconnect_backoff: BackoffConfig,
    metrics: SubscriberMetrics,
}

impl<C: ChainClient> EventSubscriber<C> {
    pub fn new(
        client: Arc<C>,
        contracts: Vec<WatchedContract>,
        tracker: Arc<RequestTracker>,
        requests: mpsc::Sender<RandomnessRequest>,
    ) -> Self {
        Self {
            client,
            contracts,
            tracker,
            requests,
            from_block: None,
            reconnect_backoff: BackoffConfig::RECONNECT,
            metrics: SubscriberMetrics::default(),
        }
    }

    /// Backfills from `block` on startup instead of starting at the head.
    pub fn with_from_block(mut self, block: Option<u64>) -> Self {
        self.from_block = block;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Filter matching every watched contract and both event signatures.
    pub fn filter(&self) -> Filter {
        let mut addresses: Vec<_> =
            self.contracts.iter().map(|contract| contract.address).collect();
        addresses.sort_unstable();
        addresses.dedup();
        let mut topics: Vec<_> =
            self.contracts.iter().map(|contract| contract.variant.request_topic()).collect();
        topics.sort_unstable();
        topics.dedup();
        Filter::new().address(addresses).event_signature(topics)
    }

    /// Runs until the request channel is closed. Lost subscriptions are
    /// reopened with backoff and the gap since the last seen block is backfilled.
    pub async fn run(self) {
        let mut cursor = LogCursor::new(self.from_block);
        let mut backoff = self.reconnect_backoff.builder().build();

        loop {
            let lost = match self.session(&mut cursor).await {
                Ok(ChannelClosed) => break,
                Err(lost) => lost,
            };
            if self.requests.is_closed() {
                break;
            }
            if lost == SubscriptionLost::Ended {
                // The session was healthy up to now, start the schedule over.
                backoff = self.reconnect_backoff.builder().build();
            }

            self.metrics.record_reconnect();
            let delay = backoff.next().unwrap_or(self.reconnect_backoff.max_delay);
            warn!(
                target: "randao_relay::subscriber",
                %lost,
                ?delay,
                resume_from = ?cursor.block,
                "Log subscription lost, resubscribing"
            );
            tokio::time::sleep(delay).await;
        }

        info!(target: "randao_relay::subscriber", "Request channel closed, subscriber stopped");
    }

    /// One subscription lifetime: subscribe, backfill from the cursor, stream.
    async fn session(&self, cursor: &mut LogCursor) -> Result<ChannelClosed, SubscriptionLost> {
        let filter = self.filter();
        let mut stream =
            self.client.subscribe_logs(&filter).await.map_err(SubscriptionLost::Subscribe)?;
        let head = self.client.latest_block_number().await.map_err(SubscriptionLost::Backfill)?;
        info!(
            target: "randao_relay::subscriber",
            head,
            contracts = self.contracts.len(),
            "Subscribed to request events"
        );

        if let Some(from) = cursor.block {
            if from <= head {
                let range = filter.clone().from_block(from).to_block(head);
                let logs = self.client.logs(&range).await.map_err(SubscriptionLost::Backfill)?;
                info!(
                    target: "randao_relay::subscriber",
                    from,
                    to = head,
                    logs = logs.len(),
                    "Backfilled request events"
                );
                for log in &logs {
                    if self.handle_log(log, cursor).await.is_err() {
                        return Ok(ChannelClosed);
                    }
                }
            }
        }
        cursor.advance(head);

        loop {
            tokio::select! {
                _ = self.requests.closed() => return Ok(ChannelClosed),
                log = stream.next() => {
                    let Some(log) = log else { return Err(SubscriptionLost::Ended) };
                    if self.handle_log(&log, cursor).await.is_err() {
                        return Ok(ChannelClosed);
                    }
                }
            }
        }
    }

    async fn handle_log(&self, log: &Log, cursor: &mut LogCursor) -> Result<(), ChannelClosed> {
        if log.removed {
            cursor.forget(log);
            debug!(
                target: "randao_relay::subscriber",
                tx = ?log.transaction_hash,
                block = ?log.block_number,
                "Skipping removed log"
            );
            return Ok(());
        }
        if let Some(number) = log.block_number {
            cursor.advance(number);
        }
        if !cursor.first_sight(log) {
            debug!(
                target: "randao_relay::subscriber",
                tx = ?log.transaction_hash,
                index = ?log.log_index,
                "Skipping already handled log"
            );
            return Ok(());
        }

        let request = match self.decode(log) {
            Ok(request) => request,
            Err(err) => {
                self.metrics.record_undecodable();
                warn!(
                    target: "randao_relay::subscriber",
                    %err,
                    address = %log.address(),
                    tx = ?log.transaction_hash,
                    "Skipping undecodable log"
                );
                return Ok(());
            }
        };

        let fresh = self.tracker.record(request.clone());
        self.metrics.record_request(fresh);
        if !fresh {
            return Ok(());
        }

        info!(
            target: "randao_relay::subscriber",
            request = %request.id,
            variant = %request.variant,
            blocks = ?request.target.block_numbers(),
            "Observed randomness request"
        );
        self.requests.send(request).await.map_err(|_| ChannelClosed)
    }

    fn decode(&self, log: &Log) -> Result<RandomnessRequest, DecodeError> {
        let topic = log.topic0();
        let contract = self
            .contracts
            .iter()
            .find(|contract| {
                contract.address == log.address()
                    && topic == Some(&contract.variant.request_topic())
            })
            .or_else(|| self.contracts.iter().find(|contract| contract.address == log.address()))
            .ok_or(DecodeError::UnexpectedEmitter(log.address()))?;
        RandomnessRequest::from_log(*contract, log)
    }
}

/// `(block, transaction, log index)` of a handled log.
type LogKey = (u64, TxHash, u64);

/// Resume point of the subscription plus the logs already handled at or past it.
#[derive(Debug, Default)]
struct LogCursor {
    /// Highest block seen. Backfills start here, inclusive.
    block: Option<u64>,
    handled: BTreeSet<LogKey>,
}

impl LogCursor {
    fn new(block: Option<u64>) -> Self {
        Self { block, handled: BTreeSet::new() }
    }

    fn advance(&mut self, block: u64) {
        let block = self.block.map_or(block, |current| current.max(block));
        self.block = Some(block);
        // Blocks below the cursor are never backfilled again.
        self.handled = self.handled.split_off(&(block, TxHash::ZERO, 0));
    }

    /// Returns `false` if `log` was handled before. Logs missing their
    /// position are always treated as new.
    fn first_sight(&mut self, log: &Log) -> bool {
        key(log).is_none_or(|key| self.handled.insert(key))
    }

    fn forget(&mut self, log: &Log) {
        if let Some(key) = key(log) {
            self.handled.remove(&key);
        }
    }
}

fn key(log: &Log) -> Option<LogKey> {
    Some((log.block_number?, log.transaction_hash?, log.log_index?))
}
