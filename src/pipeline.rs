//! Request fulfillment: fetch, verify, submit, confirm.
//!
//! Every request is handled start to finish by [`FulfillmentPipeline::fulfill`].
//! Header fetches are retried with exponential backoff since a request may
//! name a block the node has not imported yet. Verification failures are
//! terminal. Nothing is submitted until every header of the request verified.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use backon::Retryable as _;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    chainspec::EraSchedule,
    client::{ChainClient, ClientError},
    config::PipelineConfig,
    contracts::{CallbackPayload, RandomnessRequest, RequestTarget},
    header::{self, EncodedHeader, RawBlockHeader, VerificationError},
    metrics::PipelineMetrics,
    sequencer::{SubmissionError, TransactionSequencer, TxHandle},
    tracker::{RequestTracker, TrackerError},
};

/// Header retrieval failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("block {0} is not available yet")]
    NotYetAvailable(u64),
    #[error("failed to fetch block {number}: {source}")]
    Client { number: u64, source: ClientError },
    /// The node answered with another block than the one requested.
    #[error("requested block {requested} but node returned block {returned}")]
    WrongBlock { requested: u64, returned: u64 },
}

impl FetchError {
    const fn is_transient(&self) -> bool {
        !matches!(self, Self::WrongBlock { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl FulfillmentError {
    /// Metrics label.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Verification(VerificationError::HashMismatch { .. }) => "hash_mismatch",
            Self::Verification(VerificationError::MissingField { .. }) => "missing_field",
            Self::Submission(err) => err.reason(),
            Self::Tracker(_) => "tracker",
        }
    }
}

/// Drives requests from the subscriber channel to confirmed callbacks.
#[derive(Debug)]
pub struct FulfillmentPipeline<C> {
    client: Arc<C>,
    schedule: EraSchedule,
    tracker: Arc<RequestTracker>,
    sequencer: Arc<TransactionSequencer<C>>,
    config: PipelineConfig,
    metrics: PipelineMetrics,
}

impl<C: ChainClient> FulfillmentPipeline<C> {
    pub fn new(
        client: Arc<C>,
        schedule: EraSchedule,
        tracker: Arc<RequestTracker>,
        sequencer: Arc<TransactionSequencer<C>>,
        config: PipelineConfig,
    ) -> Self {
        Self { client, schedule, tracker, sequencer, config, metrics: PipelineMetrics::default() }
    }

    /// Consumes requests until the channel closes, one task per request.
    ///
    /// In-flight fulfillments are awaited before returning; broadcast
    /// callbacks are never abandoned.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<RandomnessRequest>) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fulfillments.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let Ok(permit) = permits.clone().acquire_owned().await else { break };
                    let pipeline = Arc::clone(&self);
                    tasks.spawn(async move {
                        let _permit = permit;
                        // Failures are logged and counted inside `fulfill`.
                        let _ = pipeline.fulfill(&request).await;
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        error!(target: "randao_relay::pipeline", %err, "Fulfillment task panicked");
                    }
                }
            }
        }

        info!(
            target: "randao_relay::pipeline",
            in_flight = tasks.len(),
            "Request channel closed, draining fulfillments"
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(target: "randao_relay::pipeline", %err, "Fulfillment task panicked");
            }
        }
    }

    /// Fulfills one tracked request and records the outcome in the tracker.
    pub async fn fulfill(&self, request: &RandomnessRequest) -> Result<TxHandle, FulfillmentError> {
        let started = Instant::now();
        self.metrics.fulfillment_started();
        let result = self.try_fulfill(request).await;
        self.metrics.fulfillment_finished();

        match &result {
            Ok(handle) => {
                self.metrics.record_fulfilled(started.elapsed());
                info!(
                    target: "randao_relay::pipeline",
                    request = %request.id,
                    tx_hash = %handle.tx_hash,
                    nonce = handle.nonce,
                    "Request fulfilled"
                );
            }
            Err(err) => {
                self.metrics.record_failed(err.reason());
                error!(
                    target: "randao_relay::pipeline",
                    request = %request.id,
                    blocks = ?request.target.block_numbers(),
                    reason = err.reason(),
                    %err,
                    "Request failed"
                );
                if let Err(tracker_err) = self.tracker.mark_failed(&request.id, &err.to_string()) {
                    warn!(
                        target: "randao_relay::pipeline",
                        %tracker_err,
                        "Could not mark request failed"
                    );
                }
            }
        }
        result
    }

    async fn try_fulfill(&self, request: &RandomnessRequest) -> Result<TxHandle, FulfillmentError> {
        let payload = match request.target {
            RequestTarget::Single(number) => {
                CallbackPayload::Single(self.verified_header(number).await?)
            }
            RequestTarget::Triple([first, second, third]) => CallbackPayload::Triple([
                self.verified_header(first).await?,
                self.verified_header(second).await?,
                self.verified_header(third).await?,
            ]),
        };
        self.tracker.mark_verified(&request.id)?;

        let handle = self.sequencer.submit(request, &payload).await?;
        self.tracker.mark_submitted(&request.id, handle.tx_hash, handle.nonce)?;

        self.sequencer.confirm(&handle).await?;
        self.tracker.mark_confirmed(&request.id)?;
        Ok(handle)
    }

    /// Fetches block `number` and verifies its encoding against the declared hash.
    pub async fn verified_header(&self, number: u64) -> Result<EncodedHeader, FulfillmentError> {
        let raw = self.fetch_header(number).await?;
        let era = self.schedule.era_for(number);
        let encoded = header::verify(&raw, raw.hash, era).inspect_err(|err| {
            if let VerificationError::HashMismatch { computed, declared, .. } = err {
                error!(
                    target: "randao_relay::pipeline",
                    number,
                    %era,
                    %computed,
                    %declared,
                    "Header hash mismatch"
                );
            }
        })?;
        debug!(
            target: "randao_relay::pipeline",
            number,
            %era,
            randao = %encoded.randao(),
            "Header verified"
        );
        Ok(encoded)
    }

    async fn fetch_header(&self, number: u64) -> Result<RawBlockHeader, FetchError> {
        (|| async {
            let raw = self
                .client
                .block_header(number)
                .await
                .map_err(|source| FetchError::Client { number, source })?
                .ok_or(FetchError::NotYetAvailable(number))?;
            if raw.number != number {
                return Err(FetchError::WrongBlock { requested: number, returned: raw.number });
            }
            Ok(raw)
        })
        .retry(self.config.fetch_backoff.builder())
        .when(FetchError::is_transient)
        .notify(|err: &FetchError, delay: Duration| {
            self.metrics.record_fetch_retry();
            debug!(target: "randao_relay::pipeline", number, %err, ?delay, "Retrying header fetch");
        })
        .await
    }
}
