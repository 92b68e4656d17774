//! Callback transaction construction, signing and broadcast.
//!
//! All callbacks are sent from one relayer account, so nonce assignment is
//! the only cross-request critical section in the relay. The sequencer owns
//! the next nonce behind an async mutex and holds it across gas-price lookup,
//! signing and broadcast. The counter only moves after the node accepted the
//! transaction, so a rejected broadcast never leaves a gap.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSigner;
use alloy_primitives::{Address, Bytes, TxHash, TxKind, U256};
use alloy_signer_local::PrivateKeySigner;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    client::{CallbackReceipt, ChainClient, ClientError},
    contracts::{CallbackPayload, RandomnessRequest, RequestId},
    metrics::SequencerMetrics,
};

/// Default gas limit of `fulfillRandomness` callbacks.
pub const DEFAULT_CALLBACK_GAS_LIMIT: u64 = 2_000_000;

/// Node error fragments that mean "this nonce is already taken".
const STALE_NONCE_MESSAGES: &[&str] = &[
    "nonce too low",
    "already known",
    "replacement transaction underpriced",
    "known transaction",
    "nonce has already been used",
];

/// A broadcast callback transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle {
    pub request: RequestId,
    pub tx_hash: TxHash,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The nonce was still stale after one resynchronisation.
    #[error("nonce {nonce} rejected as stale after resync: {message}")]
    StaleNonce { nonce: u64, message: String },
    #[error("callback rejected by node (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("callback {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to sign callback: {0}")]
    Signing(String),
}

impl SubmissionError {
    /// Short label used for metrics and logs.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::StaleNonce { .. } => "stale_nonce",
            Self::Rejected { .. } => "rejected",
            Self::Reverted { .. } => "reverted",
            Self::Client(_) => "client",
            Self::Signing(_) => "signing",
        }
    }
}

fn is_stale_nonce(err: &ClientError) -> bool {
    err.rpc_message().is_some_and(|message| {
        let message = message.to_ascii_lowercase();
        STALE_NONCE_MESSAGES.iter().any(|fragment| message.contains(fragment))
    })
}

/// Signs and broadcasts callbacks with strictly increasing nonces.
#[derive(Debug)]
pub struct TransactionSequencer<C> {
    client: Arc<C>,
    signer: PrivateKeySigner,
    chain_id: u64,
    gas_limit: u64,
    receipt_poll_interval: Duration,
    /// `None` until first use or after the cached value became untrustworthy.
    next_nonce: Mutex<Option<u64>>,
    metrics: SequencerMetrics,
}

impl<C: ChainClient> TransactionSequencer<C> {
    pub fn new(client: Arc<C>, signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            client,
            signer,
            chain_id,
            gas_limit: DEFAULT_CALLBACK_GAS_LIMIT,
            receipt_poll_interval: Duration::from_secs(2),
            next_nonce: Mutex::new(None),
            metrics: SequencerMetrics::default(),
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// Relayer account address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sends the `fulfillRandomness` callback for `request`.
    pub async fn submit(
        &self,
        request: &RandomnessRequest,
        payload: &CallbackPayload,
    ) -> Result<TxHandle, SubmissionError> {
        let to = request.id.contract;
        let input = payload.calldata(request.id.id);

        let mut next_nonce = self.next_nonce.lock().await;
        let mut resynced = false;
        loop {
            let nonce = match *next_nonce {
                Some(nonce) => nonce,
                None => {
                    let nonce = self.client.transaction_count(self.address()).await?;
                    debug!(
                        target: "randao_relay::sequencer",
                        nonce,
                        "Synchronised nonce from chain"
                    );
                    *next_nonce = Some(nonce);
                    nonce
                }
            };

            let gas_price = self.client.gas_price().await?;
            let raw = self.sign(to, nonce, gas_price, input.clone()).await?;

            let started = Instant::now();
            match self.client.send_raw_transaction(raw).await {
                Ok(tx_hash) => {
                    *next_nonce = Some(nonce + 1);
                    self.metrics.record_broadcast(started.elapsed(), nonce + 1);
                    info!(
                        target: "randao_relay::sequencer",
                        request = %request.id,
                        %tx_hash,
                        nonce,
                        gas_price,
                        "Broadcast callback transaction"
                    );
                    return Ok(TxHandle { request: request.id, tx_hash, nonce });
                }
                Err(err) if is_stale_nonce(&err) => {
                    *next_nonce = None;
                    let message = err.rpc_message().unwrap_or_default().to_string();
                    if resynced {
                        return Err(SubmissionError::StaleNonce { nonce, message });
                    }
                    resynced = true;
                    self.metrics.record_resync();
                    warn!(
                        target: "randao_relay::sequencer",
                        request = %request.id,
                        nonce,
                        %message,
                        "Nonce rejected as stale, resynchronising"
                    );
                }
                Err(ClientError::Rpc { code, message }) => {
                    return Err(SubmissionError::Rejected { code, message });
                }
                Err(err @ ClientError::Transport(_)) => {
                    // Unknown whether the node took the transaction.
                    *next_nonce = None;
                    return Err(err.into());
                }
            }
        }
    }

    /// Polls until the callback is mined. Never gives up on its own.
    ///
    /// Errors while polling are logged and polled through: the transaction is
    /// already in the mempool. Only a reverted receipt ends the wait with an error.
    pub async fn confirm(&self, handle: &TxHandle) -> Result<CallbackReceipt, SubmissionError> {
        loop {
            match self.client.transaction_receipt(handle.tx_hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(SubmissionError::Reverted { tx_hash: handle.tx_hash });
                }
                Ok(Some(receipt)) => {
                    info!(
                        target: "randao_relay::sequencer",
                        request = %handle.request,
                        tx_hash = %handle.tx_hash,
                        block = ?receipt.block_number,
                        gas_used = receipt.gas_used,
                        "Callback confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(err) => {
                    self.metrics.record_receipt_error();
                    warn!(
                        target: "randao_relay::sequencer",
                        request = %handle.request,
                        tx_hash = %handle.tx_hash,
                        %err,
                        "Receipt lookup failed, still waiting"
                    );
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn sign(
        &self,
        to: Address,
        nonce: u64,
        gas_price: u128,
        input: Bytes,
    ) -> Result<Bytes, SubmissionError> {
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input,
        };
        let signature = self
            .signer
            .sign_transaction(&mut tx)
            .await
            .map_err(|err| SubmissionError::Signing(err.to_string()))?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        Ok(envelope.encoded_2718().into())
    }
}
