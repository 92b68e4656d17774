//! Access to the chain node.
//!
//! Everything the relay needs from a node goes through [`ChainClient`]: block
//! headers for the codec, logs and log subscriptions for the subscriber, and
//! nonce/gas/broadcast/receipt calls for the sequencer. Production uses the
//! alloy provider in [`provider`]; tests plug in an in-memory chain.

pub mod provider;

use std::pin::Pin;

use alloy_primitives::{Address, Bytes, TxHash};
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use provider::AlloyChainClient;
use crate::header::RawBlockHeader;

/// Live stream of logs from a subscription. Ends when the subscription is lost.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// Errors reported by a [`ChainClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request never got a JSON-RPC answer (connection, timeout, decoding).
    #[error("transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("JSON-RPC error (code {code}): {message}")]
    Rpc { code: i64, message: String },
}

impl ClientError {
    /// Message of a node-side rejection, if this is one.
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            Self::Rpc { message, .. } => Some(message),
            Self::Transport(_) => None,
        }
    }
}

/// Outcome of a mined callback transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// `false` when execution reverted.
    pub success: bool,
}

/// The subset of the Ethereum JSON-RPC API the relay depends on.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// `eth_chainId`.
    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// `eth_blockNumber`.
    async fn latest_block_number(&self) -> Result<u64, ClientError>;

    /// Header of block `number`, or `None` if the node does not know it yet.
    async fn block_header(&self, number: u64) -> Result<Option<RawBlockHeader>, ClientError>;

    /// `eth_getLogs`.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError>;

    /// `eth_subscribe("logs", filter)`.
    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, ClientError>;

    /// Pending transaction count of `address`, i.e. its next usable nonce.
    async fn transaction_count(&self, address: Address) -> Result<u64, ClientError>;

    /// `eth_gasPrice`.
    async fn gas_price(&self) -> Result<u128, ClientError>;

    /// `eth_sendRawTransaction`.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ClientError>;

    /// `eth_getTransactionReceipt`.
    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<CallbackReceipt>, ClientError>;
}
