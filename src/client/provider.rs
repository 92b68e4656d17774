//! [`ChainClient`] backed by an alloy provider.

use std::fmt;

use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, Log};
use alloy_transport::{RpcError, TransportError};
use async_trait::async_trait;
use eyre::WrapErr;
use tracing::info;
use url::Url;

use super::{CallbackReceipt, ChainClient, ClientError, LogStream};
use crate::header::RawBlockHeader;

/// Chain client over HTTP, WebSocket or IPC, picked from the URL scheme.
///
/// Log subscriptions need a pub-sub transport, so the relay itself should be
/// pointed at a `ws://`/`wss://` endpoint. HTTP is enough for one-off header
/// encoding.
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: DynProvider,
    url: Url,
}

impl AlloyChainClient {
    /// Connects to `url`. No fillers are installed: nonce and gas are owned by the sequencer.
    pub async fn connect(url: &Url) -> eyre::Result<Self> {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect(url.as_str())
            .await
            .wrap_err_with(|| format!("Failed to connect to chain node at {url}"))?
            .erased();

        info!(target: "randao_relay::client", %url, "Connected to chain node");
        Ok(Self { provider, url: url.clone() })
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Debug for AlloyChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlloyChainClient")
            .field("url", &self.url.as_str())
            .field("provider", &"<dyn Provider>")
            .finish()
    }
}

fn client_error(err: TransportError) -> ClientError {
    match err {
        RpcError::ErrorResp(payload) => {
            ClientError::Rpc { code: payload.code, message: payload.message.to_string() }
        }
        other => ClientError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.provider.get_chain_id().await.map_err(client_error)
    }

    async fn latest_block_number(&self) -> Result<u64, ClientError> {
        self.provider.get_block_number().await.map_err(client_error)
    }

    async fn block_header(&self, number: u64) -> Result<Option<RawBlockHeader>, ClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(client_error)?;
        Ok(block.map(|block| RawBlockHeader::from(block.header)))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        self.provider.get_logs(filter).await.map_err(client_error)
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, ClientError> {
        let subscription = self.provider.subscribe_logs(filter).await.map_err(client_error)?;
        Ok(Box::pin(subscription.into_stream()))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ClientError> {
        self.provider.get_transaction_count(address).pending().await.map_err(client_error)
    }

    async fn gas_price(&self) -> Result<u128, ClientError> {
        self.provider.get_gas_price().await.map_err(client_error)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ClientError> {
        let pending = self.provider.send_raw_transaction(&raw).await.map_err(client_error)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<CallbackReceipt>, ClientError> {
        let receipt = self.provider.get_transaction_receipt(hash).await.map_err(client_error)?;
        Ok(receipt.map(|receipt| CallbackReceipt {
            tx_hash: receipt.transaction_hash(),
            block_number: receipt.block_number(),
            gas_used: receipt.gas_used(),
            success: receipt.status(),
        }))
    }
}
