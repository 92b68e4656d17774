//! Shared fixtures: an in-memory chain implementing [`ChainClient`] and header builders.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use alloy_consensus::{Header, Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{keccak256, Address, Bloom, Bytes, TxHash, B256, B64, U256};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use randao_relay::{
    contracts::{MultiBlockConsumer, SingleBlockConsumer},
    BackoffConfig, CallbackReceipt, ChainClient, ClientError, ConsensusEra, EraSchedule,
    FulfillmentPipeline, PipelineConfig, RawBlockHeader, RequestTracker, TransactionSequencer,
};

pub(crate) const CHAIN_ID: u64 = 1337;
pub(crate) const RELAYER_KEY: &str =
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub(crate) fn relayer() -> PrivateKeySigner {
    RELAYER_KEY.parse().expect("valid relayer key")
}

/// Backoff short enough to keep retry tests fast.
pub(crate) const FAST_FETCH: BackoffConfig = BackoffConfig {
    min_delay: Duration::from_millis(1),
    max_delay: Duration::from_millis(5),
    max_retries: Some(5),
};

/// Consensus header carrying exactly the fields of `era`.
pub(crate) fn consensus_header(number: u64, era: ConsensusEra) -> Header {
    let seed = keccak256(number.to_be_bytes());
    let mut header = Header {
        parent_hash: keccak256(seed),
        beneficiary: Address::from_slice(&seed[12..]),
        state_root: B256::repeat_byte(0x5a),
        transactions_root: B256::repeat_byte(0x7b),
        receipts_root: B256::repeat_byte(0x3c),
        logs_bloom: Bloom::repeat_byte(0x01),
        number,
        gas_limit: 30_000_000,
        gas_used: 12_345_678,
        timestamp: 1_700_000_000 + number * 12,
        extra_data: Bytes::from_static(b"randao-relay fixture"),
        mix_hash: seed,
        ..Default::default()
    };

    if !era.is_proof_of_stake() {
        header.difficulty = U256::from(0x0b_c8d6_7a1c_u64);
        header.nonce = B64::new([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
    }
    if era >= ConsensusEra::London {
        header.base_fee_per_gas = Some(7 + number % 1_000);
    }
    if era >= ConsensusEra::Shanghai {
        header.withdrawals_root = Some(B256::repeat_byte(0xee));
    }
    if era >= ConsensusEra::Cancun {
        header.blob_gas_used = Some(393_216);
        header.excess_blob_gas = Some(0);
        header.parent_beacon_block_root = Some(B256::repeat_byte(0xbe));
    }
    if era >= ConsensusEra::Prague {
        header.requests_hash = Some(B256::repeat_byte(0xe7));
    }
    header
}

/// Raw header as a node would report it, declared hash included.
pub(crate) fn raw_header(number: u64, era: ConsensusEra) -> RawBlockHeader {
    let header = consensus_header(number, era);
    RawBlockHeader::new(header.hash_slow(), &header)
}

pub(crate) fn single_request_log(contract: Address, id: u64, block: u64, emitted_in: u64) -> Log {
    let event = SingleBlockConsumer::RequestRandomness {
        requestId: U256::from(id),
        blockNumber: U256::from(block),
    };
    request_log(contract, event.encode_log_data(), emitted_in)
}

pub(crate) fn triple_request_log(
    contract: Address,
    id: u64,
    blocks: [u64; 3],
    emitted_in: u64,
) -> Log {
    let event = MultiBlockConsumer::RequestRandomness {
        requestId: U256::from(id),
        blockNumberOne: U256::from(blocks[0]),
        blockNumberTwo: U256::from(blocks[1]),
        blockNumberThree: U256::from(blocks[2]),
    };
    request_log(contract, event.encode_log_data(), emitted_in)
}

fn request_log(address: Address, data: alloy_primitives::LogData, emitted_in: u64) -> Log {
    Log {
        inner: alloy_primitives::Log { address, data },
        block_number: Some(emitted_in),
        transaction_hash: Some(keccak256([address.as_slice(), &emitted_in.to_be_bytes()].concat())),
        log_index: Some(0),
        ..Default::default()
    }
}

/// A callback transaction accepted by [`FakeChain`].
#[derive(Debug, Clone)]
pub(crate) struct SentTx {
    pub(crate) hash: TxHash,
    pub(crate) nonce: u64,
    pub(crate) to: Option<Address>,
    pub(crate) input: Bytes,
    pub(crate) gas_limit: u64,
    pub(crate) chain_id: Option<u64>,
}

#[derive(Debug, Default)]
struct FakeState {
    head: u64,
    headers: HashMap<u64, RawBlockHeader>,
    /// Remaining `None` answers per block before the header shows up.
    unavailable: HashMap<u64, usize>,
    header_requests: HashMap<u64, usize>,
    account_nonce: u64,
    nonce_queries: usize,
    broadcast_failures: VecDeque<ClientError>,
    sent: Vec<SentTx>,
    reverting: HashSet<TxHash>,
    revert_next: bool,
    receipt_failures: usize,
    receipt_queries: usize,
    logs: Vec<Log>,
    log_queries: Vec<(Option<u64>, Option<u64>)>,
    subscriptions: Vec<mpsc::UnboundedSender<Log>>,
    subscribe_calls: usize,
    subscribe_failures: usize,
}

/// In-memory chain. Every accepted transaction is mined immediately.
#[derive(Debug, Default)]
pub(crate) struct FakeChain {
    state: Mutex<FakeState>,
}

#[allow(dead_code)]
impl FakeChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub(crate) fn insert_header(&self, raw: RawBlockHeader) {
        let mut state = self.state.lock();
        state.head = state.head.max(raw.number);
        state.headers.insert(raw.number, raw);
    }

    pub(crate) fn insert_block(&self, number: u64, era: ConsensusEra) -> RawBlockHeader {
        let raw = raw_header(number, era);
        self.insert_header(raw.clone());
        raw
    }

    /// Makes block `number` unknown for the next `times` lookups.
    pub(crate) fn delay_block(&self, number: u64, times: usize) {
        self.state.lock().unavailable.insert(number, times);
    }

    pub(crate) fn header_requests(&self, number: u64) -> usize {
        self.state.lock().header_requests.get(&number).copied().unwrap_or_default()
    }

    /// Simulates another sender using the relayer account.
    pub(crate) fn bump_account_nonce(&self) {
        self.state.lock().account_nonce += 1;
    }

    pub(crate) fn nonce_queries(&self) -> usize {
        self.state.lock().nonce_queries
    }

    /// Fails the next broadcast with `err` before any nonce check.
    pub(crate) fn fail_next_broadcast(&self, err: ClientError) {
        self.state.lock().broadcast_failures.push_back(err);
    }

    pub(crate) fn revert_next(&self) {
        self.state.lock().revert_next = true;
    }

    /// Fails the next `times` receipt lookups with a transport error.
    pub(crate) fn fail_next_receipts(&self, times: usize) {
        self.state.lock().receipt_failures = times;
    }

    pub(crate) fn receipt_queries(&self) -> usize {
        self.state.lock().receipt_queries
    }

    pub(crate) fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    /// Adds a log to history and pushes it to live subscriptions.
    pub(crate) fn emit(&self, log: Log) {
        let mut state = self.state.lock();
        if let Some(number) = log.block_number {
            state.head = state.head.max(number);
        }
        state.subscriptions.retain(|sender| sender.unbounded_send(log.clone()).is_ok());
        state.logs.push(log);
    }

    /// Adds a log to history only, as if it was emitted while disconnected.
    pub(crate) fn emit_unseen(&self, log: Log) {
        let mut state = self.state.lock();
        if let Some(number) = log.block_number {
            state.head = state.head.max(number);
        }
        state.logs.push(log);
    }

    /// Ends every live subscription stream.
    pub(crate) fn drop_subscriptions(&self) {
        self.state.lock().subscriptions.clear();
    }

    pub(crate) fn live_subscriptions(&self) -> usize {
        self.state.lock().subscriptions.iter().filter(|sender| !sender.is_closed()).count()
    }

    pub(crate) fn fail_next_subscribes(&self, times: usize) {
        self.state.lock().subscribe_failures = times;
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub(crate) fn log_queries(&self) -> Vec<(Option<u64>, Option<u64>)> {
        self.state.lock().log_queries.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(CHAIN_ID)
    }

    async fn latest_block_number(&self) -> Result<u64, ClientError> {
        Ok(self.state.lock().head)
    }

    async fn block_header(&self, number: u64) -> Result<Option<RawBlockHeader>, ClientError> {
        let mut state = self.state.lock();
        *state.header_requests.entry(number).or_default() += 1;
        if let Some(remaining) = state.unavailable.get_mut(&number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state.headers.get(&number).cloned())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        let mut state = self.state.lock();
        let (from, to) = (filter.get_from_block(), filter.get_to_block());
        state.log_queries.push((from, to));
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let number = log.block_number.unwrap_or_default();
                from.is_none_or(|from| number >= from) && to.is_none_or(|to| number <= to)
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(
        &self,
        _filter: &Filter,
    ) -> Result<randao_relay::client::LogStream, ClientError> {
        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded();
        state.subscriptions.push(sender);
        Ok(Box::pin(receiver))
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, ClientError> {
        let mut state = self.state.lock();
        state.nonce_queries += 1;
        Ok(state.account_nonce)
    }

    async fn gas_price(&self) -> Result<u128, ClientError> {
        Ok(1_000_000_000)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ClientError> {
        let mut state = self.state.lock();
        if let Some(err) = state.broadcast_failures.pop_front() {
            return Err(err);
        }

        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|err| ClientError::Rpc { code: -32602, message: err.to_string() })?;
        let nonce = envelope.nonce();
        if nonce < state.account_nonce {
            return Err(rejection(format!(
                "nonce too low: next nonce {}, tx nonce {nonce}",
                state.account_nonce
            )));
        }
        if nonce > state.account_nonce {
            return Err(rejection(format!(
                "nonce too high: next nonce {}, tx nonce {nonce}",
                state.account_nonce
            )));
        }

        let hash = *envelope.tx_hash();
        state.account_nonce += 1;
        if std::mem::take(&mut state.revert_next) {
            state.reverting.insert(hash);
        }
        state.sent.push(SentTx {
            hash,
            nonce,
            to: envelope.to(),
            input: envelope.input().clone(),
            gas_limit: envelope.gas_limit(),
            chain_id: envelope.chain_id(),
        });
        Ok(hash)
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<CallbackReceipt>, ClientError> {
        let mut state = self.state.lock();
        state.receipt_queries += 1;
        if state.receipt_failures > 0 {
            state.receipt_failures -= 1;
            return Err(ClientError::Transport("receipt lookup timed out".to_string()));
        }
        let Some(index) = state.sent.iter().position(|tx| tx.hash == hash) else {
            return Ok(None);
        };
        Ok(Some(CallbackReceipt {
            tx_hash: hash,
            block_number: Some(state.head + 1 + index as u64),
            gas_used: 180_000,
            success: !state.reverting.contains(&hash),
        }))
    }
}

fn rejection(message: String) -> ClientError {
    ClientError::Rpc { code: -32000, message }
}

/// Pipeline wired to a fake chain with fast retries.
#[allow(dead_code)]
pub(crate) struct Harness {
    pub(crate) chain: Arc<FakeChain>,
    pub(crate) tracker: Arc<RequestTracker>,
    pub(crate) sequencer: Arc<TransactionSequencer<FakeChain>>,
    pub(crate) pipeline: Arc<FulfillmentPipeline<FakeChain>>,
}

#[allow(dead_code)]
pub(crate) fn harness(schedule: EraSchedule) -> Harness {
    let chain = Arc::new(FakeChain::new());
    let tracker = Arc::new(RequestTracker::new());
    let sequencer = Arc::new(
        TransactionSequencer::new(chain.clone(), relayer(), CHAIN_ID)
            .with_receipt_poll_interval(Duration::from_millis(1)),
    );
    let pipeline = Arc::new(FulfillmentPipeline::new(
        chain.clone(),
        schedule,
        tracker.clone(),
        sequencer.clone(),
        PipelineConfig { fetch_backoff: FAST_FETCH, max_concurrent_fulfillments: 4 },
    ));
    Harness { chain, tracker, sequencer, pipeline }
}
