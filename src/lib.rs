//! randao-relay: delivers verifiable RANDAO values to on-chain consumers.
//!
//! Consumer contracts emit `RequestRandomness` naming one block (or an
//! ordered triple of blocks). The relay fetches those headers, rebuilds the
//! exact RLP encoding each block was hashed over, checks it hashes to the
//! block hash and calls `fulfillRandomness` with the encoded header(s). The
//! contract recomputes the hash against `blockhash(n)` and reads the
//! mix-hash, which carries the RANDAO reveal on proof-of-stake chains.
//!
//! ## Architecture
//!
//! ```text
//! EventSubscriber --mpsc--> FulfillmentPipeline --> TransactionSequencer
//!        \                      |                         |
//!         `-> RequestTracker <--'                     ChainClient
//! ```
//!
//! - [`header`]: per-era field layouts and hash verification
//! - [`chainspec`]: network profiles mapping block numbers to eras
//! - [`subscriber`]: log subscription, backfill and reconnects
//! - [`pipeline`]: fetch with backoff, verify, submit, confirm
//! - [`sequencer`]: nonce ownership, signing and broadcast
//! - [`tracker`]: in-memory request state and dedup
//!
//! ## Usage
//!
//! ```bash
//! randao-relay run \
//!   --rpc-url wss://sepolia.example/ws \
//!   --chain sepolia \
//!   --single-block-contract 0x... \
//!   --multi-block-contract 0x...
//!
//! randao-relay encode-header --rpc-url https://eth.example 19800000
//! ```

pub mod chainspec;
pub mod cli;
pub mod client;
pub mod config;
pub mod contracts;
pub mod header;
pub mod metrics;
pub mod pipeline;
pub mod relay;
pub mod sequencer;
pub mod subscriber;
pub mod tracker;
pub mod version;

pub use chainspec::{EraSchedule, RelayChainSpec, RelayChainSpecParser};
pub use client::{AlloyChainClient, CallbackReceipt, ChainClient, ClientError};
pub use config::{BackoffConfig, PipelineConfig, RelayConfig};
pub use contracts::{
    CallbackPayload, ContractVariant, RandomnessRequest, RequestId, RequestTarget, WatchedContract,
};
pub use header::{ConsensusEra, EncodedHeader, RawBlockHeader, VerificationError};
pub use pipeline::{FetchError, FulfillmentError, FulfillmentPipeline};
pub use relay::{fetch_verified_header, RandaoRelay};
pub use sequencer::{SubmissionError, TransactionSequencer, TxHandle};
pub use subscriber::{EventSubscriber, SubscriptionLost};
pub use tracker::{RequestState, RequestTracker, TrackerError};
