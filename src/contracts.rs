//! Wire contract of the randomness consumers.
//!
//! Two consumer variants exist: one asks for a single block, the other for an
//! ordered triple. Both emit `RequestRandomness` (with different signatures,
//! hence different topics) and expose `fulfillRandomness` as the callback.

use std::fmt;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::{sol, SolCall, SolEvent};
use derive_more::Display;
use thiserror::Error;

use crate::header::EncodedHeader;

sol! {
    /// Consumer fulfilled with a single block header.
    interface SingleBlockConsumer {
        event RequestRandomness(uint256 requestId, uint256 blockNumber);

        function fulfillRandomness(uint256 requestId, bytes header) external;
    }

    /// Consumer fulfilled with three block headers, in request order.
    interface MultiBlockConsumer {
        event RequestRandomness(
            uint256 requestId,
            uint256 blockNumberOne,
            uint256 blockNumberTwo,
            uint256 blockNumberThree
        );

        function fulfillRandomness(uint256 requestId, bytes[3] headers) external;
    }
}

/// Which consumer ABI a watched contract speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContractVariant {
    #[display("single-block")]
    SingleBlock,
    #[display("multi-block")]
    MultiBlock,
}

impl ContractVariant {
    /// Topic0 of this variant's `RequestRandomness` event.
    pub const fn request_topic(self) -> B256 {
        match self {
            Self::SingleBlock => SingleBlockConsumer::RequestRandomness::SIGNATURE_HASH,
            Self::MultiBlock => MultiBlockConsumer::RequestRandomness::SIGNATURE_HASH,
        }
    }
}

/// A consumer contract the relay listens to and calls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchedContract {
    pub address: Address,
    pub variant: ContractVariant,
}

/// Identity of a request: the consumer that emitted it plus its `requestId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    pub contract: Address,
    pub id: U256,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.contract, self.id)
    }
}

/// Block numbers a request wants headers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestTarget {
    Single(u64),
    /// Position matters: the consumer reads the headers back by index.
    Triple([u64; 3]),
}

impl RequestTarget {
    pub fn block_numbers(&self) -> &[u64] {
        match self {
            Self::Single(number) => std::slice::from_ref(number),
            Self::Triple(numbers) => numbers,
        }
    }
}

/// A decoded randomness request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomnessRequest {
    pub id: RequestId,
    pub variant: ContractVariant,
    pub target: RequestTarget,
    /// Block that carried the request event, if the node reported it.
    pub emitted_in_block: Option<u64>,
    pub emitted_in_tx: Option<TxHash>,
}

impl RandomnessRequest {
    /// Decodes a `RequestRandomness` log emitted by `contract`.
    pub fn from_log(contract: WatchedContract, log: &Log) -> Result<Self, DecodeError> {
        if log.address() != contract.address {
            return Err(DecodeError::UnexpectedEmitter(log.address()));
        }
        if log.topic0() != Some(&contract.variant.request_topic()) {
            return Err(DecodeError::UnknownEvent(log.topic0().copied()));
        }

        let (request_id, target) = match contract.variant {
            ContractVariant::SingleBlock => {
                let event = SingleBlockConsumer::RequestRandomness::decode_log_data(log.data())
                    .map_err(|err| DecodeError::Abi(err.to_string()))?;
                (event.requestId, RequestTarget::Single(block_number(event.blockNumber)?))
            }
            ContractVariant::MultiBlock => {
                let event = MultiBlockConsumer::RequestRandomness::decode_log_data(log.data())
                    .map_err(|err| DecodeError::Abi(err.to_string()))?;
                let numbers = [
                    block_number(event.blockNumberOne)?,
                    block_number(event.blockNumberTwo)?,
                    block_number(event.blockNumberThree)?,
                ];
                (event.requestId, RequestTarget::Triple(numbers))
            }
        };

        Ok(Self {
            id: RequestId { contract: contract.address, id: request_id },
            variant: contract.variant,
            target,
            emitted_in_block: log.block_number,
            emitted_in_tx: log.transaction_hash,
        })
    }
}

fn block_number(value: U256) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::BlockNumberOverflow(value))
}

/// Why a log could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("log emitted by unwatched contract {0}")]
    UnexpectedEmitter(Address),
    #[error("unknown event topic {0:?}")]
    UnknownEvent(Option<B256>),
    #[error("abi decoding failed: {0}")]
    Abi(String),
    #[error("block number {0} does not fit in u64")]
    BlockNumberOverflow(U256),
}

/// Verified header proof(s) for one request, ready to be ABI-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPayload {
    Single(EncodedHeader),
    Triple([EncodedHeader; 3]),
}

impl CallbackPayload {
    /// ABI-encoded `fulfillRandomness` calldata.
    pub fn calldata(&self, request_id: U256) -> Bytes {
        match self {
            Self::Single(header) => SingleBlockConsumer::fulfillRandomnessCall {
                requestId: request_id,
                header: header.rlp.clone(),
            }
            .abi_encode()
            .into(),
            Self::Triple(headers) => MultiBlockConsumer::fulfillRandomnessCall {
                requestId: request_id,
                headers: headers.clone().map(|header| header.rlp),
            }
            .abi_encode()
            .into(),
        }
    }

    pub fn headers(&self) -> &[EncodedHeader] {
        match self {
            Self::Single(header) => std::slice::from_ref(header),
            Self::Triple(headers) => headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, LogData};

    use super::*;

    const CONSUMER: Address = address!("0xEd963038113af313c24c1650e3Df67eeDD469F09");

    fn log_from(address: Address, data: LogData) -> Log {
        Log {
            inner: alloy_primitives::Log { address, data },
            block_number: Some(5_800_010),
            ..Default::default()
        }
    }

    #[test]
    fn variants_have_distinct_topics() {
        assert_ne!(
            ContractVariant::SingleBlock.request_topic(),
            ContractVariant::MultiBlock.request_topic()
        );
    }

    #[test]
    fn decodes_single_block_request() {
        let event = SingleBlockConsumer::RequestRandomness {
            requestId: U256::from(7),
            blockNumber: U256::from(5_800_000),
        };
        let log = log_from(CONSUMER, event.encode_log_data());
        let contract = WatchedContract { address: CONSUMER, variant: ContractVariant::SingleBlock };

        let request = RandomnessRequest::from_log(contract, &log).unwrap();
        assert_eq!(request.id, RequestId { contract: CONSUMER, id: U256::from(7) });
        assert_eq!(request.target, RequestTarget::Single(5_800_000));
        assert_eq!(request.emitted_in_block, Some(5_800_010));
    }

    #[test]
    fn decodes_triple_in_event_order() {
        let event = MultiBlockConsumer::RequestRandomness {
            requestId: U256::from(1),
            blockNumberOne: U256::from(30),
            blockNumberTwo: U256::from(10),
            blockNumberThree: U256::from(20),
        };
        let log = log_from(CONSUMER, event.encode_log_data());
        let contract = WatchedContract { address: CONSUMER, variant: ContractVariant::MultiBlock };

        let request = RandomnessRequest::from_log(contract, &log).unwrap();
        assert_eq!(request.target, RequestTarget::Triple([30, 10, 20]));
        assert_eq!(request.target.block_numbers(), &[30, 10, 20]);
    }

    #[test]
    fn rejects_event_of_the_other_variant() {
        let event = SingleBlockConsumer::RequestRandomness {
            requestId: U256::from(7),
            blockNumber: U256::from(1),
        };
        let log = log_from(CONSUMER, event.encode_log_data());
        let contract = WatchedContract { address: CONSUMER, variant: ContractVariant::MultiBlock };

        assert!(matches!(
            RandomnessRequest::from_log(contract, &log),
            Err(DecodeError::UnknownEvent(_))
        ));
    }

    #[test]
    fn rejects_oversized_block_number() {
        let event = SingleBlockConsumer::RequestRandomness {
            requestId: U256::from(7),
            blockNumber: U256::from(u64::MAX) + U256::from(1),
        };
        let log = log_from(CONSUMER, event.encode_log_data());
        let contract = WatchedContract { address: CONSUMER, variant: ContractVariant::SingleBlock };

        assert!(matches!(
            RandomnessRequest::from_log(contract, &log),
            Err(DecodeError::BlockNumberOverflow(_))
        ));
    }
}
