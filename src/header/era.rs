//! Consensus eras and their header field layouts.
//!
//! Every hard fork that touched the execution header appended fields to the
//! RLP list (London, Shanghai, Cancun, Prague) or changed the meaning of an
//! existing one (Paris retired the PoW nonce). Each era carries a static,
//! ordered descriptor list so the codec never branches on field presence.

use std::fmt;

/// One position in the RLP-encoded header list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    /// Proof-of-work nonce as reported by the node.
    Nonce,
    /// Post-merge placeholder for the nonce slot, always eight zero bytes.
    RetiredNonce,
    BaseFeePerGas,
    WithdrawalsRoot,
    BlobGasUsed,
    ExcessBlobGas,
    ParentBeaconBlockRoot,
    RequestsHash,
}

impl HeaderField {
    /// JSON-RPC name of the field, used in error messages.
    pub const fn rpc_name(self) -> &'static str {
        match self {
            Self::ParentHash => "parentHash",
            Self::OmmersHash => "sha3Uncles",
            Self::Beneficiary => "miner",
            Self::StateRoot => "stateRoot",
            Self::TransactionsRoot => "transactionsRoot",
            Self::ReceiptsRoot => "receiptsRoot",
            Self::LogsBloom => "logsBloom",
            Self::Difficulty => "difficulty",
            Self::Number => "number",
            Self::GasLimit => "gasLimit",
            Self::GasUsed => "gasUsed",
            Self::Timestamp => "timestamp",
            Self::ExtraData => "extraData",
            Self::MixHash => "mixHash",
            Self::Nonce | Self::RetiredNonce => "nonce",
            Self::BaseFeePerGas => "baseFeePerGas",
            Self::WithdrawalsRoot => "withdrawalsRoot",
            Self::BlobGasUsed => "blobGasUsed",
            Self::ExcessBlobGas => "excessBlobGas",
            Self::ParentBeaconBlockRoot => "parentBeaconBlockRoot",
            Self::RequestsHash => "requestsHash",
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpc_name())
    }
}

use HeaderField::*;

const FRONTIER_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    Nonce,
];

const LONDON_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    Nonce,
    BaseFeePerGas,
];

const PARIS_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    RetiredNonce,
    BaseFeePerGas,
];

const SHANGHAI_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    RetiredNonce,
    BaseFeePerGas,
    WithdrawalsRoot,
];

const CANCUN_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    RetiredNonce,
    BaseFeePerGas,
    WithdrawalsRoot,
    BlobGasUsed,
    ExcessBlobGas,
    ParentBeaconBlockRoot,
];

const PRAGUE_FIELDS: &[HeaderField] = &[
    ParentHash,
    OmmersHash,
    Beneficiary,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    RetiredNonce,
    BaseFeePerGas,
    WithdrawalsRoot,
    BlobGasUsed,
    ExcessBlobGas,
    ParentBeaconBlockRoot,
    RequestsHash,
];

/// Header schema version, resolved from a block number via
/// [`EraSchedule`](crate::chainspec::EraSchedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsensusEra {
    /// Genesis up to London.
    Frontier,
    /// London up to the merge.
    London,
    /// The merge (Paris) up to Shanghai.
    Paris,
    /// Shanghai up to Cancun.
    Shanghai,
    /// Cancun up to Prague.
    Cancun,
    /// Prague onwards.
    Prague,
}

impl ConsensusEra {
    /// All eras in activation order.
    pub const ALL: [Self; 6] =
        [Self::Frontier, Self::London, Self::Paris, Self::Shanghai, Self::Cancun, Self::Prague];

    /// Ordered field layout of a header in this era.
    pub const fn fields(self) -> &'static [HeaderField] {
        match self {
            Self::Frontier => FRONTIER_FIELDS,
            Self::London => LONDON_FIELDS,
            Self::Paris => PARIS_FIELDS,
            Self::Shanghai => SHANGHAI_FIELDS,
            Self::Cancun => CANCUN_FIELDS,
            Self::Prague => PRAGUE_FIELDS,
        }
    }

    /// Whether the block was produced by proof-of-stake, i.e. its mix-hash is a RANDAO reveal.
    pub const fn is_proof_of_stake(self) -> bool {
        matches!(self, Self::Paris | Self::Shanghai | Self::Cancun | Self::Prague)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Frontier => "frontier",
            Self::London => "london",
            Self::Paris => "paris",
            Self::Shanghai => "shanghai",
            Self::Cancun => "cancun",
            Self::Prague => "prague",
        }
    }
}

impl fmt::Display for ConsensusEra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
