//! Canonical execution header encoding and hash verification.
//!
//! Contracts can only read `blockhash(n)` for the last 256 blocks and never
//! the header itself, so the relay rebuilds the exact RLP encoding the block
//! was hashed over and ships it on-chain. The receiving contract re-hashes the
//! bytes, compares against the block hash it trusts and reads the mix-hash
//! (RANDAO reveal) out of the list.
//!
//! Encoding is a single loop over the era's [`HeaderField`] descriptors. The
//! recomputed hash must match the hash the node reported for the block; that
//! equality is the only thing standing between a wrong era mapping or a
//! malformed node response and a bogus callback, so any mismatch is terminal.

mod era;

pub use era::{ConsensusEra, HeaderField};

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{BufMut, Encodable};
use thiserror::Error;

/// Value written in the nonce slot from the merge onwards.
pub const RETIRED_NONCE: B64 = B64::ZERO;

/// Raw header fields of a single block as reported by the node.
///
/// Optional fields only exist from the fork that introduced them; which of
/// them end up in the encoding is decided by the [`ConsensusEra`], never by
/// their presence here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBlockHeader {
    /// Block hash declared by the data source.
    pub hash: B256,
    pub parent_hash: B256,
    pub ommers_hash: B256,
    pub beneficiary: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: B64,
    pub base_fee_per_gas: Option<u64>,
    pub withdrawals_root: Option<B256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<B256>,
    pub requests_hash: Option<B256>,
}

impl RawBlockHeader {
    /// Builds a raw header from consensus header fields and the hash the source declared for it.
    pub fn new(hash: B256, header: &alloy_consensus::Header) -> Self {
        Self {
            hash,
            parent_hash: header.parent_hash,
            ommers_hash: header.ommers_hash,
            beneficiary: header.beneficiary,
            state_root: header.state_root,
            transactions_root: header.transactions_root,
            receipts_root: header.receipts_root,
            logs_bloom: header.logs_bloom,
            difficulty: header.difficulty,
            number: header.number,
            gas_limit: header.gas_limit,
            gas_used: header.gas_used,
            timestamp: header.timestamp,
            extra_data: header.extra_data.clone(),
            mix_hash: header.mix_hash,
            nonce: header.nonce,
            base_fee_per_gas: header.base_fee_per_gas,
            withdrawals_root: header.withdrawals_root,
            blob_gas_used: header.blob_gas_used,
            excess_blob_gas: header.excess_blob_gas,
            parent_beacon_block_root: header.parent_beacon_block_root,
            requests_hash: header.requests_hash,
        }
    }

    fn value(&self, field: HeaderField) -> Option<FieldValue<'_>> {
        let value = match field {
            HeaderField::ParentHash => FieldValue::Hash(&self.parent_hash),
            HeaderField::OmmersHash => FieldValue::Hash(&self.ommers_hash),
            HeaderField::Beneficiary => FieldValue::Address(&self.beneficiary),
            HeaderField::StateRoot => FieldValue::Hash(&self.state_root),
            HeaderField::TransactionsRoot => FieldValue::Hash(&self.transactions_root),
            HeaderField::ReceiptsRoot => FieldValue::Hash(&self.receipts_root),
            HeaderField::LogsBloom => FieldValue::Bloom(&self.logs_bloom),
            HeaderField::Difficulty => FieldValue::Uint(&self.difficulty),
            HeaderField::Number => FieldValue::Int(self.number),
            HeaderField::GasLimit => FieldValue::Int(self.gas_limit),
            HeaderField::GasUsed => FieldValue::Int(self.gas_used),
            HeaderField::Timestamp => FieldValue::Int(self.timestamp),
            HeaderField::ExtraData => FieldValue::Bytes(&self.extra_data),
            HeaderField::MixHash => FieldValue::Hash(&self.mix_hash),
            HeaderField::Nonce => FieldValue::Nonce(self.nonce),
            HeaderField::RetiredNonce => FieldValue::Nonce(RETIRED_NONCE),
            HeaderField::BaseFeePerGas => FieldValue::Int(self.base_fee_per_gas?),
            HeaderField::WithdrawalsRoot => FieldValue::Hash(self.withdrawals_root.as_ref()?),
            HeaderField::BlobGasUsed => FieldValue::Int(self.blob_gas_used?),
            HeaderField::ExcessBlobGas => FieldValue::Int(self.excess_blob_gas?),
            HeaderField::ParentBeaconBlockRoot => {
                FieldValue::Hash(self.parent_beacon_block_root.as_ref()?)
            }
            HeaderField::RequestsHash => FieldValue::Hash(self.requests_hash.as_ref()?),
        };
        Some(value)
    }
}

impl From<alloy_rpc_types_eth::Header> for RawBlockHeader {
    fn from(header: alloy_rpc_types_eth::Header) -> Self {
        Self::new(header.hash, &header.inner)
    }
}

/// A header encoding whose hash matched the declared block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedHeader {
    pub number: u64,
    pub era: ConsensusEra,
    /// RLP encoding shipped on-chain.
    pub rlp: Bytes,
    /// `keccak256(rlp)`, equal to the block hash.
    pub hash: B256,
    mix_hash: B256,
}

impl EncodedHeader {
    /// The mix-hash field; for proof-of-stake blocks this is the RANDAO value.
    pub const fn randao(&self) -> B256 {
        self.mix_hash
    }
}

/// Header verification failures. None of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("block {number}: {era} header requires `{field}` but the source omitted it")]
    MissingField { number: u64, era: ConsensusEra, field: HeaderField },
    #[error(
        "block {number}: {era} header hash mismatch (computed {computed}, declared {declared})"
    )]
    HashMismatch { number: u64, era: ConsensusEra, computed: B256, declared: B256 },
}

/// Encodes `raw` using the field layout of `era`.
pub fn encode(raw: &RawBlockHeader, era: ConsensusEra) -> Result<Bytes, VerificationError> {
    let values = era
        .fields()
        .iter()
        .map(|&field| {
            raw.value(field).ok_or(VerificationError::MissingField {
                number: raw.number,
                era,
                field,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let payload_length = values.iter().map(|value| value.length()).sum::<usize>();
    let mut out = Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
    alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
    for value in &values {
        value.encode(&mut out);
    }
    Ok(out.into())
}

/// Encodes `raw` for `era` and checks the result hashes to `declared_hash`.
pub fn verify(
    raw: &RawBlockHeader,
    declared_hash: B256,
    era: ConsensusEra,
) -> Result<EncodedHeader, VerificationError> {
    let rlp = encode(raw, era)?;
    let computed = keccak256(&rlp);
    if computed != declared_hash {
        return Err(VerificationError::HashMismatch {
            number: raw.number,
            era,
            computed,
            declared: declared_hash,
        });
    }
    Ok(EncodedHeader { number: raw.number, era, rlp, hash: computed, mix_hash: raw.mix_hash })
}

/// Borrowed view of one header field, encoded according to its RLP kind.
#[derive(Debug)]
enum FieldValue<'a> {
    Hash(&'a B256),
    Address(&'a Address),
    Bloom(&'a Bloom),
    Uint(&'a U256),
    Int(u64),
    Bytes(&'a Bytes),
    Nonce(B64),
}

impl Encodable for FieldValue<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Hash(value) => value.encode(out),
            Self::Address(value) => value.encode(out),
            Self::Bloom(value) => value.encode(out),
            Self::Uint(value) => value.encode(out),
            Self::Int(value) => value.encode(out),
            Self::Bytes(value) => value.encode(out),
            Self::Nonce(value) => value.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Hash(value) => value.length(),
            Self::Address(value) => value.length(),
            Self::Bloom(value) => value.length(),
            Self::Uint(value) => value.length(),
            Self::Int(value) => value.length(),
            Self::Bytes(value) => value.length(),
            Self::Nonce(value) => value.length(),
        }
    }
}
