//! In-memory bookkeeping of randomness requests.
//!
//! The tracker is the dedup point between the subscriber (which may see the
//! same event twice after a reconnect or backfill) and the pipeline. Only
//! live requests are kept: confirmed and failed entries are evicted. It keeps
//! nothing across restarts; a restart combined with `--from-block` backfill
//! will happily re-admit requests that were already fulfilled on-chain.

use std::collections::HashMap;

use alloy_primitives::TxHash;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::contracts::{RandomnessRequest, RequestId};

/// Fulfillment state of a tracked request.
///
/// `Confirmed` and `Failed` are terminal and not represented: reaching either
/// evicts the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    HeadersVerified,
    Submitted { tx_hash: TxHash, nonce: u64 },
}

impl RequestState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::HeadersVerified => "headers_verified",
            Self::Submitted { .. } => "submitted",
        }
    }
}

/// Tracker misuse. These indicate a pipeline bug, not a chain condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("request {0} is not tracked")]
    Unknown(RequestId),
    #[error("request {id} cannot move from {from} to {to}")]
    InvalidTransition { id: RequestId, from: &'static str, to: &'static str },
}

#[derive(Debug)]
struct TrackedRequest {
    request: RandomnessRequest,
    state: RequestState,
}

/// Tracks at most one active entry per [`RequestId`].
#[derive(Debug, Default)]
pub struct RequestTracker {
    requests: Mutex<HashMap<RequestId, TrackedRequest>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `request` as pending.
    ///
    /// Returns `false` (and changes nothing) if the id is already tracked.
    /// Ids evicted after confirmation or failure are admitted again.
    pub fn record(&self, request: RandomnessRequest) -> bool {
        let mut requests = self.requests.lock();
        if let Some(existing) = requests.get(&request.id) {
            debug!(
                target: "randao_relay::tracker",
                id = %request.id,
                state = existing.state.name(),
                "Ignoring duplicate request"
            );
            return false;
        }
        requests.insert(request.id, TrackedRequest { request, state: RequestState::Pending });
        true
    }

    pub fn mark_verified(&self, id: &RequestId) -> Result<(), TrackerError> {
        self.transition(id, RequestState::HeadersVerified, |state| {
            matches!(state, RequestState::Pending)
        })
    }

    pub fn mark_submitted(
        &self,
        id: &RequestId,
        tx_hash: TxHash,
        nonce: u64,
    ) -> Result<(), TrackerError> {
        self.transition(id, RequestState::Submitted { tx_hash, nonce }, |state| {
            matches!(state, RequestState::HeadersVerified)
        })
    }

    /// Marks the callback as mined successfully and evicts the entry.
    pub fn mark_confirmed(&self, id: &RequestId) -> Result<(), TrackerError> {
        let mut requests = self.requests.lock();
        let entry = requests.get(id).ok_or(TrackerError::Unknown(*id))?;
        if !matches!(entry.state, RequestState::Submitted { .. }) {
            return Err(TrackerError::InvalidTransition {
                id: *id,
                from: entry.state.name(),
                to: "confirmed",
            });
        }
        requests.remove(id);
        Ok(())
    }

    /// Marks the request failed and evicts the entry. Observing its event
    /// again re-arms it as pending.
    pub fn mark_failed(&self, id: &RequestId, reason: &str) -> Result<(), TrackerError> {
        let entry = self.requests.lock().remove(id).ok_or(TrackerError::Unknown(*id))?;
        debug!(
            target: "randao_relay::tracker",
            %id,
            from = entry.state.name(),
            reason,
            "Evicted failed request"
        );
        Ok(())
    }

    pub fn is_known(&self, id: &RequestId) -> bool {
        self.requests.lock().contains_key(id)
    }

    pub fn state(&self, id: &RequestId) -> Option<RequestState> {
        self.requests.lock().get(id).map(|entry| entry.state.clone())
    }

    pub fn request(&self, id: &RequestId) -> Option<RandomnessRequest> {
        self.requests.lock().get(id).map(|entry| entry.request.clone())
    }

    /// Number of requests still in flight.
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition(
        &self,
        id: &RequestId,
        next: RequestState,
        allowed_from: impl FnOnce(&RequestState) -> bool,
    ) -> Result<(), TrackerError> {
        let mut requests = self.requests.lock();
        let entry = requests.get_mut(id).ok_or(TrackerError::Unknown(*id))?;
        if !allowed_from(&entry.state) {
            return Err(TrackerError::InvalidTransition {
                id: *id,
                from: entry.state.name(),
                to: next.name(),
            });
        }
        entry.state = next;
        Ok(())
    }
}
