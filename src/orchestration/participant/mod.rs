//! Participant transport seam and outcome classification.
//!
//! `ParticipantClient` sends a phase request to one host or server.
//! - `local/`: in-process participants (tests, dry runs, the co-located host)
//! - remote transports implement the same trait below the dispatcher

use async_trait::async_trait;

use super::phase::Phase;
use crate::topology::ParticipantId;
use crate::value::{ResponseOutcome, StructuredValue, FAILED, FAILURE_DESCRIPTION, OUTCOME};

/// Marker key set on values recorded for unreachable participants.
pub const UNREACHABLE: &str = "unreachable";
/// Marker key set on values recorded for timed-out participants.
pub const TIMED_OUT: &str = "timed-out";

/// Transport-level failure reaching a participant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Participant cannot be reached at all (connection refused, unknown host).
    #[error("Participant unreachable: {0}")]
    Unreachable(String),

    /// Transient failure; the dispatcher may retry within the same phase.
    #[error("Transient transport failure: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Sends phase requests to hosts and servers.
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    /// Send `request` for `phase` to `target` and return its response.
    async fn send(
        &self,
        target: &ParticipantId,
        phase: Phase,
        request: &StructuredValue,
    ) -> Result<StructuredValue, TransportError>;
}

/// Terminal outcome of one participant in one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantOutcome {
    /// Participant applied the phase; payload is its response verbatim.
    Success(StructuredValue),
    /// Participant responded with a failure (or a response without a
    /// recognizable outcome).
    Failure(StructuredValue),
    /// Participant could not be reached.
    Unreachable(String),
    /// No response before the per-call timeout or the phase deadline.
    TimedOut,
}

impl ParticipantOutcome {
    /// Classify a participant's response.
    pub fn from_response(response: StructuredValue) -> Self {
        match response.outcome() {
            Some(ResponseOutcome::Success) => ParticipantOutcome::Success(response),
            Some(ResponseOutcome::Failed) => ParticipantOutcome::Failure(response),
            None => ParticipantOutcome::Failure(
                StructuredValue::failed("Response carried no recognizable outcome")
                    .with("response", response),
            ),
        }
    }

    /// Classify a value previously recorded by `into_value`.
    pub fn from_recorded(value: &StructuredValue) -> Self {
        if value.get(TIMED_OUT).and_then(StructuredValue::as_bool) == Some(true) {
            return ParticipantOutcome::TimedOut;
        }
        if value.get(UNREACHABLE).and_then(StructuredValue::as_bool) == Some(true) {
            return ParticipantOutcome::Unreachable(
                value.failure_description().unwrap_or_default(),
            );
        }
        ParticipantOutcome::from_response(value.clone())
    }

    /// Value recorded in the operation context for this outcome.
    pub fn into_value(self, participant: &ParticipantId, phase: Phase) -> StructuredValue {
        match self {
            ParticipantOutcome::Success(payload) | ParticipantOutcome::Failure(payload) => payload,
            ParticipantOutcome::Unreachable(reason) => StructuredValue::empty_map()
                .with(OUTCOME, FAILED)
                .with(FAILURE_DESCRIPTION, reason)
                .with(UNREACHABLE, true),
            ParticipantOutcome::TimedOut => StructuredValue::empty_map()
                .with(OUTCOME, FAILED)
                .with(
                    FAILURE_DESCRIPTION,
                    format!("{} timed out during {} phase", participant, phase),
                )
                .with(TIMED_OUT, true),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParticipantOutcome::Success(_))
    }
}

impl From<TransportError> for ParticipantOutcome {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unreachable(reason) => ParticipantOutcome::Unreachable(reason),
            TransportError::Transient(reason) => {
                ParticipantOutcome::Unreachable(format!("Retries exhausted: {}", reason))
            }
        }
    }
}
