//! Coordination errors.
//!
//! Only structural and invariant violations are errors. Participant
//! failures (rejections, unreachable hosts, timeouts) are recorded as
//! outcomes and never surface here.

use crate::orchestration::phase::{OperationState, Phase};
use crate::topology::{ParticipantId, ServerIdentity};

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that abort a domain-wide operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("Coordinator result already set")]
    DuplicateCoordinatorResult,

    #[error("Result for {participant} already set in {phase} phase")]
    DuplicateResult {
        participant: ParticipantId,
        phase: Phase,
    },

    #[error("Result for {participant} arrived after the {phase} phase was sealed")]
    PhaseSealed {
        participant: ParticipantId,
        phase: Phase,
    },

    #[error("Undefined result recorded for {participant}")]
    UndefinedResult { participant: String },

    #[error("No result recorded for {participant} in {phase} phase")]
    MissingResult {
        participant: ParticipantId,
        phase: Phase,
    },

    #[error("Host {host} appears more than once in the topology")]
    DuplicateHost { host: String },

    #[error("Server {server} appears more than once in the topology")]
    DuplicateServer { server: ServerIdentity },

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: OperationState,
        to: OperationState,
    },
}

impl CoordinationError {
    /// Whether this error is a late write rejected by a sealed phase.
    ///
    /// Late writes are discarded by the dispatcher; every other error
    /// aborts the operation.
    pub fn is_late_write(&self) -> bool {
        matches!(self, CoordinationError::PhaseSealed { .. })
    }
}
