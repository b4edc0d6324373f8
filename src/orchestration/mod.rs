//! Domain-wide operation orchestration.
//!
//! One operation flows through these pieces:
//! - `context`: per-operation record of every participant's result per phase
//! - `dispatch`: concurrent phase fan-out with deadlines and retries
//! - `resolver`: commit/rollback decision and the assembled outcome
//! - `coordinator`: the phase state machine tying them together
//!
//! Participant transports implement `participant::ParticipantClient`;
//! `local/` holds the in-process implementation.

pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod local;
pub mod participant;
pub mod phase;
pub mod request;
pub mod resolver;

pub use context::DomainOperationContext;
pub use coordinator::{AcceptLocalStep, Coordinator, LocalStep};
pub use dispatch::{Dispatcher, PhaseOutcomes};
pub use participant::{ParticipantClient, ParticipantOutcome, TransportError};
pub use phase::{OperationState, Phase, StateMachine};
pub use request::OperationRequest;
pub use resolver::{DomainOutcome, FailureKind, OutcomeResolver, ParticipantFailure, PrepareVerdict};
