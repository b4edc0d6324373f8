//! Protocol phases and the coordinator's operation state machine.

use std::fmt;

use tracing::debug;

use crate::error::{CoordinationError, Result};

/// One round of the multi-phase protocol.
///
/// Declaration order is also precedence order: a participant's final
/// recorded outcome comes from the latest phase that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Prepare,
    Commit,
    Rollback,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Prepare, Phase::Commit, Phase::Rollback, Phase::Finalize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
            Phase::Finalize => "finalize",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one domain-wide operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    Preparing,
    Prepared,
    PrepareFailed,
    Committing,
    RollingBack,
    Finalizing,
    Done,
}

impl OperationState {
    /// Transition table.
    ///
    /// `Preparing -> RollingBack` is the short-circuit taken when the
    /// coordinator's own local step fails before any host is contacted.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;

        matches!(
            (self, next),
            (Created, Preparing)
                | (Preparing, Prepared)
                | (Preparing, PrepareFailed)
                | (Preparing, RollingBack)
                | (Prepared, Committing)
                | (PrepareFailed, RollingBack)
                | (Committing, Finalizing)
                | (RollingBack, Finalizing)
                | (Finalizing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == OperationState::Done
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Created => "CREATED",
            OperationState::Preparing => "PREPARING",
            OperationState::Prepared => "PREPARED",
            OperationState::PrepareFailed => "PREPARE_FAILED",
            OperationState::Committing => "COMMITTING",
            OperationState::RollingBack => "ROLLING_BACK",
            OperationState::Finalizing => "FINALIZING",
            OperationState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Current state of one operation plus the path it took.
#[derive(Debug)]
pub struct StateMachine {
    current: OperationState,
    history: Vec<OperationState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: OperationState::Created,
            history: vec![OperationState::Created],
        }
    }

    pub fn current(&self) -> OperationState {
        self.current
    }

    /// States visited so far, starting with `Created`.
    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    /// Move to `next`, rejecting transitions absent from the table.
    pub fn advance(&mut self, next: OperationState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(CoordinationError::IllegalTransition {
                from: self.current,
                to: next,
            });
        }
        debug!(from = %self.current, to = %next, "Operation state transition");
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
