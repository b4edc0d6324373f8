//! Domain-wide outcome resolution.
//!
//! `OutcomeResolver` reads the operation context and decides:
//! - after PREPARE: whether the domain prepared, and which hosts must be
//!   rolled back if it did not;
//! - at the end: overall success, which participants failed in which phase,
//!   and the assembled response tree.
//!
//! The resolver only arranges participant payloads; it never alters them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, warn};

use super::context::DomainOperationContext;
use super::participant::ParticipantOutcome;
use super::phase::Phase;
use crate::error::{CoordinationError, Result};
use crate::topology::{FleetTopology, ParticipantId, ServerIdentity};
use crate::value::{StructuredValue, FAILED, FAILURE_DESCRIPTION, OUTCOME, SUCCESS};

/// Why a participant counts as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Participant explicitly rejected the operation during PREPARE.
    PrepareFailure,
    /// Participant could not be reached during PREPARE.
    Unreachable,
    /// Participant did not answer PREPARE in time.
    TimedOut,
    /// Participant failed after the domain prepared; it is now out of step
    /// with peers that committed.
    PostCommitInconsistency,
    /// Participant failed to roll back a successful PREPARE.
    RollbackFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PrepareFailure => "prepare-failure",
            FailureKind::Unreachable => "unreachable",
            FailureKind::TimedOut => "timed-out",
            FailureKind::PostCommitInconsistency => "post-commit-inconsistency",
            FailureKind::RollbackFailure => "rollback-failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One participant failure, with the phase it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantFailure {
    pub participant: ParticipantId,
    pub phase: Phase,
    pub kind: FailureKind,
    pub description: Option<String>,
}

impl ParticipantFailure {
    fn new(participant: ParticipantId, phase: Phase, kind: FailureKind, value: &StructuredValue) -> Self {
        Self {
            participant,
            phase,
            kind,
            description: value.failure_description(),
        }
    }

    fn to_value(&self) -> StructuredValue {
        let mut value = StructuredValue::empty_map()
            .with("participant", self.participant.to_string())
            .with("phase", self.phase.as_str())
            .with("kind", self.kind.as_str());
        if let Some(description) = &self.description {
            value.set(FAILURE_DESCRIPTION, description.as_str());
        }
        value
    }
}

/// Provisional decision after the PREPARE barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareVerdict {
    /// Whether the coordinator's own local step succeeded.
    pub coordinator_succeeded: bool,
    /// Hosts whose PREPARE succeeded, sorted.
    pub prepared: Vec<String>,
    /// Hosts whose PREPARE failed.
    pub failures: Vec<ParticipantFailure>,
}

impl PrepareVerdict {
    /// Domain prepared: coordinator and every targeted host succeeded.
    pub fn succeeded(&self) -> bool {
        self.coordinator_succeeded && self.failures.is_empty()
    }

    pub fn requires_rollback(&self) -> bool {
        !self.succeeded()
    }

    /// Hosts that must receive ROLLBACK: exactly those that prepared.
    pub fn rollback_targets(&self) -> &[String] {
        &self.prepared
    }
}

/// Final domain-wide outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainOutcome {
    pub overall_success: bool,
    pub failure_domains: BTreeSet<ParticipantId>,
    pub failures: Vec<ParticipantFailure>,
    pub requires_rollback: bool,
    pub coordinator_failed: bool,
    /// Servers with no result because their host never succeeded the round
    /// that would have reached them.
    pub withheld_servers: BTreeSet<ServerIdentity>,
    pub assembled_result: StructuredValue,
}

impl DomainOutcome {
    /// Failure recorded for `participant`, if any.
    pub fn failure_of(&self, participant: &ParticipantId) -> Option<&ParticipantFailure> {
        self.failures.iter().find(|f| &f.participant == participant)
    }

    /// Participants left inconsistent with the rest of the fleet.
    pub fn inconsistent(&self) -> Vec<&ParticipantId> {
        self.failures
            .iter()
            .filter(|f| {
                matches!(
                    f.kind,
                    FailureKind::PostCommitInconsistency | FailureKind::RollbackFailure
                )
            })
            .map(|f| &f.participant)
            .collect()
    }
}

/// Turns recorded results into domain-wide decisions.
pub struct OutcomeResolver;

impl OutcomeResolver {
    /// Decide the PREPARE outcome for `hosts`.
    ///
    /// When the coordinator's local step failed no host was contacted, so no
    /// host results are expected.
    pub fn resolve_prepare(ctx: &DomainOperationContext, hosts: &[String]) -> Result<PrepareVerdict> {
        let coordinator_succeeded = ctx.coordinator_result().is_success();
        let mut verdict = PrepareVerdict {
            coordinator_succeeded,
            prepared: Vec::new(),
            failures: Vec::new(),
        };
        if !coordinator_succeeded {
            return Ok(verdict);
        }

        let recorded = ctx.host_results(Phase::Prepare);
        for host in hosts {
            let participant = ParticipantId::Host(host.clone());
            let value = recorded
                .get(host)
                .ok_or_else(|| CoordinationError::MissingResult {
                    participant: participant.clone(),
                    phase: Phase::Prepare,
                })?;

            let kind = match ParticipantOutcome::from_recorded(value) {
                ParticipantOutcome::Success(_) => {
                    verdict.prepared.push(host.clone());
                    continue;
                }
                ParticipantOutcome::Failure(_) => FailureKind::PrepareFailure,
                ParticipantOutcome::Unreachable(_) => FailureKind::Unreachable,
                ParticipantOutcome::TimedOut => FailureKind::TimedOut,
            };
            warn!(%participant, %kind, "Host failed prepare");
            verdict
                .failures
                .push(ParticipantFailure::new(participant, Phase::Prepare, kind, value));
        }

        verdict.prepared.sort();
        debug!(
            prepared = verdict.prepared.len(),
            failed = verdict.failures.len(),
            "Prepare resolved"
        );
        Ok(verdict)
    }

    /// Compute the final outcome once every phase barrier has closed.
    pub fn resolve(
        ctx: &DomainOperationContext,
        topology: &FleetTopology,
        verdict: &PrepareVerdict,
    ) -> Result<DomainOutcome> {
        let mut failures = verdict.failures.clone();
        let mut withheld_servers = BTreeSet::new();

        if verdict.succeeded() {
            let committed = Self::collect_failures(
                ctx,
                Phase::Commit,
                topology.host_names().into_iter().map(ParticipantId::Host),
                FailureKind::PostCommitInconsistency,
                &mut failures,
            )?;

            let finalized = Self::collect_failures(
                ctx,
                Phase::Finalize,
                committed.into_iter().map(ParticipantId::Host),
                FailureKind::PostCommitInconsistency,
                &mut failures,
            )?;

            // Servers are only reached through a host that finalized.
            for server in topology.all_servers() {
                if !finalized.contains(&server.host) {
                    withheld_servers.insert(server);
                }
            }
            Self::collect_failures(
                ctx,
                Phase::Finalize,
                finalized
                    .iter()
                    .flat_map(|h| topology.servers_of(h))
                    .map(ParticipantId::Server),
                FailureKind::PostCommitInconsistency,
                &mut failures,
            )?;
        } else {
            Self::collect_failures(
                ctx,
                Phase::Rollback,
                verdict
                    .rollback_targets()
                    .iter()
                    .cloned()
                    .map(ParticipantId::Host),
                FailureKind::RollbackFailure,
                &mut failures,
            )?;
            withheld_servers.extend(topology.all_servers());
        }

        let failure_domains: BTreeSet<ParticipantId> =
            failures.iter().map(|f| f.participant.clone()).collect();
        let overall_success = verdict.succeeded() && failures.is_empty();
        let coordinator_failed = !verdict.coordinator_succeeded;

        let assembled_result = Self::assemble(ctx, overall_success, verdict, &failures);

        info!(
            operation_id = %ctx.operation_id(),
            overall_success,
            failed = failure_domains.len(),
            rolled_back = verdict.requires_rollback(),
            "Operation resolved"
        );

        Ok(DomainOutcome {
            overall_success,
            failure_domains,
            failures,
            requires_rollback: verdict.requires_rollback(),
            coordinator_failed,
            withheld_servers,
            assembled_result,
        })
    }

    /// Record a failure of `kind` for every non-successful participant in
    /// `phase`. Returns the host names that succeeded.
    fn collect_failures<I>(
        ctx: &DomainOperationContext,
        phase: Phase,
        participants: I,
        kind: FailureKind,
        failures: &mut Vec<ParticipantFailure>,
    ) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        let mut succeeded = Vec::new();
        for participant in participants {
            let value = ctx
                .result(phase, &participant)
                .ok_or_else(|| CoordinationError::MissingResult {
                    participant: participant.clone(),
                    phase,
                })?;

            if ParticipantOutcome::from_recorded(&value).is_success() {
                if let ParticipantId::Host(name) = &participant {
                    succeeded.push(name.clone());
                }
            } else {
                warn!(%participant, %phase, %kind, "Participant failed");
                failures.push(ParticipantFailure::new(participant, phase, kind, &value));
            }
        }
        Ok(succeeded)
    }

    fn assemble(
        ctx: &DomainOperationContext,
        overall_success: bool,
        verdict: &PrepareVerdict,
        failures: &[ParticipantFailure],
    ) -> StructuredValue {
        let hosts: BTreeMap<String, StructuredValue> = ctx
            .final_host_results()
            .into_iter()
            .map(|(host, (_, value))| (host, value))
            .collect();

        // servers.<host>.<server-group>.<server>
        let mut servers: BTreeMap<String, BTreeMap<String, StructuredValue>> = BTreeMap::new();
        for (id, (_, value)) in ctx.final_server_results() {
            servers
                .entry(id.host)
                .or_default()
                .entry(id.server_group)
                .or_insert_with(StructuredValue::empty_map)
                .set(id.server, value);
        }

        let mut assembled = StructuredValue::empty_map()
            .with(OUTCOME, if overall_success { SUCCESS } else { FAILED })
            .with("operation-id", ctx.operation_id().to_string())
            .with("coordinator", ctx.coordinator_result())
            .with("hosts", hosts)
            .with(
                "servers",
                StructuredValue::map(
                    servers
                        .into_iter()
                        .map(|(host, groups)| (host, StructuredValue::from(groups))),
                ),
            )
            .with("rolled-back", verdict.requires_rollback());

        if !failures.is_empty() {
            assembled.set(
                "failures",
                failures
                    .iter()
                    .map(ParticipantFailure::to_value)
                    .collect::<Vec<_>>(),
            );
        }
        if !overall_success {
            let summary = if !verdict.coordinator_succeeded {
                "Operation failed on the coordinator".to_string()
            } else {
                let names: Vec<String> = failures.iter().map(|f| f.participant.to_string()).collect();
                format!("Operation failed or was rolled back on: {}", names.join(", "))
            };
            assembled.set(FAILURE_DESCRIPTION, summary);
        }
        assembled
    }
}
