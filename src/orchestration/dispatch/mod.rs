//! Phase fan-out to hosts and servers.
//!
//! `Dispatcher` starts one task per participant, waits for the cohort at a
//! phase barrier bounded by the phase deadline, and records exactly one
//! outcome per participant in the operation context. Participants still
//! outstanding when the barrier closes are recorded as `TimedOut` by sealing
//! the phase ledger; their late responses are discarded.
//!
//! `dispatch_cascade` additionally fans out from each successful host to the
//! servers it owns, inside the host's own unit of work.

use std::collections::HashMap;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::context::DomainOperationContext;
use super::participant::{ParticipantClient, ParticipantOutcome, TransportError};
use super::phase::Phase;
use super::request::OperationRequest;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, Result};
use crate::topology::{FleetTopology, ParticipantId, ServerIdentity};
use crate::utils::retry::transient_backoff;
use crate::value::StructuredValue;

/// Outcomes of one phase, keyed by participant.
pub type PhaseOutcomes = HashMap<ParticipantId, ParticipantOutcome>;

type UnitResult = (ParticipantId, Result<ParticipantOutcome>);

/// Failure of a single send attempt.
#[derive(Debug)]
enum AttemptError {
    Transport(TransportError),
    TimedOut,
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Transport(e) if e.is_transient())
    }
}

/// Everything a participant's unit of work needs, owned so it can run in
/// its own task.
#[derive(Clone)]
struct ParticipantUnit {
    client: Arc<dyn ParticipantClient>,
    ctx: Arc<DomainOperationContext>,
    request: Arc<StructuredValue>,
    phase: Phase,
    deadline: Instant,
    config: CoordinatorConfig,
}

impl ParticipantUnit {
    /// Send, classify and record the outcome for `target`.
    async fn run(&self, target: ParticipantId) -> UnitResult {
        let outcome = self.call(&target).await;
        let recorded = self
            .ctx
            .add_result(self.phase, &target, outcome.clone().into_value(&target, self.phase))
            .map(|_| outcome);
        (target, recorded)
    }

    async fn call(&self, target: &ParticipantId) -> ParticipantOutcome {
        let client = &self.client;
        let request = self.request.as_ref();
        let phase = self.phase;
        let deadline = self.deadline;
        let per_call = self.config.participant_timeout();

        let attempt = || async move {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(per_call.min(remaining), client.send(target, phase, request))
                .await
            {
                Ok(response) => response.map_err(AttemptError::Transport),
                Err(_) => Err(AttemptError::TimedOut),
            }
        };

        let backoff: ExponentialBuilder = transient_backoff(&self.config);
        let result = attempt
            .retry(backoff)
            .when(AttemptError::is_retryable)
            .notify(|e, delay| {
                warn!(participant = %target, %phase, error = ?e, ?delay, "Transient failure, retrying");
            });

        match tokio::time::timeout_at(deadline, result).await {
            Ok(Ok(response)) => ParticipantOutcome::from_response(response),
            Ok(Err(AttemptError::Transport(e))) => {
                warn!(participant = %target, %phase, error = %e, "Participant unreachable");
                ParticipantOutcome::from(e)
            }
            Ok(Err(AttemptError::TimedOut)) | Err(_) => {
                warn!(participant = %target, %phase, "Participant timed out");
                ParticipantOutcome::TimedOut
            }
        }
    }
}

/// Fans phase requests out to participants.
pub struct Dispatcher {
    remote: Arc<dyn ParticipantClient>,
    local: Option<Arc<dyn ParticipantClient>>,
    config: CoordinatorConfig,
}

impl Dispatcher {
    pub fn new(remote: Arc<dyn ParticipantClient>, config: CoordinatorConfig) -> Self {
        Self {
            remote,
            local: None,
            config,
        }
    }

    /// Route participants on the coordinator's own host through `local`.
    pub fn with_local_client(mut self, local: Arc<dyn ParticipantClient>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Push `phase` to every target concurrently and close the barrier.
    ///
    /// Returns one outcome per target. Context invariant violations are
    /// returned as errors once the barrier has closed.
    #[tracing::instrument(name = "dispatch.phase", skip_all, fields(operation_id = %ctx.operation_id(), %phase, targets = targets.len()))]
    pub async fn dispatch(
        &self,
        phase: Phase,
        targets: &[ParticipantId],
        request: &OperationRequest,
        ctx: &Arc<DomainOperationContext>,
    ) -> Result<PhaseOutcomes> {
        let deadline = Instant::now() + self.config.phase_deadline();
        let request = Arc::new(request.to_value(phase));

        let mut tasks = JoinSet::new();
        for target in targets {
            let unit = self.unit(ctx, &request, phase, deadline, target.host_name());
            let target = target.clone();
            tasks.spawn(async move { vec![unit.run(target).await] });
        }

        let (mut outcomes, failure) = Self::barrier(&mut tasks, deadline, phase).await;
        let pending: Vec<ParticipantId> = targets
            .iter()
            .filter(|t| !outcomes.contains_key(*t))
            .cloned()
            .collect();
        Self::seal(ctx, phase, &pending, &mut outcomes);

        match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Push `phase` to `hosts`; each host that succeeds pushes the same
    /// phase to its targeted servers.
    ///
    /// Servers of a host that did not succeed are never contacted and get no
    /// outcome.
    #[tracing::instrument(name = "dispatch.cascade", skip_all, fields(operation_id = %ctx.operation_id(), %phase, hosts = hosts.len()))]
    pub async fn dispatch_cascade(
        &self,
        phase: Phase,
        hosts: &[String],
        topology: &FleetTopology,
        request: &OperationRequest,
        ctx: &Arc<DomainOperationContext>,
    ) -> Result<PhaseOutcomes> {
        let deadline = Instant::now() + self.config.phase_deadline();
        let request = Arc::new(request.to_value(phase));

        let mut tasks = JoinSet::new();
        for host in hosts {
            let unit = self.unit(ctx, &request, phase, deadline, host);
            let servers = topology.servers_of(host);
            let target = ParticipantId::Host(host.clone());
            tasks.spawn(async move { Self::run_host_cascade(unit, target, servers).await });
        }

        let (mut outcomes, failure) = Self::barrier(&mut tasks, deadline, phase).await;

        let pending_hosts: Vec<ParticipantId> = hosts
            .iter()
            .map(|h| ParticipantId::Host(h.clone()))
            .filter(|h| !outcomes.contains_key(h))
            .collect();
        Self::seal(ctx, phase, &pending_hosts, &mut outcomes);

        // The ledger is sealed now; servers of hosts that succeeded but whose
        // own fan-out did not finish in time are filled in as timed out.
        let pending_servers: Vec<ParticipantId> = hosts
            .iter()
            .filter(|h| {
                outcomes
                    .get(&ParticipantId::Host((*h).clone()))
                    .is_some_and(ParticipantOutcome::is_success)
            })
            .flat_map(|h| topology.servers_of(h))
            .map(ParticipantId::Server)
            .filter(|s| !outcomes.contains_key(s))
            .collect();
        Self::seal(ctx, phase, &pending_servers, &mut outcomes);

        match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    async fn run_host_cascade(
        unit: ParticipantUnit,
        host: ParticipantId,
        servers: Vec<ServerIdentity>,
    ) -> Vec<UnitResult> {
        let host_result = unit.run(host).await;
        let host_succeeded = matches!(&host_result.1, Ok(outcome) if outcome.is_success());

        let mut results = vec![host_result];
        if host_succeeded && !servers.is_empty() {
            debug!(servers = servers.len(), "Host succeeded, pushing to servers");
            let server_units = servers
                .into_iter()
                .map(|server| unit.run(ParticipantId::Server(server)));
            results.extend(join_all(server_units).await);
        }
        results
    }

    fn unit(
        &self,
        ctx: &Arc<DomainOperationContext>,
        request: &Arc<StructuredValue>,
        phase: Phase,
        deadline: Instant,
        host: &str,
    ) -> ParticipantUnit {
        let client = match &self.local {
            Some(local) if ctx.is_local_host(host) => Arc::clone(local),
            _ => Arc::clone(&self.remote),
        };
        ParticipantUnit {
            client,
            ctx: Arc::clone(ctx),
            request: Arc::clone(request),
            phase,
            deadline,
            config: self.config.clone(),
        }
    }

    /// Collect unit results until every task finished or the deadline passed.
    ///
    /// Late writes are logged and dropped; the first other context error is
    /// kept and reported after the barrier closes.
    async fn barrier(
        tasks: &mut JoinSet<Vec<UnitResult>>,
        deadline: Instant,
        phase: Phase,
    ) -> (PhaseOutcomes, Option<CoordinationError>) {
        let mut outcomes = PhaseOutcomes::new();
        let mut failure = None;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(results))) => {
                    for (participant, result) in results {
                        match result {
                            Ok(outcome) => {
                                outcomes.insert(participant, outcome);
                            }
                            Err(e) if e.is_late_write() => {
                                warn!(%participant, %phase, "Discarding result that arrived after the phase closed");
                            }
                            Err(e) => {
                                error!(%participant, %phase, error = %e, "Context invariant violated");
                                failure.get_or_insert(e);
                            }
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(%phase, error = %e, "Dispatch task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(%phase, outstanding = tasks.len(), "Phase deadline elapsed");
                    break;
                }
            }
        }

        tasks.abort_all();
        (outcomes, failure)
    }

    fn seal(
        ctx: &DomainOperationContext,
        phase: Phase,
        pending: &[ParticipantId],
        outcomes: &mut PhaseOutcomes,
    ) {
        let recorded = ctx.seal_phase(phase, pending, |participant| {
            ParticipantOutcome::TimedOut.into_value(participant, phase)
        });
        for (participant, value) in recorded {
            outcomes.insert(participant, ParticipantOutcome::from_recorded(&value));
        }
    }
}
