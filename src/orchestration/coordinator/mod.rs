//! Domain-wide operation coordinator.
//!
//! `Coordinator::execute` drives one operation through the phase state
//! machine:
//!
//! 1. Run the local step on the coordinator and record its result.
//! 2. PREPARE on every targeted host (skipped when the local step failed).
//! 3. If everything prepared: COMMIT on every host, then FINALIZE on the
//!    hosts that committed, cascading to their servers.
//!    Otherwise: ROLLBACK on exactly the hosts that prepared.
//! 4. Resolve and assemble the domain outcome.
//!
//! Each operation gets a fresh `DomainOperationContext`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::context::DomainOperationContext;
use super::dispatch::{Dispatcher, PhaseOutcomes};
use super::phase::{OperationState, Phase, StateMachine};
use super::request::OperationRequest;
use super::resolver::{DomainOutcome, OutcomeResolver, PrepareVerdict};
use crate::error::Result;
use crate::topology::{FleetTopology, LocalHostInfo, ParticipantId};
use crate::value::StructuredValue;

/// The coordinator's own share of an operation.
///
/// `prepare` returns a response envelope; a failed envelope stops the
/// operation before any host is contacted. `complete` is told whether the
/// domain committed or rolled back.
#[async_trait]
pub trait LocalStep: Send + Sync {
    async fn prepare(&self, request: &OperationRequest) -> StructuredValue;

    async fn complete(&self, request: &OperationRequest, commit: bool);
}

/// Local step that accepts every operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptLocalStep;

#[async_trait]
impl LocalStep for AcceptLocalStep {
    async fn prepare(&self, request: &OperationRequest) -> StructuredValue {
        StructuredValue::success(StructuredValue::map([("operation", request.name.as_str())]))
    }

    async fn complete(&self, _request: &OperationRequest, _commit: bool) {}
}

/// Runs domain-wide operations.
pub struct Coordinator {
    dispatcher: Dispatcher,
    local_step: Arc<dyn LocalStep>,
    local_host: LocalHostInfo,
}

impl Coordinator {
    pub fn new(dispatcher: Dispatcher, local_step: Arc<dyn LocalStep>, local_host: LocalHostInfo) -> Self {
        Self {
            dispatcher,
            local_step,
            local_host,
        }
    }

    pub fn local_host(&self) -> &LocalHostInfo {
        &self.local_host
    }

    /// Execute `request` across `topology` and return the domain outcome.
    ///
    /// Participant failures are part of the outcome. Errors are reserved
    /// for malformed topologies, context invariant violations and illegal
    /// state transitions. A malformed topology is rejected before the local
    /// step runs or any host is contacted.
    #[tracing::instrument(name = "coordinator.execute", skip_all, fields(operation_id = %request.operation_id, operation = %request.name))]
    pub async fn execute(
        &self,
        request: &OperationRequest,
        topology: &FleetTopology,
    ) -> Result<DomainOutcome> {
        topology.validate()?;

        let ctx = Arc::new(DomainOperationContext::with_operation_id(
            request.operation_id,
            self.local_host.clone(),
        ));
        let mut state = StateMachine::new();
        let hosts = topology.host_names();

        state.advance(OperationState::Preparing)?;
        let local = self.local_step.prepare(request).await;
        ctx.set_coordinator_result(local)?;

        let verdict = if ctx.coordinator_result().is_success() {
            let targets: Vec<ParticipantId> = hosts.iter().cloned().map(ParticipantId::Host).collect();
            self.dispatcher
                .dispatch(Phase::Prepare, &targets, request, &ctx)
                .await?;
            let verdict = OutcomeResolver::resolve_prepare(&ctx, &hosts)?;
            state.advance(if verdict.succeeded() {
                OperationState::Prepared
            } else {
                OperationState::PrepareFailed
            })?;
            verdict
        } else {
            warn!("Local step failed, no host will be contacted");
            OutcomeResolver::resolve_prepare(&ctx, &hosts)?
        };

        if verdict.succeeded() {
            self.commit(request, topology, &hosts, &ctx, &mut state).await?;
        } else {
            self.roll_back(request, &verdict, &ctx, &mut state).await?;
        }

        let outcome = OutcomeResolver::resolve(&ctx, topology, &verdict)?;
        state.advance(OperationState::Done)?;

        info!(
            overall_success = outcome.overall_success,
            states = ?state.history(),
            "Operation complete"
        );
        Ok(outcome)
    }

    async fn commit(
        &self,
        request: &OperationRequest,
        topology: &FleetTopology,
        hosts: &[String],
        ctx: &Arc<DomainOperationContext>,
        state: &mut StateMachine,
    ) -> Result<()> {
        state.advance(OperationState::Committing)?;
        self.local_step.complete(request, true).await;

        let targets: Vec<ParticipantId> = hosts.iter().cloned().map(ParticipantId::Host).collect();
        let outcomes = self
            .dispatcher
            .dispatch(Phase::Commit, &targets, request, ctx)
            .await?;
        let committed = succeeded_hosts(hosts, &outcomes);
        if committed.len() < hosts.len() {
            warn!(
                committed = committed.len(),
                hosts = hosts.len(),
                "Commit did not reach every host, fleet is inconsistent"
            );
        }

        state.advance(OperationState::Finalizing)?;
        self.dispatcher
            .dispatch_cascade(Phase::Finalize, &committed, topology, request, ctx)
            .await?;
        Ok(())
    }

    async fn roll_back(
        &self,
        request: &OperationRequest,
        verdict: &PrepareVerdict,
        ctx: &Arc<DomainOperationContext>,
        state: &mut StateMachine,
    ) -> Result<()> {
        state.advance(OperationState::RollingBack)?;
        self.local_step.complete(request, false).await;

        let targets: Vec<ParticipantId> = verdict
            .rollback_targets()
            .iter()
            .cloned()
            .map(ParticipantId::Host)
            .collect();
        info!(hosts = targets.len(), "Rolling back prepared hosts");
        self.dispatcher
            .dispatch(Phase::Rollback, &targets, request, ctx)
            .await?;

        state.advance(OperationState::Finalizing)?;
        Ok(())
    }
}

fn succeeded_hosts(hosts: &[String], outcomes: &PhaseOutcomes) -> Vec<String> {
    hosts
        .iter()
        .filter(|h| {
            outcomes
                .get(&ParticipantId::Host((*h).clone()))
                .is_some_and(|o| o.is_success())
        })
        .cloned()
        .collect()
}
