//! Aggregation record for one in-flight domain-wide operation.
//!
//! `DomainOperationContext` collects the coordinator's own result plus one
//! result per host and per server for every phase. Writers on different keys
//! never contend on a shared lock: each phase ledger is a sharded map written
//! with set-if-absent semantics, and a second write for the same key is an
//! invariant violation rather than an overwrite.
//!
//! A ledger is sealed when its phase barrier closes. Sealing fills every
//! still-missing key with a caller-provided value (the dispatcher's
//! `TimedOut` marker) and rejects any write that arrives afterwards.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::phase::Phase;
use crate::error::{CoordinationError, Result};
use crate::topology::{LocalHostInfo, ParticipantId, ServerIdentity};
use crate::value::StructuredValue;

/// Host and server results recorded during one phase.
#[derive(Default)]
struct PhaseLedger {
    hosts: DashMap<String, StructuredValue>,
    servers: DashMap<ServerIdentity, StructuredValue>,
    sealed: AtomicBool,
}

impl PhaseLedger {
    fn record<K>(
        &self,
        map: &DashMap<K, StructuredValue>,
        key: K,
        value: StructuredValue,
        participant: &ParticipantId,
        phase: Phase,
    ) -> Result<()>
    where
        K: Eq + Hash,
    {
        if !value.is_defined() {
            return Err(CoordinationError::UndefinedResult {
                participant: participant.to_string(),
            });
        }

        // The sealed flag is read while the key's shard is locked, so a
        // seal either observes this write or this write observes the seal.
        match map.entry(key) {
            _ if self.sealed.load(Ordering::SeqCst) => Err(CoordinationError::PhaseSealed {
                participant: participant.clone(),
                phase,
            }),
            Entry::Occupied(_) => Err(CoordinationError::DuplicateResult {
                participant: participant.clone(),
                phase,
            }),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    fn get(&self, participant: &ParticipantId) -> Option<StructuredValue> {
        match participant {
            ParticipantId::Host(name) => self.hosts.get(name).map(|v| v.value().clone()),
            ParticipantId::Server(id) => self.servers.get(id).map(|v| v.value().clone()),
        }
    }

    fn get_or_fill(&self, participant: &ParticipantId, fill: StructuredValue) -> StructuredValue {
        match participant {
            ParticipantId::Host(name) => self
                .hosts
                .entry(name.clone())
                .or_insert(fill)
                .value()
                .clone(),
            ParticipantId::Server(id) => self
                .servers
                .entry(id.clone())
                .or_insert(fill)
                .value()
                .clone(),
        }
    }
}

/// Shared aggregation record for one domain-wide operation.
///
/// Created fresh per operation and discarded once the outcome is assembled;
/// the exactly-once rule is scoped to a single operation.
pub struct DomainOperationContext {
    operation_id: Uuid,
    local_host: LocalHostInfo,
    coordinator_result: OnceLock<StructuredValue>,
    ledgers: [PhaseLedger; 4],
}

impl DomainOperationContext {
    pub fn new(local_host: LocalHostInfo) -> Self {
        Self::with_operation_id(Uuid::new_v4(), local_host)
    }

    pub fn with_operation_id(operation_id: Uuid, local_host: LocalHostInfo) -> Self {
        Self {
            operation_id,
            local_host,
            coordinator_result: OnceLock::new(),
            ledgers: Default::default(),
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn local_host(&self) -> &LocalHostInfo {
        &self.local_host
    }

    /// Whether `host` names the host the coordinator runs on.
    pub fn is_local_host(&self, host: &str) -> bool {
        self.local_host.name == host
    }

    /// Record the coordinator's own result. Write-once.
    pub fn set_coordinator_result(&self, result: StructuredValue) -> Result<()> {
        if !result.is_defined() {
            return Err(CoordinationError::UndefinedResult {
                participant: "coordinator".to_string(),
            });
        }
        self.coordinator_result
            .set(result)
            .map_err(|_| CoordinationError::DuplicateCoordinatorResult)?;
        debug!(operation_id = %self.operation_id, "Recorded coordinator result");
        Ok(())
    }

    /// Coordinator result, `Undefined` until set.
    pub fn coordinator_result(&self) -> StructuredValue {
        self.coordinator_result.get().cloned().unwrap_or_default()
    }

    pub fn add_host_result(
        &self,
        phase: Phase,
        host: impl Into<String>,
        result: StructuredValue,
    ) -> Result<()> {
        let host = host.into();
        let participant = ParticipantId::Host(host.clone());
        let ledger = self.ledger(phase);
        ledger.record(&ledger.hosts, host, result, &participant, phase)?;
        debug!(operation_id = %self.operation_id, %participant, %phase, "Recorded host result");
        Ok(())
    }

    pub fn add_server_result(
        &self,
        phase: Phase,
        server: ServerIdentity,
        result: StructuredValue,
    ) -> Result<()> {
        let participant = ParticipantId::Server(server.clone());
        let ledger = self.ledger(phase);
        ledger.record(&ledger.servers, server, result, &participant, phase)?;
        debug!(operation_id = %self.operation_id, %participant, %phase, "Recorded server result");
        Ok(())
    }

    /// Record a result for any participant kind.
    pub fn add_result(
        &self,
        phase: Phase,
        participant: &ParticipantId,
        result: StructuredValue,
    ) -> Result<()> {
        match participant {
            ParticipantId::Host(name) => self.add_host_result(phase, name.clone(), result),
            ParticipantId::Server(id) => self.add_server_result(phase, id.clone(), result),
        }
    }

    /// Result recorded for `participant` in `phase`, if any.
    pub fn result(&self, phase: Phase, participant: &ParticipantId) -> Option<StructuredValue> {
        self.ledger(phase).get(participant)
    }

    /// Point-in-time copy of the host results recorded in `phase`.
    pub fn host_results(&self, phase: Phase) -> HashMap<String, StructuredValue> {
        snapshot(&self.ledger(phase).hosts)
    }

    /// Point-in-time copy of the server results recorded in `phase`.
    pub fn server_results(&self, phase: Phase) -> HashMap<ServerIdentity, StructuredValue> {
        snapshot(&self.ledger(phase).servers)
    }

    /// Per host, the value recorded in the latest phase that recorded one.
    pub fn final_host_results(&self) -> HashMap<String, (Phase, StructuredValue)> {
        let mut finals = HashMap::new();
        for phase in Phase::ALL {
            for (host, value) in self.host_results(phase) {
                finals.insert(host, (phase, value));
            }
        }
        finals
    }

    /// Per server, the value recorded in the latest phase that recorded one.
    pub fn final_server_results(&self) -> HashMap<ServerIdentity, (Phase, StructuredValue)> {
        let mut finals = HashMap::new();
        for phase in Phase::ALL {
            for (server, value) in self.server_results(phase) {
                finals.insert(server, (phase, value));
            }
        }
        finals
    }

    /// Final recorded outcome of a single participant.
    pub fn final_result(&self, participant: &ParticipantId) -> Option<(Phase, StructuredValue)> {
        Phase::ALL
            .iter()
            .rev()
            .find_map(|phase| self.result(*phase, participant).map(|v| (*phase, v)))
    }

    /// Close the `phase` ledger.
    ///
    /// Every participant in `pending` that has no value yet receives
    /// `fill(participant)`; all later writes to the phase are rejected with
    /// `PhaseSealed`. Returns the value now recorded for each pending
    /// participant, whether written by its own task or by the fill.
    pub fn seal_phase<F>(
        &self,
        phase: Phase,
        pending: &[ParticipantId],
        fill: F,
    ) -> HashMap<ParticipantId, StructuredValue>
    where
        F: Fn(&ParticipantId) -> StructuredValue,
    {
        let ledger = self.ledger(phase);
        ledger.sealed.store(true, Ordering::SeqCst);
        debug!(operation_id = %self.operation_id, %phase, pending = pending.len(), "Sealed phase");

        pending
            .iter()
            .map(|participant| {
                let value = ledger.get_or_fill(participant, fill(participant));
                (participant.clone(), value)
            })
            .collect()
    }

    pub fn is_sealed(&self, phase: Phase) -> bool {
        self.ledger(phase).sealed.load(Ordering::SeqCst)
    }

    fn ledger(&self, phase: Phase) -> &PhaseLedger {
        &self.ledgers[phase.index()]
    }
}

fn snapshot<K>(map: &DashMap<K, StructuredValue>) -> HashMap<K, StructuredValue>
where
    K: Eq + Hash + Clone,
{
    map.iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect()
}

#[cfg(test)]
mod tests;
