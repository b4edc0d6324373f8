//! Shared fixtures for coordination scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_coordinator::config::CoordinatorConfig;
use fleet_coordinator::orchestration::local::InProcessFleet;
use fleet_coordinator::orchestration::{
    AcceptLocalStep, Coordinator, Dispatcher, LocalStep, OperationRequest, ParticipantClient,
};
use fleet_coordinator::topology::{FleetTopology, LocalHostInfo, ParticipantId, ServerIdentity};
use fleet_coordinator::StructuredValue;

pub const GROUP: &str = "main-server-group";

/// Short deadlines so timeout scenarios finish quickly.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        phase_deadline_ms: 400,
        participant_timeout_ms: 200,
        transient_retries: 1,
        retry_min_delay_ms: 1,
    }
}

/// Hosts `names`, each with servers `<host>-1` and `<host>-2`.
pub fn fleet_topology(names: &[&str]) -> FleetTopology {
    names.iter().fold(FleetTopology::new(), |topology, name| {
        topology.with_host(
            *name,
            [(GROUP, format!("{}-1", name)), (GROUP, format!("{}-2", name))],
        )
    })
}

pub fn coordinator(fleet: &Arc<InProcessFleet>) -> Coordinator {
    coordinator_with_step(fleet, Arc::new(AcceptLocalStep))
}

pub fn coordinator_with_step(fleet: &Arc<InProcessFleet>, step: Arc<dyn LocalStep>) -> Coordinator {
    Coordinator::new(
        Dispatcher::new(Arc::clone(fleet) as Arc<dyn ParticipantClient>, fast_config()),
        step,
        LocalHostInfo::coordinator("dc"),
    )
}

pub fn request() -> OperationRequest {
    OperationRequest::new("write-attribute")
        .at("profile", "default")
        .at("subsystem", "logging")
        .with_param("name", "level")
        .with_param("value", "DEBUG")
}

pub fn host(name: &str) -> ParticipantId {
    ParticipantId::host(name)
}

pub fn server(host: &str, index: u32) -> ServerIdentity {
    ServerIdentity::new(host, GROUP, format!("{}-{}", host, index))
}

/// `hosts` section of an assembled result.
pub fn assembled_hosts(assembled: &StructuredValue) -> BTreeMap<String, StructuredValue> {
    match assembled.get("hosts") {
        Some(StructuredValue::Map(hosts)) => hosts.clone(),
        other => panic!("assembled result has no hosts map: {:?}", other),
    }
}

/// `servers.<host>.<GROUP>` section of an assembled result; empty when absent.
pub fn assembled_servers(assembled: &StructuredValue, host: &str) -> BTreeMap<String, StructuredValue> {
    match assembled
        .get("servers")
        .and_then(|s| s.get(host))
        .and_then(|groups| groups.get(GROUP))
    {
        Some(StructuredValue::Map(servers)) => servers.clone(),
        _ => BTreeMap::new(),
    }
}

/// Phase recorded in the in-process fleet's success payload.
pub fn answered_phase(value: &StructuredValue) -> Option<&str> {
    value.get("result")?.get("phase")?.as_str()
}
