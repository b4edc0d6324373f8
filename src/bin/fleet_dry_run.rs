//! fleet-dry-run: run one domain-wide operation against an in-process fleet
//!
//! Loads the CLI and coordinator configuration, builds an in-process fleet
//! from the configured topology and prints the assembled outcome as JSON.
//!
//! ## Usage
//! ```text
//! fleet-dry-run <operation> [key=value ...]
//! ```
//! Each `key=value` argument appends one address element.
//!
//! ## Configuration
//! - FLEET_CONFIG: coordinator config file (topology, local host, timing)
//! - FLEET_CLI_CONFIG: CLI config file (connection timeout)
//! - FLEET_DRY_RUN_REJECT: comma-separated hosts that reject PREPARE
//! - FLEET_LOG: log filter (default: info)

use std::sync::Arc;

use tracing::info;

use fleet_coordinator::config::{CliConfig, Config};
use fleet_coordinator::orchestration::local::{Behavior, InProcessFleet};
use fleet_coordinator::orchestration::{
    AcceptLocalStep, Coordinator, Dispatcher, OperationRequest, ParticipantClient, Phase,
};
use fleet_coordinator::topology::ParticipantId;
use fleet_coordinator::utils::bootstrap::init_tracing;

const DEFAULT_OPERATION: &str = "read-resource";
const REJECT_ENV_VAR: &str = "FLEET_DRY_RUN_REJECT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = CliConfig::load()?;
    let config = Config::load(None)?;
    let coordinator_config = config.coordinator.clone().with_cli(&cli);

    let mut args = std::env::args().skip(1);
    let operation = args.next().unwrap_or_else(|| DEFAULT_OPERATION.to_string());
    let mut request = OperationRequest::new(operation);
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("Address element '{}' is not key=value", arg))?;
        request = request.at(key, value);
    }

    let fleet = Arc::new(InProcessFleet::new());
    if let Ok(hosts) = std::env::var(REJECT_ENV_VAR) {
        for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            fleet
                .script(
                    ParticipantId::host(host),
                    Phase::Prepare,
                    Behavior::reject("Rejected by dry-run configuration"),
                )
                .await;
        }
    }

    info!(
        operation = %request.name,
        hosts = config.topology.hosts.len(),
        controller = %format!("{}:{}", cli.default_controller_host, cli.default_controller_port),
        "fleet-dry-run started"
    );

    let coordinator = Coordinator::new(
        Dispatcher::new(fleet as Arc<dyn ParticipantClient>, coordinator_config),
        Arc::new(AcceptLocalStep),
        config.local_host.clone(),
    );
    let outcome = coordinator.execute(&request, &config.topology).await?;

    let json = serde_json::Value::from(&outcome.assembled_result);
    println!("{}", serde_json::to_string_pretty(&json)?);

    if !outcome.overall_success {
        std::process::exit(1);
    }
    Ok(())
}
