//! Fleet topology: participant identities and the read-only snapshot of
//! hosts and servers an operation targets.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

use crate::error::{CoordinationError, Result};

/// Identity of a managed server process.
///
/// Structural identity: two identities are equal only when host, server
/// group and server name all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerIdentity {
    pub host: String,
    pub server_group: String,
    pub server: String,
}

impl ServerIdentity {
    pub fn new(
        host: impl Into<String>,
        server_group: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            server_group: server_group.into(),
            server: server.into(),
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={}/server-group={}/server={}",
            self.host, self.server_group, self.server
        )
    }
}

/// Addressable unit that can independently succeed or fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParticipantId {
    Host(String),
    Server(ServerIdentity),
}

impl ParticipantId {
    pub fn host(name: impl Into<String>) -> Self {
        ParticipantId::Host(name.into())
    }

    /// Name of the host this participant lives on.
    pub fn host_name(&self) -> &str {
        match self {
            ParticipantId::Host(name) => name,
            ParticipantId::Server(id) => &id.host,
        }
    }
}

impl From<ServerIdentity> for ParticipantId {
    fn from(id: ServerIdentity) -> Self {
        ParticipantId::Server(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantId::Host(name) => write!(f, "host={}", name),
            ParticipantId::Server(id) => id.fmt(f),
        }
    }
}

/// Identity of the host the coordinator runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalHostInfo {
    /// Name of the local host controller.
    pub name: String,
    /// Whether the local host is the domain coordinator.
    pub is_coordinator: bool,
}

impl LocalHostInfo {
    pub fn coordinator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_coordinator: true,
        }
    }
}

/// A server targeted on a host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerTarget {
    /// Server group the server belongs to.
    pub group: String,
    /// Server name.
    pub name: String,
}

/// A host and the servers targeted beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostTopology {
    pub name: String,
    #[serde(default)]
    pub servers: Vec<ServerTarget>,
}

/// Snapshot of the hosts and servers an operation targets.
///
/// Provided by the surrounding orchestration layer; treated as read-only for
/// the duration of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FleetTopology {
    pub hosts: Vec<HostTopology>,
}

impl FleetTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host with its targeted `(group, server)` pairs.
    pub fn with_host<G, S, I>(mut self, name: impl Into<String>, servers: I) -> Self
    where
        G: Into<String>,
        S: Into<String>,
        I: IntoIterator<Item = (G, S)>,
    {
        self.hosts.push(HostTopology {
            name: name.into(),
            servers: servers
                .into_iter()
                .map(|(group, name)| ServerTarget {
                    group: group.into(),
                    name: name.into(),
                })
                .collect(),
        });
        self
    }

    /// Reject topologies that name a host or a server identity twice.
    ///
    /// Every participant must map to exactly one ledger entry per phase.
    pub fn validate(&self) -> Result<()> {
        let mut hosts = HashSet::new();
        let mut servers = HashSet::new();
        for host in &self.hosts {
            if !hosts.insert(host.name.as_str()) {
                return Err(CoordinationError::DuplicateHost {
                    host: host.name.clone(),
                });
            }
            for target in &host.servers {
                let server = ServerIdentity::new(&host.name, &target.group, &target.name);
                if servers.contains(&server) {
                    return Err(CoordinationError::DuplicateServer { server });
                }
                servers.insert(server);
            }
        }
        Ok(())
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    /// Servers targeted on `host`; empty for unknown hosts.
    pub fn servers_of(&self, host: &str) -> Vec<ServerIdentity> {
        self.hosts
            .iter()
            .filter(|h| h.name == host)
            .flat_map(|h| {
                h.servers
                    .iter()
                    .map(move |s| ServerIdentity::new(&h.name, &s.group, &s.name))
            })
            .collect()
    }

    pub fn all_servers(&self) -> Vec<ServerIdentity> {
        self.hosts
            .iter()
            .flat_map(|h| self.servers_of(&h.name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
