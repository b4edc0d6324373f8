//! In-process participants.
//!
//! `InProcessFleet` answers phase requests for any host or server without a
//! network hop. Each participant follows a scripted `Behavior` (accept by
//! default), and every request received is logged so callers can check who
//! was contacted in which phase. Used for dry runs and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::participant::{ParticipantClient, TransportError};
use super::phase::Phase;
use crate::topology::ParticipantId;
use crate::value::StructuredValue;

/// How an in-process participant answers a phase request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Respond with a success envelope naming the participant and phase.
    Accept,
    /// Respond with a failed envelope carrying the description.
    Reject(String),
    /// Fail as if the participant could not be reached.
    Unreachable,
    /// Fail transiently for the first `n` requests of a phase, then accept.
    Flaky(u32),
    /// Wait, then behave as the inner behavior.
    Delay(Duration, Box<Behavior>),
    /// Never respond.
    Hang,
    /// Respond with this value verbatim.
    Respond(StructuredValue),
}

impl Behavior {
    pub fn reject(reason: impl Into<String>) -> Self {
        Behavior::Reject(reason.into())
    }

    pub fn delayed(delay: Duration, then: Behavior) -> Self {
        Behavior::Delay(delay, Box::new(then))
    }
}

type ScriptKey = (ParticipantId, Option<Phase>);

/// Scripted in-process fleet.
#[derive(Default)]
pub struct InProcessFleet {
    scripts: RwLock<HashMap<ScriptKey, Behavior>>,
    attempts: RwLock<HashMap<(ParticipantId, Phase), u32>>,
    calls: RwLock<Vec<(ParticipantId, Phase)>>,
}

impl InProcessFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `participant` for one phase.
    pub async fn script(&self, participant: ParticipantId, phase: Phase, behavior: Behavior) {
        self.scripts
            .write()
            .await
            .insert((participant, Some(phase)), behavior);
    }

    /// Script `participant` for every phase without a phase-specific script.
    pub async fn script_all_phases(&self, participant: ParticipantId, behavior: Behavior) {
        self.scripts.write().await.insert((participant, None), behavior);
    }

    /// Every request received, in arrival order.
    pub async fn calls(&self) -> Vec<(ParticipantId, Phase)> {
        self.calls.read().await.clone()
    }

    /// Participants contacted in `phase`, sorted.
    pub async fn contacted(&self, phase: Phase) -> Vec<ParticipantId> {
        let mut contacted: Vec<ParticipantId> = self
            .calls
            .read()
            .await
            .iter()
            .filter(|(_, p)| *p == phase)
            .map(|(participant, _)| participant.clone())
            .collect();
        contacted.sort();
        contacted.dedup();
        contacted
    }

    /// Number of requests `participant` received in `phase`.
    pub async fn call_count(&self, participant: &ParticipantId, phase: Phase) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|(p, ph)| p == participant && *ph == phase)
            .count()
    }

    async fn behavior_for(&self, participant: &ParticipantId, phase: Phase) -> Behavior {
        let scripts = self.scripts.read().await;
        scripts
            .get(&(participant.clone(), Some(phase)))
            .or_else(|| scripts.get(&(participant.clone(), None)))
            .cloned()
            .unwrap_or(Behavior::Accept)
    }

    async fn attempt_number(&self, participant: &ParticipantId, phase: Phase) -> u32 {
        let mut attempts = self.attempts.write().await;
        let seen = attempts.entry((participant.clone(), phase)).or_insert(0);
        *seen += 1;
        *seen
    }
}

#[async_trait]
impl ParticipantClient for InProcessFleet {
    async fn send(
        &self,
        target: &ParticipantId,
        phase: Phase,
        _request: &StructuredValue,
    ) -> Result<StructuredValue, TransportError> {
        self.calls.write().await.push((target.clone(), phase));
        let mut behavior = self.behavior_for(target, phase).await;
        debug!(participant = %target, %phase, ?behavior, "In-process participant handling request");

        loop {
            behavior = match behavior {
                Behavior::Accept => {
                    return Ok(StructuredValue::success(StructuredValue::map([
                        ("participant", target.to_string()),
                        ("phase", phase.as_str().to_string()),
                    ])))
                }
                Behavior::Reject(reason) => return Ok(StructuredValue::failed(reason)),
                Behavior::Unreachable => {
                    return Err(TransportError::Unreachable(format!(
                        "{} refused connection",
                        target
                    )))
                }
                Behavior::Flaky(failures) => {
                    if self.attempt_number(target, phase).await <= failures {
                        return Err(TransportError::Transient(format!(
                            "{} reset connection",
                            target
                        )));
                    }
                    Behavior::Accept
                }
                Behavior::Delay(delay, then) => {
                    tokio::time::sleep(delay).await;
                    *then
                }
                Behavior::Hang => return std::future::pending().await,
                Behavior::Respond(value) => return Ok(value),
            };
        }
    }
}
