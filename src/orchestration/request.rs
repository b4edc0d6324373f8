//! Operation request shape pushed to participants.

use uuid::Uuid;

use super::phase::Phase;
use crate::value::StructuredValue;

/// A management operation addressed into the fleet topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    /// Correlates every phase request of one operation.
    pub operation_id: Uuid,
    /// Path through the topology, e.g. `[("profile", "default"), ("subsystem", "logging")]`.
    pub address: Vec<(String, String)>,
    /// Operation name.
    pub name: String,
    /// Operation parameters.
    pub params: StructuredValue,
}

impl OperationRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            address: Vec::new(),
            name: name.into(),
            params: StructuredValue::Undefined,
        }
    }

    pub fn at(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.address.push((key.into(), value.into()));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<StructuredValue>) -> Self {
        self.params.set(key, value);
        self
    }

    /// Phase-specific request tree sent to participants.
    pub fn to_value(&self, phase: Phase) -> StructuredValue {
        let address: Vec<StructuredValue> = self
            .address
            .iter()
            .map(|(k, v)| StructuredValue::map([(k.as_str(), v.as_str())]))
            .collect();

        let mut request = StructuredValue::empty_map()
            .with("operation", self.name.as_str())
            .with("address", address)
            .with("operation-id", self.operation_id.to_string())
            .with("phase", phase.as_str());
        if self.params.is_defined() {
            request.set("parameters", self.params.clone());
        }
        request
    }
}
