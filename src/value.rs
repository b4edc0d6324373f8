//! Structured value model for operation requests and results.
//!
//! A dynamically-typed tree carried through the coordination core. The core
//! never interprets payloads beyond the response envelope (`outcome`,
//! `result`, `failure-description`); it only stores and arranges them.

use std::collections::BTreeMap;
use std::fmt;

/// Key holding the outcome discriminator of a response.
pub const OUTCOME: &str = "outcome";
/// Outcome value for a successful response.
pub const SUCCESS: &str = "success";
/// Outcome value for a failed response.
pub const FAILED: &str = "failed";
/// Key holding the result payload of a successful response.
pub const RESULT: &str = "result";
/// Key holding the failure description of a failed response.
pub const FAILURE_DESCRIPTION: &str = "failure-description";

/// Tree-shaped payload value.
///
/// `Undefined` is an explicit variant: "no value yet" is never modelled with
/// `Option` around a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StructuredValue {
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<StructuredValue>),
    Map(BTreeMap<String, StructuredValue>),
}

/// Outcome discriminator of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success,
    Failed,
}

impl StructuredValue {
    /// Whether this value holds anything.
    pub fn is_defined(&self) -> bool {
        !matches!(self, StructuredValue::Undefined)
    }

    /// Empty map value.
    pub fn empty_map() -> Self {
        StructuredValue::Map(BTreeMap::new())
    }

    /// Build a map from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<StructuredValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        StructuredValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Set `key` on this value, turning it into a map if it is not one.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StructuredValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key` in place, turning this value into a map if it is not one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StructuredValue>) {
        if !matches!(self, StructuredValue::Map(_)) {
            *self = StructuredValue::empty_map();
        }
        if let StructuredValue::Map(entries) = self {
            entries.insert(key.into(), value.into());
        }
    }

    /// Child value under `key`, if this is a map containing it.
    pub fn get(&self, key: &str) -> Option<&StructuredValue> {
        match self {
            StructuredValue::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Whether this is a map with a defined child under `key`.
    pub fn has_defined(&self, key: &str) -> bool {
        self.get(key).is_some_and(StructuredValue::is_defined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StructuredValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StructuredValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StructuredValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Successful response envelope wrapping `result`.
    pub fn success(result: impl Into<StructuredValue>) -> Self {
        let result = result.into();
        let response = StructuredValue::empty_map().with(OUTCOME, SUCCESS);
        if result.is_defined() {
            response.with(RESULT, result)
        } else {
            response
        }
    }

    /// Failed response envelope with a failure description.
    pub fn failed(description: impl Into<String>) -> Self {
        StructuredValue::empty_map()
            .with(OUTCOME, FAILED)
            .with(FAILURE_DESCRIPTION, description.into())
    }

    /// Outcome discriminator of a response envelope.
    ///
    /// `None` when the value carries no recognizable outcome.
    pub fn outcome(&self) -> Option<ResponseOutcome> {
        match self.get(OUTCOME).and_then(StructuredValue::as_str) {
            Some(SUCCESS) => Some(ResponseOutcome::Success),
            Some(FAILED) => Some(ResponseOutcome::Failed),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == Some(ResponseOutcome::Success)
    }

    /// Failure description of a failed response, rendered as text.
    pub fn failure_description(&self) -> Option<String> {
        self.get(FAILURE_DESCRIPTION).map(|d| match d {
            StructuredValue::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl From<bool> for StructuredValue {
    fn from(value: bool) -> Self {
        StructuredValue::Bool(value)
    }
}

impl From<i64> for StructuredValue {
    fn from(value: i64) -> Self {
        StructuredValue::Int(value)
    }
}

impl From<i32> for StructuredValue {
    fn from(value: i32) -> Self {
        StructuredValue::Int(value.into())
    }
}

impl From<u32> for StructuredValue {
    fn from(value: u32) -> Self {
        StructuredValue::Int(value.into())
    }
}

impl From<&str> for StructuredValue {
    fn from(value: &str) -> Self {
        StructuredValue::String(value.to_string())
    }
}

impl From<String> for StructuredValue {
    fn from(value: String) -> Self {
        StructuredValue::String(value)
    }
}

impl From<Vec<StructuredValue>> for StructuredValue {
    fn from(value: Vec<StructuredValue>) -> Self {
        StructuredValue::List(value)
    }
}

impl From<BTreeMap<String, StructuredValue>> for StructuredValue {
    fn from(value: BTreeMap<String, StructuredValue>) -> Self {
        StructuredValue::Map(value)
    }
}

impl From<serde_json::Value> for StructuredValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => StructuredValue::Undefined,
            Value::Bool(b) => StructuredValue::Bool(b),
            // Non-integral numbers have no variant; keep their textual form.
            Value::Number(n) => match n.as_i64() {
                Some(i) => StructuredValue::Int(i),
                None => StructuredValue::String(n.to_string()),
            },
            Value::String(s) => StructuredValue::String(s),
            Value::Array(items) => {
                StructuredValue::List(items.into_iter().map(StructuredValue::from).collect())
            }
            Value::Object(entries) => StructuredValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, StructuredValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&StructuredValue> for serde_json::Value {
    fn from(value: &StructuredValue) -> Self {
        use serde_json::Value;

        match value {
            StructuredValue::Undefined => Value::Null,
            StructuredValue::Bool(b) => Value::Bool(*b),
            StructuredValue::Int(i) => Value::from(*i),
            StructuredValue::String(s) => Value::String(s.clone()),
            StructuredValue::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            StructuredValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::from(self))
    }
}
