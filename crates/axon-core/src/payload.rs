use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::IpcError;

/// One wire message: a JSON object, never an array or scalar at the top
/// level. The transport treats the contents as opaque; the `type` field is
/// a collaborator convention, never inspected by the bus itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value, rejecting anything but a top-level object.
    pub fn from_value(value: Value) -> Result<Self, IpcError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(IpcError::NotAnObject(json_type_name(&other))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Convention accessor for the `type` discriminant string.
    pub fn msg_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = IpcError;

    fn try_from(value: Value) -> Result<Self, IpcError> {
        Self::from_value(value)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
