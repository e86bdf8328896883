//! Records delivered by subscriptions and feed reads.

use paws_protocol::{Response, ResourceKind};
use serde_json::Value;

/// A decoded record body, tagged with the kind of resource it describes.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A feed (environment) with its datastreams.
    Environment(Value),
    /// A single datastream.
    Datastream(Value),
}

impl Record {
    /// Decodes a response body as a record of the given kind.
    pub fn decode(kind: ResourceKind, response: &Response) -> Result<Self, RecordError> {
        let value = response.body_json()?.ok_or(RecordError::MissingBody)?;
        Self::from_value(kind, value)
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(kind: ResourceKind, value: Value) -> Result<Self, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }
        Ok(match kind {
            ResourceKind::Feed => Record::Environment(value),
            ResourceKind::Datastream => Record::Datastream(value),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Record::Environment(_) => ResourceKind::Feed,
            Record::Datastream(_) => ResourceKind::Datastream,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Record::Environment(v) | Record::Datastream(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Record::Environment(v) | Record::Datastream(v) => v,
        }
    }

    /// The record's `id` field, rendered as a string.
    pub fn id(&self) -> Option<String> {
        match self.value().get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Record decode failures.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body is missing")]
    MissingBody,

    #[error("body is not a JSON object")]
    NotAnObject,
}
