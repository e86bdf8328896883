//! JSON message types exchanged with the PAWS service.

use crate::LOCATION_HEADER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Outbound request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Subscribe,
    Unsubscribe,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Put => "put",
            Method::Post => "post",
            Method::Delete => "delete",
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token, echoed by the server on every reply.
    pub token: String,

    /// Operation to perform on the resource.
    pub method: Method,

    /// Target resource path, e.g. `/feeds/42`.
    pub resource: String,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Optional request payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Request {
    pub fn new(token: impl Into<String>, method: Method, resource: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            method,
            resource: resource.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }
}

/// Inbound message envelope.
///
/// `body` is kept as raw JSON: the service sends either a JSON-encoded
/// string or an inline object depending on the resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Token of the originating request or subscription.
    pub token: String,

    /// Numeric result code.
    pub status: u16,

    /// Response headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Resource the message refers to, when the service includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    pub fn new(token: impl Into<String>, status: u16) -> Self {
        Self {
            token: token.into(),
            status,
            headers: HashMap::new(),
            resource: None,
            body: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns whether the status signals success (200).
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Returns whether the status signals a created resource (201).
    pub fn is_created(&self) -> bool {
        self.status == 201
    }

    /// Returns the body as text.
    ///
    /// String bodies are returned as-is, structured bodies are re-serialized.
    pub fn body_text(&self) -> Option<String> {
        match self.body.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Returns the body as structured JSON, parsing string bodies.
    pub fn body_json(&self) -> Result<Option<Value>, serde_json::Error> {
        match &self.body {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => serde_json::from_str(s).map(Some),
            Some(other) => Ok(Some(other.clone())),
        }
    }

    /// Path of a newly created resource.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION_HEADER).map(String::as_str)
    }

    /// Identifier of a newly created resource: the last segment of its location.
    pub fn created_id(&self) -> Option<&str> {
        self.location()?
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }
}
