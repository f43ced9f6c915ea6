//! Value types shared by the facade, the classifier and transports.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

/// Application key and secret used for basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value for the `authorization` header: `Basic base64(key:secret)`.
    pub fn authorization_header(&self) -> String {
        let raw = format!("{}:{}", self.key, self.secret);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A response body after JSON decoding was attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    /// Body that was not JSON or failed to parse, kept verbatim.
    Raw(String),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Collapse into a JSON value: `Empty` becomes `null`, `Raw` a string.
    pub fn into_value(self) -> Value {
        match self {
            Body::Empty => Value::Null,
            Body::Json(v) => v,
            Body::Raw(s) => Value::String(s),
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => Ok(()),
            Body::Json(v) => write!(f, "{v}"),
            Body::Raw(s) => f.write_str(s),
        }
    }
}

/// A response whose body has been decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
