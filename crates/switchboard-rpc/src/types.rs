//! Wire-format types: request, response, and error body.
//!
//! Request: `{"id": <number|string|null>, "domain": "..", "verb": "..", "params": <any>, "apiKey": ".."}`
//! Response: `{"id": <same id>, "result": <any>}` or `{"id": <same id>, "error": {"code": "..", "message": ".."}}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorCode, ProtocolError, RpcError};

/// Verb answered by the dispatcher itself, without routing.
pub const PING_VERB: &str = "ping";

/// Correlation id linking a response to its request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(serde_json::Number),
    /// String id.
    String(String),
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

// ── Request ─────────────────────────────────────────────────────────

/// Incoming RPC request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Correlation id; `None` for fire-and-forget.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Routing key selecting the backend.
    pub domain: String,
    /// Verb to invoke on the backend.
    pub verb: String,
    /// Opaque params, decoded by the verb.
    #[serde(default)]
    pub params: Value,
    /// API key presented by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Request {
    /// Build a request without id, params, or key.
    pub fn new(domain: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            id: None,
            domain: domain.into(),
            verb: verb.into(),
            params: Value::Null,
            api_key: None,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach params.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Attach an API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Decode a raw wire payload.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    ///
    /// Missing `id`, `params`, and `apiKey` are tolerated; `domain` and
    /// `verb` must be present, strings, and non-empty. A `ping` may leave
    /// `domain` out or empty.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let id = match fields.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(RequestId::Number(n)),
            Some(Value::String(s)) => Some(RequestId::String(s)),
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "id",
                    expected: "a number, a string, or null",
                });
            }
        };
        let verb = required_string(&mut fields, "verb")?;
        let domain = if verb == PING_VERB {
            optional_string(&mut fields, "domain")?.unwrap_or_default()
        } else {
            required_string(&mut fields, "domain")?
        };
        let params = fields.remove("params").unwrap_or(Value::Null);
        let api_key = match fields.remove("apiKey") {
            None | Some(Value::Null) => None,
            Some(Value::String(key)) => Some(key),
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "apiKey",
                    expected: "a string",
                });
            }
        };

        Ok(Self {
            id,
            domain,
            verb,
            params,
            api_key,
        })
    }

    /// Whether this is the transport-agnostic liveness probe.
    pub fn is_ping(&self) -> bool {
        self.verb == PING_VERB
    }
}

fn required_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Err(ProtocolError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(ProtocolError::EmptyField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProtocolError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn optional_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ProtocolError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ProtocolError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

/// Best-effort recovery of the correlation id from a payload that failed
/// to decode as a [`Request`].
pub fn recover_id(raw: &[u8]) -> Option<RequestId> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    match value.get("id")? {
        Value::Number(n) => Some(RequestId::Number(n.clone())),
        Value::String(s) => Some(RequestId::String(s.clone())),
        _ => None,
    }
}

// ── Response ────────────────────────────────────────────────────────

/// Structured error inside a [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Exactly one of `result` or `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Successful result; `null` when the verb produced nothing.
    Result(Value),
    /// Error payload.
    Error(ErrorBody),
}

/// Outgoing RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed correlation id (`null` when none could be recovered).
    pub id: Option<RequestId>,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Build a success response.
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Build an error response.
    pub fn failure(id: Option<RequestId>, error: &RpcError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error.to_error_body()),
        }
    }

    /// Result payload, if this is a success.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    /// Error payload, if this is a failure.
    pub fn error(&self) -> Option<&ErrorBody> {
        match &self.outcome {
            Outcome::Error(body) => Some(body),
            Outcome::Result(_) => None,
        }
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize response");
            r#"{"id":null,"error":{"code":"InternalError","message":"Failed to serialize response"}}"#
                .to_owned()
        })
    }
}
