//! RPC error codes and the error types raised at each layer.

use serde::{Deserialize, Serialize};

use crate::types::ErrorBody;

// ── Error codes ─────────────────────────────────────────────────────

/// Machine-readable error kind carried in every error response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unroutable domain or malformed payload.
    InvalidRequest,
    /// Unknown verb in a known domain, or a domain without verbs.
    MethodNotFound,
    /// Missing or rejected API key, or an unauthenticated session.
    AuthenticationRequired,
    /// A verb raised and its backend converts failures into errors.
    InternalError,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::MethodNotFound => "MethodNotFound",
            Self::AuthenticationRequired => "AuthenticationRequired",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── RpcError ────────────────────────────────────────────────────────

/// An RPC-level error. Always delivered to the caller inside a response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Unroutable domain, malformed payload, or params of the wrong shape.
    #[error("{message}")]
    InvalidRequest {
        /// Description of what is wrong.
        message: String,
    },

    /// The verb is not known to the domain.
    #[error("{message}")]
    MethodNotFound {
        /// Description.
        message: String,
    },

    /// The caller is not authenticated.
    #[error("{message}")]
    AuthenticationRequired {
        /// Description.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Shorthand for [`RpcError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Shorthand for [`RpcError::MethodNotFound`].
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::MethodNotFound {
            message: message.into(),
        }
    }

    /// Shorthand for [`RpcError::AuthenticationRequired`].
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::AuthenticationRequired {
            message: message.into(),
        }
    }

    /// Shorthand for [`RpcError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable code for this variant.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            Self::AuthenticationRequired { .. } => ErrorCode::AuthenticationRequired,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest { message }
            | Self::MethodNotFound { message }
            | Self::AuthenticationRequired { message }
            | Self::Internal { message } => message,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.message().to_owned(),
        }
    }
}

impl From<ErrorBody> for RpcError {
    fn from(body: ErrorBody) -> Self {
        let message = body.message;
        match body.code {
            ErrorCode::InvalidRequest => Self::InvalidRequest { message },
            ErrorCode::MethodNotFound => Self::MethodNotFound { message },
            ErrorCode::AuthenticationRequired => Self::AuthenticationRequired { message },
            ErrorCode::InternalError => Self::Internal { message },
        }
    }
}

// ── Decode failures ─────────────────────────────────────────────────

/// A raw payload could not be turned into a [`Request`](crate::types::Request).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON at all.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// A required field is absent or null.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A required string field is empty.
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// A field has the wrong JSON type.
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        /// Offending field name.
        field: &'static str,
        /// What was expected instead.
        expected: &'static str,
    },
}

// ── Verb declaration ────────────────────────────────────────────────

/// Verb declaration failed while building a backend's verb table.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The same verb name was declared twice on one backend type.
    #[error("backend '{backend}' already implements the verb '{verb}'")]
    DuplicateVerb {
        /// Type name of the backend.
        backend: &'static str,
        /// Verb declared twice.
        verb: String,
    },

    /// A verb was declared with an empty name.
    #[error("backend '{backend}' declared a verb with an empty name")]
    EmptyVerbName {
        /// Type name of the backend.
        backend: &'static str,
    },
}

// ── Verb and dispatch failures ──────────────────────────────────────

/// Failure returned by a verb.
///
/// `Rpc` is an explicit error value and always reaches the caller. `Raised`
/// and `Panicked` are failures: the backend either converts them into an
/// `InternalError` response or lets them escape as a [`DispatchError`].
#[derive(Debug, thiserror::Error)]
pub enum VerbError {
    /// An error value produced by the verb.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The verb failed.
    #[error("{0:#}")]
    Raised(#[from] anyhow::Error),

    /// The verb panicked; carries the panic message.
    #[error("{0}")]
    Panicked(String),
}

impl VerbError {
    /// Turn a failure into an `anyhow::Error` for propagation.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Rpc(err) => anyhow::Error::new(err),
            Self::Raised(err) => err,
            Self::Panicked(message) => anyhow::anyhow!("verb panicked: {message}"),
        }
    }
}

/// A raised verb failure that the backend did not convert into a response.
///
/// Transports catch this at their boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The verb raised and the backend propagates failures.
    #[error("verb '{verb}' in domain '{domain}' failed: {source:#}")]
    HandlerFailed {
        /// Domain of the failing request.
        domain: String,
        /// Verb of the failing request.
        verb: String,
        /// What the verb raised.
        source: anyhow::Error,
    },
}
