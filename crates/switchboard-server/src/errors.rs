//! Server and settings error types.

use switchboard_rpc::RegistryError;
use thiserror::Error;

/// Errors raised while building, starting or stopping a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A domain was registered without a name.
    #[error("domain name must be specified")]
    EmptyDomainName,
    /// Two backends were registered under one domain name.
    #[error("domain '{0}' is already registered")]
    DuplicateDomain(String),
    /// Domains are frozen once the server has started.
    #[error("cannot register domain '{0}' after the server has started")]
    DomainsFrozen(String),
    /// `start()` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying IO failure.
        source: std::io::Error,
    },
    /// A backend's setup hook failed.
    #[error("setup of domain '{domain}' failed: {source:#}")]
    Setup {
        /// Domain whose backend failed.
        domain: String,
        /// What went wrong.
        source: anyhow::Error,
    },
    /// A backend's verb table could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        assert_eq!(
            ServerError::EmptyDomainName.to_string(),
            "domain name must be specified"
        );
        assert_eq!(
            ServerError::DuplicateDomain("Math".into()).to_string(),
            "domain 'Math' is already registered"
        );
        let err = ServerError::Setup {
            domain: "Math".into(),
            source: anyhow::anyhow!("db offline"),
        };
        assert_eq!(err.to_string(), "setup of domain 'Math' failed: db offline");
    }

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "localhost:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("localhost:80"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn settings_error_display() {
        let err = SettingsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(err.to_string().contains("not found"));

        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err = SettingsError::from(json_err);
        assert!(err.to_string().starts_with("failed to parse settings JSON"));
    }
}
