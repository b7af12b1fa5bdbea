//! Error types for vocplay core

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Supervisor error types
#[derive(Error, Debug)]
pub enum Error {
    // Probe errors
    #[error("Media probe timed out: {url}")]
    ProbeTimeout { url: String },

    #[error("Media probe failed: {url} returned {status}")]
    ProbeStatus { url: String, status: u16 },

    #[error("Media probe failed: {url}")]
    ProbeRequest { url: String, source: reqwest::Error },

    // Telemetry errors
    #[error("Telemetry delivery failed: {0}")]
    Delivery(String),

    #[error("Telemetry endpoint returned {status}")]
    DeliveryStatus { status: u16 },

    // Source errors
    #[error("No resolvable source URL")]
    NoSource,

    #[error("Invalid source URL: {0}")]
    InvalidSource(String),

    // Supervisor errors
    #[error("Supervisor is not running")]
    SupervisorClosed,

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Error::Delivery(msg.into())
    }

    /// Returns true if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ProbeTimeout { .. }
                | Error::ProbeStatus { .. }
                | Error::ProbeRequest { .. }
                | Error::Delivery(_)
                | Error::DeliveryStatus { .. }
                | Error::Network(_)
        )
    }

    /// Returns the error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ProbeTimeout { .. } => "PROBE_TIMEOUT",
            Error::ProbeStatus { .. } => "PROBE_STATUS",
            Error::ProbeRequest { .. } => "PROBE_REQUEST",
            Error::Delivery(_) => "DELIVERY",
            Error::DeliveryStatus { .. } => "DELIVERY_STATUS",
            Error::NoSource => "NO_SOURCE",
            Error::InvalidSource(_) => "INVALID_SOURCE",
            Error::SupervisorClosed => "SUPERVISOR_CLOSED",
            Error::Network(_) => "NETWORK",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::ConfigParse(_) => "CONFIG_PARSE",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_errors_are_recoverable() {
        let err = Error::ProbeTimeout { url: "https://cdn.example/s1.m3u8".into() };
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), "PROBE_TIMEOUT");

        let err = Error::ProbeStatus { url: "https://cdn.example/s1.m3u8".into(), status: 404 };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Media probe failed: https://cdn.example/s1.m3u8 returned 404");
    }

    #[test]
    fn test_config_errors_are_not_recoverable() {
        assert!(!Error::InvalidConfig("max < initial".into()).is_recoverable());
        assert!(!Error::NoSource.is_recoverable());
        assert!(Error::delivery("connection reset").is_recoverable());
    }
}
