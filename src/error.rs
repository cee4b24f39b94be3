//! Error handling for the proxy pool

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candidate string is not `[user:pass@]ipv4:port`
    #[error("Invalid proxy format: {0}")]
    Format(String),

    /// Probe did not complete within the configured timeout
    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    /// Probe failed to connect or returned a non-200 status
    #[error("Probe refused: {0}")]
    ProbeRefused(String),

    /// Geolocation service unreachable or returned an error envelope
    #[error("Geolocation unavailable: {0}")]
    GeolocationUnavailable(String),

    /// Pool store error
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Candidate source failed to produce candidates
    #[error("Source {name} failed: {reason}")]
    Source { name: String, reason: String },

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML decode error
    #[error("TOML error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    /// TOML encode error
    #[error("TOML error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a probe outcome rather than a failure to run the probe
    pub fn is_probe_failure(&self) -> bool {
        matches!(self, Error::ProbeTimeout(_) | Error::ProbeRefused(_))
    }
}
