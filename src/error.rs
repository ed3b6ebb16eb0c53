//! Error types for configuration loading, routing and mirroring

use hyper::StatusCode;
use std::path::PathBuf;

/// Boxed error used for failures coming out of the outbound transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup configuration errors. All of these are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error during unmarshal of {var}: {source}")]
    InvalidJson {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read config file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is required: set CONFIG/CONFIG_FILE (multi-tenant) or TARGET_DOMAIN (single-tenant)")]
    MissingTarget,

    #[error("CONFIG and TARGET_DOMAIN are mutually exclusive")]
    ConflictingModes,

    #[error("invalid header name {name:?}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: hyper::header::InvalidHeaderName,
    },

    #[error("UPSTREAM_TIMEOUT_SECS must be greater than 0")]
    ZeroTimeout,

    #[error("invalid rewrite pattern: {0}")]
    InvalidPattern(#[from] aho_corasick::BuildError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failures while mirroring a single request
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("invalid destination URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("error reading response body: {0}")]
    BodyRead(#[source] BoxError),
}

impl MirrorError {
    /// Whether another attempt may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::Transport(_))
    }
}

/// Errors resolving which target an inbound request belongs to
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("Host header is not set")]
    MissingHostHeader,

    #[error("Host config not found")]
    UnknownHost(String),

    #[error("EXTERNAL_URL query parameter is not set")]
    MissingExternalUrl,
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::MissingHostHeader | RouteError::MissingExternalUrl => {
                StatusCode::BAD_REQUEST
            }
            RouteError::UnknownHost(_) => StatusCode::NOT_FOUND,
        }
    }
}
