//! Unified error type for virtlib.
//!
//! All crates funnel their failures into [`Error`]. The rewrite pipeline never
//! turns these into client-visible failures on its own; the only place an
//! error maps onto an HTTP status is the forwarding transport, via
//! [`Error::http_status`].

use std::fmt;

/// Which half of an upstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// The request could not be sent, or the upstream answered non-2xx.
    Transport,
    /// The upstream answered, but the body was not the JSON we expected.
    Decode,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErrorKind::Transport => f.write_str("transport"),
            UpstreamErrorKind::Decode => f.write_str("decode"),
        }
    }
}

/// Unified error type covering all failure modes in virtlib.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A body could not be decoded or encoded under its content encoding.
    #[error("Codec error [{encoding}]: {message}")]
    Codec {
        /// The content encoding in play (as sent on the wire).
        encoding: String,
        /// Human-readable error description.
        message: String,
    },

    /// A call to the upstream media server failed.
    #[error("Upstream {kind} error: {message}")]
    Upstream {
        /// Transport or decode failure.
        kind: UpstreamErrorKind,
        /// Human-readable error description.
        message: String,
    },

    /// The configuration is malformed. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stage of background image harvesting failed.
    #[error("Harvest error [{stage}]: {message}")]
    Harvest {
        /// The harvest stage that failed (resolve, download, cover, record).
        stage: String,
        /// Human-readable error description.
        message: String,
    },

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code for the forwarding transport.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Upstream { .. } => 502,
            Error::Codec { .. } => 502,
            Error::Configuration(_) => 500,
            Error::Harvest { .. } => 500,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Codec`].
    pub fn codec(encoding: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Codec {
            encoding: encoding.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for a transport-level [`Error::Upstream`].
    pub fn transport(message: impl fmt::Display) -> Self {
        Error::Upstream {
            kind: UpstreamErrorKind::Transport,
            message: message.to_string(),
        }
    }

    /// Convenience constructor for a decode-level [`Error::Upstream`].
    pub fn decode(message: impl fmt::Display) -> Self {
        Error::Upstream {
            kind: UpstreamErrorKind::Decode,
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Harvest`].
    pub fn harvest(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Harvest {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
