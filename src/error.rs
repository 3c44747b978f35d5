//! Error types for request execution.
//!
//! Every failure of a logical request is reported as a [`RequestError`]
//! through the engine's single failure path. The variants mirror where the
//! failure originated: building the wire request, the transport, the
//! authentication retry protocol, the download destination, or an explicit
//! cancel.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning a descriptor into a wire request.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The URL is well-formed but not HTTP or HTTPS.
    #[error("unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme {
        /// The URL that was rejected.
        url: String,
        /// The scheme found in the URL.
        scheme: String,
    },

    /// A caller-supplied header name or value is not valid on the wire.
    #[error("invalid request header '{name}'")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// A POST file field references a path that does not exist or cannot be read.
    #[error("file for POST field '{field}' not readable at {path}: {source}")]
    FileNotFound {
        /// The POST field name.
        field: String,
        /// The declared file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsupported scheme error.
    pub fn unsupported_scheme(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            url: url.into(),
            scheme: scheme.into(),
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Creates a missing/unreadable file error.
    pub fn file_not_found(
        field: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileNotFound {
            field: field.into(),
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the transport (connection, TLS, timeouts, body IO).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection to {url} failed: {source}")]
    Connect {
        /// The target URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The exchange did not finish within the configured timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The target URL.
        url: String,
    },

    /// Any other HTTP client failure (protocol error, TLS, body decode).
    #[error("network error requesting {url}: {source}")]
    Http {
        /// The target URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Reading an upload file failed while streaming the request body.
    #[error("IO error reading upload file {path}: {source}")]
    Io {
        /// The file being streamed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The event stream ended without a completion or error event.
    #[error("stream ended before the response completed")]
    UnexpectedEof,

    /// Failure reported by a transport that does not map onto the other variants.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Classifies a reqwest error for the given URL.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else if source.is_connect() {
            Self::Connect { url, source }
        } else {
            Self::Http { url, source }
        }
    }

    /// Creates an upload file IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a free-form transport error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Why an authentication challenge could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No preset, stored, or delegate-supplied credentials were available.
    NoCredentials,
    /// The delegate explicitly declined to supply credentials.
    Declined,
    /// Every credential source was tried and the server still challenged.
    Rejected,
    /// The server only offered authentication schemes this engine cannot answer.
    UnsupportedScheme,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoCredentials => "no credentials available",
            Self::Declined => "credentials declined",
            Self::Rejected => "credentials rejected",
            Self::UnsupportedScheme => "unsupported authentication scheme",
        };
        f.write_str(text)
    }
}

/// Terminal error of a logical request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The descriptor could not be turned into a wire request.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The transport failed, surfaced verbatim.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An authentication challenge could not be resolved.
    #[error("[AUTH] authentication failed for realm '{realm}': {reason}")]
    Authentication {
        /// Realm of the unresolved challenge.
        realm: String,
        /// Why resolution failed.
        reason: AuthFailure,
    },

    /// Writing the download destination failed.
    #[error("IO error writing to {path}: {source}")]
    Output {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Creates an authentication error.
    pub fn authentication(realm: impl Into<String>, reason: AuthFailure) -> Self {
        Self::Authentication {
            realm: realm.into(),
            reason,
        }
    }

    /// Creates a destination write error.
    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error came from an explicit cancel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
