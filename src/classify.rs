//! Mapping raw probe failures onto a closed set of user-facing error kinds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::ProbeError;

const DEFAULT_TIMEOUT_MESSAGE: &str = "Request timeout";
const DEFAULT_UNKNOWN_MESSAGE: &str = "Unknown error occurred";

/// The kind of failure a check ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The host could not be reached.
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    /// The request was refused before any response was usable.
    #[serde(rename = "CORS_ERROR")]
    Cors,
    /// The request took longer than the probe timeout.
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    /// The upstream answered with a 5xx status.
    #[serde(rename = "SERVER_ERROR")]
    Server,
    /// Anything else.
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    /// Whether retrying the same check can reasonably succeed.
    ///
    /// Network, timeout and server failures are transient; CORS and unknown
    /// failures need a different fix first.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "NETWORK_ERROR"),
            Self::Cors => write!(f, "CORS_ERROR"),
            Self::Timeout => write!(f, "TIMEOUT_ERROR"),
            Self::Server => write!(f, "SERVER_ERROR"),
            Self::Unknown => write!(f, "UNKNOWN_ERROR"),
        }
    }
}

/// A probe failure ready to show to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status, for server errors.
    pub status_code: Option<u16>,
    /// When the failure was classified.
    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Whether a retry action should be offered.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Classify `error`, stamped with the current time.
///
/// ```
/// use npm_avail::classify::{classify, ErrorKind};
/// use npm_avail::registry::ProbeError;
///
/// let classified = classify(&ProbeError::Status { code: 503 });
/// assert_eq!(classified.kind, ErrorKind::Server);
/// assert_eq!(classified.status_code, Some(503));
/// assert!(classified.is_recoverable());
/// ```
#[must_use]
pub fn classify(error: &ProbeError) -> ClassifiedError {
    classify_at(error, Utc::now())
}

/// Classify `error` with an explicit timestamp. Pure and total.
///
/// Rules are tried in order and the first match wins:
/// 1. a fired timeout is [`ErrorKind::Timeout`];
/// 2. a failed fetch is [`ErrorKind::Cors`];
/// 3. any message mentioning `Network` is [`ErrorKind::Network`];
/// 4. a status of 500 or above is [`ErrorKind::Server`];
/// 5. everything else is [`ErrorKind::Unknown`].
#[must_use]
pub fn classify_at(error: &ProbeError, occurred_at: DateTime<Utc>) -> ClassifiedError {
    let message = error.to_string();
    let (kind, message, status_code) = match error {
        ProbeError::Aborted { reason } => (
            ErrorKind::Timeout,
            reason
                .clone()
                .unwrap_or_else(|| DEFAULT_TIMEOUT_MESSAGE.to_owned()),
            None,
        ),
        ProbeError::FetchFailed { .. } => (ErrorKind::Cors, message, None),
        _ if message.contains("Network") => (ErrorKind::Network, message, None),
        _ => match error.status_code() {
            Some(code) if code >= 500 => (ErrorKind::Server, message, Some(code)),
            _ if message.is_empty() => (
                ErrorKind::Unknown,
                DEFAULT_UNKNOWN_MESSAGE.to_owned(),
                None,
            ),
            _ => (ErrorKind::Unknown, message, None),
        },
    };
    ClassifiedError {
        kind,
        message,
        status_code,
        occurred_at,
    }
}
