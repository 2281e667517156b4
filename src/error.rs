use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by transports and by the authenticating decorator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("body stream error: {0}")]
    Body(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint rejected the grant ({status}): {code}")]
    TokenRejected {
        status: StatusCode,
        code: String,
        description: Option<String>,
    },

    /// The token endpoint answered 2xx with something that is not a usable token.
    #[error("invalid token response: {0}")]
    TokenResponse(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// First attempt failed before any response was received.
    #[error("request failed: {0}")]
    Request(#[source] Box<Error>),

    /// The renewal round's task ended before producing an outcome.
    #[error("token renewal round aborted")]
    RenewalAborted,

    /// Token renewal failed; shared by every caller joined to the same renewal round.
    #[error("token renewal failed: {0}")]
    Renewal(#[source] Arc<Error>),

    /// The retried attempt failed before any response was received.
    #[error("retried request failed: {0}")]
    Retry(#[source] Box<Error>),
}

impl Error {
    pub(crate) fn request(err: Error) -> Self {
        Error::Request(Box::new(err))
    }

    pub(crate) fn retry(err: Error) -> Self {
        Error::Retry(Box::new(err))
    }

    /// Innermost error, unwrapping the decorator's context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Request(inner) | Error::Retry(inner) => inner.root(),
            Error::Renewal(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), Error::DeadlineExceeded)
    }

    pub fn is_renewal(&self) -> bool {
        matches!(self, Error::Renewal(_))
    }
}
