use std::{sync::Arc, time::Duration};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing with the backend.
///
/// Failing to converge to a target change number is *not* an error. Synchronizers report it as a
/// plain boolean outcome, so an `Err` always means the backend could not be talked to.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The backend answered with a non-2xx status code.
    #[error("backend responded with HTTP status {status}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
    },

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// The client did not become ready within the given time.
    #[error("client was not ready after {0:?}")]
    Timeout(Duration),

    /// The client has been destroyed.
    #[error("client has been destroyed")]
    Destroyed,

    /// A background thread panicked. This should normally never happen.
    #[error("background thread panicked")]
    ThreadPanicked,
}

impl Error {
    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status } => Some(*status),
            Error::Unauthorized => Some(401),
            Error::Network(err) => err.status().map(|it| it.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if the backend rejected the request URI as too long (HTTP 414). That is
    /// usually caused by query parameters added for CDN bypass and retrying does not help.
    pub fn is_uri_too_long(&self) -> bool {
        self.status() == Some(414)
    }

    /// Returns `true` for errors that retrying can never fix.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidBaseUrl(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
