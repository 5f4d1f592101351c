use serde::{Serialize, Serializer};
use std::error::Error;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

use http::StatusCode;

/// A cloneable, type-erased transport failure.
///
/// Settlement errors are handed to every waiter of a request, so the
/// underlying cause is shared rather than owned.
pub type BoxedCause = Arc<dyn Error + Send + Sync + 'static>;

/// Possible errors when dispatching a request through `corral_lib`
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The given string cannot be parsed into a URL
    #[error("Cannot parse `{url}` as a URL: {source}")]
    InvalidUrl {
        /// The offending input, verbatim
        url: String,
        /// Reason reported by the URL parser
        #[source]
        source: url::ParseError,
    },

    /// The URL parsed but has no host to schedule requests against
    #[error("URL `{url}` is missing a host")]
    InvalidUrlHost {
        /// The offending input, verbatim
        url: String,
    },

    /// The network call itself failed (connection refused, DNS failure, timeout, ...)
    #[error("Network error while requesting `{url}`: {source}")]
    Transport {
        /// The requested URL
        url: String,
        /// The underlying cause reported by the transport
        #[source]
        source: BoxedCause,
    },

    /// The server answered with a status outside of the success range
    #[error("Request to `{url}` failed with status {status}")]
    HttpStatus {
        /// The requested URL
        url: String,
        /// The status code sent by the server
        status: StatusCode,
    },

    /// The response body is not valid JSON
    #[error("Cannot decode response body of `{url}`: {source}")]
    Decode {
        /// The requested URL
        url: String,
        /// The JSON decoding error
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The task was torn down before it could settle, e.g. because the
    /// runtime shut down or the transport panicked
    #[error("Request to `{url}` was abandoned before it completed")]
    Abandoned {
        /// The requested URL
        url: String,
    },

    /// The default HTTP client could not be created
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] Arc<reqwest::Error>),
}

impl ErrorKind {
    /// Wrap any transport failure
    pub fn transport<E>(url: impl Into<String>, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Transport {
            url: url.into(),
            source: Arc::new(cause),
        }
    }

    /// `true` for both flavours of unusable URLs.
    /// These are reported before any request is scheduled.
    #[must_use]
    pub const fn is_invalid_url(&self) -> bool {
        matches!(self, Self::InvalidUrl { .. } | Self::InvalidUrlHost { .. })
    }

    /// The status code carried by an [`ErrorKind::HttpStatus`]
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The URL this error relates to, if any
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::InvalidUrl { url, .. }
            | Self::InvalidUrlHost { url }
            | Self::Transport { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::Decode { url, .. }
            | Self::Abandoned { url } => Some(url),
            Self::BuildClient(_) => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::InvalidUrl {
                    url: u1,
                    source: e1,
                },
                Self::InvalidUrl {
                    url: u2,
                    source: e2,
                },
            ) => u1 == u2 && e1 == e2,
            (
                Self::HttpStatus {
                    url: u1,
                    status: s1,
                },
                Self::HttpStatus {
                    url: u2,
                    status: s2,
                },
            ) => u1 == u2 && s1 == s2,
            (Self::Transport { url: u1, source: e1 }, Self::Transport { url: u2, source: e2 }) => {
                u1 == u2 && e1.to_string() == e2.to_string()
            }
            (Self::Decode { url: u1, source: e1 }, Self::Decode { url: u2, source: e2 }) => {
                u1 == u2 && e1.to_string() == e2.to_string()
            }
            (Self::InvalidUrlHost { url: u1 }, Self::InvalidUrlHost { url: u2 })
            | (Self::Abandoned { url: u1 }, Self::Abandoned { url: u2 }) => u1 == u2,
            (Self::BuildClient(e1), Self::BuildClient(e2)) => e1.to_string() == e2.to_string(),
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::HttpStatus { url, status } => (url, status.as_u16()).hash(state),
            Self::BuildClient(e) => e.to_string().hash(state),
            _ => self.url().hash(state),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(e: reqwest::Error) -> Self {
        Self::BuildClient(Arc::new(e))
    }
}
