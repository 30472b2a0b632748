// Error type shared by the Code Climate client and the secret uploader.
// Every variant that comes from a remote API keeps the raw response body so
// the caller can print exactly what the service answered.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Slug is not of the `owner/name` form.
    #[error("malformed repository slug `{0}` (expected owner/name)")]
    MalformedSlug(String),

    /// Token contains characters that cannot go in an HTTP header.
    #[error("token cannot be used in an Authorization header")]
    InvalidToken,

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}\nRESPONSE: {body}")]
    Api {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("unable to decode response from {endpoint}: {source}\nRESPONSE: {body}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// Lookup returned an empty result set.
    #[error("{kind} `{name}` not found\nRESPONSE: {body}")]
    NotFound {
        kind: &'static str,
        name: String,
        body: String,
    },

    #[error("unable to decode repository public key: {0}")]
    PublicKey(String),

    #[error("unable to seal secret value")]
    Seal,

    #[error("test reporter id for `{slug}` still missing after {attempts} attempts")]
    Timeout { slug: String, attempts: u32 },
}

impl Error {
    /// True when a lookup came back empty, so callers can branch on
    /// "create if absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>, body: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
            body: body.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
