//! Error types for ovhddns
//!
//! The API client and the update coordinator surface a closed set of error
//! kinds so callers branch on the variant instead of matching message text.
//! Soft conditions (a parse miss, a non-fatal HTTP status, an exhausted
//! detection chain) are represented as absent values and never reach this
//! enum.

use thiserror::Error;

/// Result type alias for API and coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal error kinds for a single run
#[derive(Error, Debug)]
pub enum Error {
    /// Connect failure or timeout on an API call
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API rejected the credentials (HTTP 403)
    #[error("access denied by the zone API (403); credentials invalid or not yet validated")]
    Unauthorized,

    /// The API rejected the request itself (HTTP 400)
    #[error("request rejected by the zone API (400): {0}")]
    BadRequest(String),

    /// A call that must produce a result came back empty or malformed
    #[error("unexpected zone API response: {0}")]
    UnexpectedResponse(String),

    /// A required configuration field is absent
    #[error("missing configuration field: {0}")]
    MissingField(&'static str),

    /// No record matched the subdomain and creation was not requested
    #[error("no record found for subdomain '{0}'")]
    RecordNotFound(String),

    /// Several records matched and the policy refuses to pick one
    #[error("{count} records match subdomain '{subdomain}'; refusing to pick one (set multi_record = \"first\" to override)")]
    AmbiguousRecords {
        /// Number of matching records
        count: usize,
        /// The subdomain that was queried
        subdomain: String,
    },
}

impl Error {
    /// Create an unexpected-response error
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }
}

//==============================================================================
// Tests
//==============================================================================
