//! Crate-level error type.
//!
//! Every failure the refresher can hit maps onto one [`RefreshError`]
//! variant. None of them are fatal: the poll loop logs the error and waits
//! for the next tick.

use thiserror::Error;

/// Errors produced while polling, patching, replying or toggling.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// A TCP-level connection could not be established, or the request
    /// failed before a response arrived.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The server replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A response body could not be parsed as the expected JSON shape.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },

    /// The server answered but reported the operation as unsuccessful.
    #[error("server rejected request to {url}")]
    Rejected { url: String },

    /// An element the operation depends on is not in the live document.
    #[error("no element matches '{selector}'")]
    MissingNode { selector: String },

    /// The page carries no session identifier to poll or toggle.
    #[error("no user id on '{selector}'")]
    MissingUserId { selector: String },

    /// The reply body was empty after trimming.
    #[error("reply message is empty")]
    EmptyMessage,

    /// No anti-forgery token could be found in any configured source.
    #[error("no anti-forgery token available")]
    MissingToken,

    /// A selector string could not be parsed.
    #[error("invalid selector '{selector}': {detail}")]
    Selector { selector: String, detail: String },

    /// Configuration could not be loaded or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RefreshError {
    /// Build a [`RefreshError::Connect`] from a reqwest transport failure.
    pub fn connect(url: impl Into<String>, err: reqwest::Error) -> Self {
        RefreshError::Connect {
            url: url.into(),
            detail: err.to_string(),
        }
    }

    /// True for outcomes the dispatcher treats as a silent abort rather
    /// than a failure worth a warning.
    pub fn is_silent(&self) -> bool {
        matches!(self, RefreshError::EmptyMessage)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RefreshError>;
