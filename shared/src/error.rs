//! Error types for the dataset scanner.

use thiserror::Error;

use crate::assistant::RunStatus;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the proxy endpoints, poller and normalizer.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed caller input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// External API answered with a non-success status
    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A required secret is not configured
    #[error("{0} configuration missing")]
    ConfigurationMissing(&'static str),

    /// Assistant run reached a terminal non-success status
    #[error("Run {0}")]
    RunFailed(RunStatus),

    /// Attempt budget exhausted before the run settled
    #[error("Run polling timed out after {attempts} attempts")]
    PollingTimedOut { attempts: u32 },

    /// Polling was cancelled by the caller
    #[error("Run polling cancelled")]
    Cancelled,

    /// Upstream payload could not be normalized
    #[error("Failed to parse response")]
    ResponseParseFailed,

    /// Requested format has no normalizer
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Transport failure talking to an external API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Upstream { status, .. } => *status,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::BadRequest("no path".into()).status_code(), 400);
        assert_eq!(
            Error::Upstream {
                status: 404,
                body: "missing".into()
            }
            .status_code(),
            404
        );
        assert_eq!(Error::ConfigurationMissing("OpenAI").status_code(), 500);
        assert_eq!(Error::PollingTimedOut { attempts: 30 }.status_code(), 500);
        assert_eq!(Error::RunFailed(RunStatus::Expired).status_code(), 500);
    }

    #[test]
    fn test_run_failed_message_carries_status() {
        assert_eq!(Error::RunFailed(RunStatus::Cancelled).to_string(), "Run cancelled");
    }
}
