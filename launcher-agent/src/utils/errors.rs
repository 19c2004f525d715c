//! Custom error types for the update agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Corrupt patch archive: {0}")]
    CorruptArchive(String),

    /// Extraction failed partway; the install directory is in a mixed
    /// state. Callers should run the integrity verifier afterwards.
    #[error("Partial install: {completed} of {total} entries extracted, first failure on '{failed_entry}'")]
    PartialInstall {
        completed: usize,
        total: usize,
        failed_entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transfer cancelled")]
    Cancelled,

    /// A second update cycle was triggered while one is in flight.
    #[error("An update is already in progress")]
    UpdateInProgress,

    #[error("No patch available for version {0}")]
    NoPatchAvailable(String),
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => UpdateError::FileSystem(io),
            other => UpdateError::CorruptArchive(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        UpdateError::MalformedResponse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
