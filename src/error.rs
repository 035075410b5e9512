//! Error types for the verifier.

use thiserror::Error;

use crate::domain::encoding::Compression;
use crate::domain::events::FatalError;

/// A compressed value that could not be decompressed.
///
/// Local to one row and column: the detector records the row as an
/// undecodable mismatch rather than aborting the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {algorithm} block: {reason}")]
pub struct DecompressionError {
    pub algorithm: Compression,
    pub reason: String,
}

/// Main error type for verification operations.
#[derive(Error, Debug)]
pub enum VerifierError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Value could not be canonicalized
    #[error(transparent)]
    Decompression(#[from] DecompressionError),

    /// Reading rows from either side failed
    #[error("Fetch failed for table {table}: {source:#}")]
    Fetch {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Source and target diverged; the message is the fatal error text
    #[error("{0}")]
    MismatchDetected(FatalError),

    /// The caller sequenced signals incorrectly
    #[error("Orchestrator misuse: {0}")]
    OrchestratorMisuse(String),

    /// The verifier already failed; no further passes run
    #[error("Verifier halted after a previous failure")]
    Halted,

    /// The migration was aborted
    #[error("Verification cancelled")]
    Cancelled,

    /// A spawned verification task panicked or was aborted
    #[error("Verification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl VerifierError {
    /// Create a Fetch error
    pub fn fetch(table: impl Into<String>, source: anyhow::Error) -> Self {
        VerifierError::Fetch {
            table: table.into(),
            source,
        }
    }

    /// The fatal record carried by a mismatch, if any.
    pub fn fatal(&self) -> Option<&FatalError> {
        match self {
            VerifierError::MismatchDetected(f) => Some(f),
            _ => None,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for verifier operations.
pub type Result<T> = std::result::Result<T, VerifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_displays_fatal_message() {
        let err = VerifierError::MismatchDetected(FatalError::message("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.fatal().map(|f| f.message.as_str()), Some("boom"));
    }

    #[test]
    fn fetch_error_names_table_and_cause() {
        let err = VerifierError::fetch("db.t", anyhow::anyhow!("connection reset"));
        let text = err.to_string();
        assert!(text.contains("db.t"), "{}", text);
        assert!(text.contains("connection reset"), "{}", text);
    }
}
