//! Error types shared across the pipeline
//!
//! Component seams return these typed errors; the CLI and orchestrator wrap
//! them in `anyhow` with context.

use std::path::PathBuf;

/// Failures of the structural source editor
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// The grammar could not be loaded or the parser gave up
    #[error("parser unavailable: {0}")]
    Parser(String),

    /// The source contains syntax errors, so byte ranges cannot be trusted
    #[error("source does not parse cleanly (line {line}, column {column})")]
    Unparsable { line: usize, column: usize },
}

/// Failures talking to the reasoning service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No API key could be resolved from config or environment
    #[error("no API key configured; set TESTAGON_API_KEY or run 'testagon init' and edit .testagon.json")]
    MissingApiKey,

    /// Transport-level failure (connection refused, TLS, body read)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("{0}")]
    Api(String),

    /// The response did not match the requested schema
    #[error("malformed '{schema}' response: {message} (preview: {preview})")]
    Malformed {
        schema: &'static str,
        message: String,
        preview: String,
    },
}

/// Failures of a single test-generation unit
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_error_names_schema() {
        let err = ServiceError::Malformed {
            schema: "validate_syntax",
            message: "missing field `updated_file`".to_string(),
            preview: "{}".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("validate_syntax"));
        assert!(text.contains("updated_file"));
    }
}
