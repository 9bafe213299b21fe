//! Error types for the ietfpaper core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the pipeline engine, data fetching, transforms, configuration,
//! and document checks.

use std::path::PathBuf;

/// Top-level error type for the ietfpaper core library.
#[derive(Debug, thiserror::Error)]
pub enum PaperError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document check error: {0}")]
    Check(#[from] CheckError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from parsing, planning and executing the rule graph.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline parse error: {message}")]
    ParseError { message: String },

    #[error("Pipeline validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Dependency cycle involving rule '{rule}'")]
    Cycle { rule: String },

    #[error("Source file '{path}' required by rule '{rule}' does not exist")]
    MissingSource { rule: String, path: PathBuf },

    #[error("Unknown rule: {rule}")]
    UnknownRule { rule: String },

    #[error("Template error: {message}")]
    TemplateError { message: String },

    #[error("Rule '{rule}' failed: {message}")]
    RuleFailed { rule: String, message: String },

    #[error("Rule '{rule}' timed out after {timeout_secs}s")]
    Timeout { rule: String, timeout_secs: u64 },

    #[error("Manifest '{path}' is invalid: {message}")]
    InvalidManifest { path: PathBuf, message: String },
}

/// Errors from HTTP and IMAP downloads.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Unexpected response from {url}: {message}")]
    ResponseParse { url: String, message: String },

    #[error("IMAP error: {message}")]
    Imap { message: String },

    #[error("Mail folder not found: {folder}")]
    FolderNotFound { folder: String },
}

/// Errors from the data transforms.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Invalid input {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Rule '{rule}' expects {expected} input(s), found {found}")]
    InputCount {
        rule: String,
        expected: usize,
        found: usize,
    },
}

impl From<rusqlite::Error> for PaperError {
    fn from(err: rusqlite::Error) -> Self {
        PaperError::Transform(TransformError::Database(err))
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the document check passes.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Document checks reported {count} problem(s)")]
    Findings { count: usize },

    #[error("No document sources matched {pattern}")]
    NoSources { pattern: String },

    #[error("Invalid check pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A type alias for results using the top-level `PaperError`.
pub type Result<T> = std::result::Result<T, PaperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_pipeline() {
        let err = PaperError::Pipeline(PipelineError::Cycle {
            rule: "plot-rfcs".into(),
        });
        assert_eq!(
            err.to_string(),
            "Pipeline error: Dependency cycle involving rule 'plot-rfcs'"
        );
    }

    #[test]
    fn test_error_display_fetch() {
        let err = PaperError::Fetch(FetchError::Status {
            url: "https://datatracker.ietf.org/api/v1/doc/document/".into(),
            status: 503,
        });
        assert_eq!(
            err.to_string(),
            "Fetch error: HTTP 503 from https://datatracker.ietf.org/api/v1/doc/document/"
        );
    }

    #[test]
    fn test_error_display_missing_source() {
        let err = PipelineError::MissingSource {
            rule: "rfcs-by-year".into(),
            path: PathBuf::from("downloads/rfc-index.xml"),
        };
        assert_eq!(
            err.to_string(),
            "Source file 'downloads/rfc-index.xml' required by rule 'rfcs-by-year' does not exist"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PaperError = io_err.into();
        assert!(matches!(err, PaperError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: PaperError = serde_err.into();
        assert!(matches!(err, PaperError::Serialization(_)));
    }

    #[test]
    fn test_transform_error_input_count() {
        let err = TransformError::InputCount {
            rule: "draft-index".into(),
            expected: 3,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Rule 'draft-index' expects 3 input(s), found 1"
        );
    }
}
