//! Crate-wide error types, one enum per subsystem seam.
//!
//! Subsystem errors convert into [`CoreError`] at the worker boundary, where
//! the propagation policy (retry / degrade / fail) is decided.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("failed to find browser executable: {0}")]
    NotFound(String),
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),
    #[error("failed to create page: {0}")]
    PageCreationFailed(String),
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("browser is disconnected and relaunch did not succeed")]
    Disconnected,
    #[error("io error: {0}")]
    Io(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("navigation timed out")]
    Timeout,
    #[error("unexpected navigation error: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("deadline exceeded before any usable text was produced")]
    DeadlineExceeded,
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("structured output validation error: {0}")]
    StructuredOutputValidation(String),
    #[error("request timed out")]
    Timeout,
}

impl ModelError {
    /// Mirrors the source's `is_structured_output_error`: true when the error
    /// is, or wraps, a structured-output parse failure.
    pub fn is_structured_output_error(&self) -> bool {
        match self {
            ModelError::StructuredOutputValidation(_) => true,
            ModelError::Provider(msg) => {
                msg.contains("StructuredOutputValidationError")
                    || msg.contains("Failed to parse structured output")
            }
            ModelError::Timeout => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("empty research idea")]
    EmptyResearchIdea,
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} is no longer held by this worker")]
    LeaseLost(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Aggregate error surfaced at the worker boundary. Never rendered verbatim
/// to a user — only `{status, current_node, progress_message, error?}` crosses
/// that boundary (per the user-visible-behaviour contract).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error("{0}")]
    Other(String),
}
