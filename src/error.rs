use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Errors produced while ingesting result payloads.
///
/// Rendering itself never fails: every render entry point returns a `String`
/// for every input, degrading malformed template syntax to literal text.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid results payload: {0}")]
    InvalidResults(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
