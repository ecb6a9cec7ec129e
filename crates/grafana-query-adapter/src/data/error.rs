//! Errors produced while interpreting query responses.
use thiserror::Error;

/// Errors that can occur when interpreting the body returned by the query endpoint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The body was not valid JSON, or did not have the expected shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame had no fields, so there was nothing to read values from.
    #[error("frame {frame:?} has no fields")]
    NoFields {
        /// The name of the frame.
        frame: String,
    },
}
