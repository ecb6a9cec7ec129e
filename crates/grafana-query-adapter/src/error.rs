//! Error types returned by the adapter.
use std::fmt;

use http::StatusCode;
use thiserror::Error;

use crate::{data, template::TemplateError, transport::TransportError};

/// Errors that can occur while running a query or resolving a variable query.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Template variables could not be interpolated into the query text.
    #[error("template substitution failed: {0}")]
    Template(#[from] TemplateError),

    /// The request could not be delivered to the query endpoint.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The query endpoint responded with a non-success status code.
    #[error("query endpoint returned {status}: {message}")]
    Status {
        /// The status code returned by the endpoint.
        status: StatusCode,
        /// The error message found in the response body, if any.
        message: String,
    },

    /// The response body could not be interpreted.
    #[error("invalid query response: {0}")]
    Response(#[from] data::Error),

    /// The outgoing request body could not be encoded.
    #[error("could not encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

impl Error {
    /// Whether this error originated in the adapter itself or downstream of it.
    pub fn error_source(&self) -> ErrorSource {
        match self {
            Self::Template(_) | Self::Encode(_) => ErrorSource::Plugin,
            Self::Transport(_) | Self::Status { .. } | Self::Response(_) => {
                ErrorSource::Downstream
            }
        }
    }
}

/// The source of an error.
///
/// Errors raised while preparing a request are attributed to the plugin; anything
/// that went wrong once the request left the adapter is attributed downstream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorSource {
    /// The error occurred in the plugin.
    #[default]
    Plugin,
    /// The error occurred downstream of the plugin.
    Downstream,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => f.write_str("plugin"),
            Self::Downstream => f.write_str("downstream"),
        }
    }
}
