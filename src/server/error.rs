//! Error types for the HTTP server.

use thiserror::Error;

use crate::parser::Error as ParserError;

/// Errors that can occur during HTTP server operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing an HTTP request.
    #[error("parse error: {0}")]
    Parse(#[from] ParserError),

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A response-writer call arrived out of phase order.
    #[error("response state error: {0}")]
    ResponseState(&'static str),

    /// The connection was already hijacked.
    #[error("connection already hijacked")]
    AlreadyHijacked,

    /// A handler surfaced a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
