//! Error types for uploads, transfers and the server lifecycle.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::upload::UploadState;

/// Errors which end a single upload. None of them affect other connections.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The accumulation buffer could not be allocated.
    #[error("could not allocate {requested} bytes for upload buffer")]
    Allocation {
        /// Requested capacity in bytes
        requested: usize,
    },

    /// The body is larger than the buffer sized for it.
    #[error("upload overflows its buffer: {attempted} bytes offered, capacity {capacity}")]
    Overflow {
        /// Capacity of the session buffer
        capacity: usize,
        /// Offset the write would have reached
        attempted: usize,
    },

    /// Operation not permitted in the session's current state.
    #[error("cannot {operation} an upload in state {state:?}")]
    InvalidState {
        /// State the session was in
        state: UploadState,
        /// Attempted operation
        operation: &'static str,
    },

    /// The request body stream failed before completion.
    #[error("request body failed: {0}")]
    Body(String),
}

impl UploadError {
    /// Method for obtaining the status code reported to the uploading client
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Overflow { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Allocation { .. } | Self::InvalidState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Errors of a single producer iteration.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP request could not be completed.
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// A response fragment was not accepted in full.
    #[error("response fragment of {offered} bytes, only {accepted} accepted")]
    ShortWrite {
        /// Fragment size handed over by the transport
        offered: usize,
        /// Bytes taken by the capture
        accepted: usize,
    },

    /// The transport gave up before the body was fully produced.
    #[error("transport stopped after {sent} of {total} bytes")]
    Incomplete {
        /// Bytes pulled from the producer
        sent: usize,
        /// Payload length
        total: usize,
    },
}

/// Errors which stop the server as a whole.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving on the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
