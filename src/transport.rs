//! The seam between the transfer loop and the network.

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::{header, Body, Client};

use crate::{
    error::TransferError,
    transfer::TransferSession,
};

/// `Transport` executes one upload, pulling the body from the session and pushing the
///   response back into it. Calls for one session are never concurrent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the request to completion, return the response status
    async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError>;
}

/// `HttpTransport` uploads over HTTP/1.1 with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// Connection pool shared by all iterations
    client: Client,
    /// Largest chunk pulled from the producer at once
    chunk_size: usize,
}

impl HttpTransport {
    /// Associated function for creating a transport pulling `chunk_size` bytes at a time
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            client: Client::new(),
            chunk_size,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError> {

        // The length is known up front, so the body is framed by Content-Length only
        let body = Body::wrap_stream(session.body_stream(self.chunk_size));
        let mut response = self.client.post(session.endpoint())
                            .header(header::CONTENT_LENGTH, session.payload_len())
                            .header(header::CONTENT_TYPE, "application/json")
                            .body(body)
                            .send()
                            .await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        while let Some(fragment) = response.chunk().await? {
            let accepted = session.on_response_data(&fragment);
            if accepted != fragment.len() {
                return Err(TransferError::ShortWrite {
                    offered: fragment.len(),
                    accepted,
                });
            }
        }

        if !session.is_finished() {
            return Err(TransferError::Incomplete {
                sent: session.bytes_sent(),
                total: session.payload_len(),
            });
        }
        Ok(status)
    }
}
