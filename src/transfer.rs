//! This module provides the producer side of a transfer: `BodyProducer`, `ResponseCapture`
//!   and the `TransferSession` bundling them for one loop iteration.

use std::{
    io,
    sync::Arc,
    task::Poll,
};
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;

/// `BodyProducer` hands out a fixed payload in pieces, front to back.
#[derive(Debug)]
pub struct BodyProducer {
    /// Bytes to send
    payload: Bytes,
    /// Offset of the first byte not yet handed out
    cursor: usize,
}

impl BodyProducer {
    /// Associated function for creating a producer over given payload
    #[must_use]
    pub fn new(payload: Bytes) -> Self {
        Self { payload, cursor: 0 }
    }

    /// Pull at most `max_len` further bytes.
    /// Returns `None` once the whole payload was handed out. A `max_len` of zero
    ///   yields an empty chunk and does not end the stream.
    pub fn next_chunk(&mut self, max_len: usize) -> Option<Bytes> {
        if self.cursor >= self.payload.len() {
            return None;
        }
        let n = max_len.min(self.payload.len() - self.cursor);
        let chunk = self.payload.slice(self.cursor..self.cursor + n);
        self.cursor += n;
        Some(chunk)
    }

    /// Method for obtaining the number of bytes handed out so far
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Method for obtaining the payload length
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether every byte was handed out
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.payload.len()
    }
}

/// `ResponseCapture` keeps the first response fragment and counts all of them.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    /// Copy of the first fragment, if any arrived
    first: Option<Bytes>,
    /// Number of fragments seen, kept or not
    fragments: u64,
}

impl ResponseCapture {
    /// Take one response fragment, return how many of its bytes were accepted.
    /// Every fragment is accepted in full, but only the first one is stored.
    pub fn on_response_data(&mut self, fragment: &[u8]) -> usize {
        if self.fragments == 0 {
            self.first = Some(Bytes::copy_from_slice(fragment));
        }
        self.fragments += 1;
        fragment.len()
    }

    /// Method for obtaining the captured first fragment
    #[must_use]
    pub fn first_fragment(&self) -> Option<&[u8]> {
        self.first.as_deref()
    }

    /// Method for obtaining the number of fragments seen
    #[must_use]
    pub fn fragments(&self) -> u64 {
        self.fragments
    }
}

/// Reference to a producer shared between a session and its body stream
type ProducerRef = Arc<Mutex<BodyProducer>>;

/// `TransferSession` is the client state of a single upload iteration.
#[derive(Debug)]
pub struct TransferSession {
    /// Target URL of the upload
    endpoint: String,
    /// Outgoing body
    producer: ProducerRef,
    /// Incoming acknowledgment
    capture: ResponseCapture,
}

impl TransferSession {
    /// Associated function for creating a session with a fresh zero-filled payload
    #[must_use]
    pub fn new(endpoint: impl Into<String>, payload_size: usize) -> Self {
        Self::with_payload(endpoint, Bytes::from(vec![0u8; payload_size]))
    }

    /// Associated function for creating a session sending the given payload
    #[must_use]
    pub fn with_payload(endpoint: impl Into<String>, payload: Bytes) -> Self {
        Self {
            endpoint: endpoint.into(),
            producer: Arc::new(Mutex::new(BodyProducer::new(payload))),
            capture: ResponseCapture::default(),
        }
    }

    /// Method for obtaining the target URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Method for obtaining the payload length, sent as `Content-Length`
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.producer.lock().len()
    }

    /// Pull the next chunk of the body, see [`BodyProducer::next_chunk`]
    pub fn next_chunk(&self, max_len: usize) -> Option<Bytes> {
        self.producer.lock().next_chunk(max_len)
    }

    /// Method for obtaining the number of body bytes pulled so far
    #[must_use]
    pub fn bytes_sent(&self) -> usize {
        self.producer.lock().cursor()
    }

    /// Whether the body was pulled completely
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.producer.lock().is_finished()
    }

    /// Push one fragment of the server's response, see [`ResponseCapture::on_response_data`]
    pub fn on_response_data(&mut self, fragment: &[u8]) -> usize {
        self.capture.on_response_data(fragment)
    }

    /// Method for obtaining the response capture
    #[must_use]
    pub fn capture(&self) -> &ResponseCapture {
        &self.capture
    }

    /// Body as a stream pulling at most `chunk_size` bytes per item.
    /// The stream advances this session's cursor, so progress stays observable.
    pub fn body_stream(&self, chunk_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
        let producer = Arc::clone(&self.producer);
        let chunk_size = chunk_size.max(1);
        futures::stream::poll_fn(move |_| {
            Poll::Ready(producer.lock().next_chunk(chunk_size).map(Ok))
        })
    }
}

// Hic sunt tests:
