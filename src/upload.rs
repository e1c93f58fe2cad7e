//! This module provides `UploadSession`, which reassembles one streamed request body.

use crate::{
    error::UploadError,
    upload_store::ConnectionKey,
};

/// Lifecycle of an upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    /// Created, no buffer yet
    Uninitialized,
    /// Buffer allocated, body bytes are being appended
    Accumulating,
    /// Body ended, buffer released
    Complete,
}

/// Summary of a completed upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    /// Connection the upload arrived on
    pub key: ConnectionKey,
    /// Total body bytes received
    pub bytes: usize,
    /// Number of non-empty deliveries
    pub chunks: u64,
    /// Average delivery size, absent when nothing was delivered
    pub average_chunk: Option<u64>,
}

/// Resolve buffer capacity from a `Content-Length` header value.
/// Absent, unparsable, zero, negative and values above `max_declared` all resolve to `fallback`.
#[must_use]
pub fn declared_capacity(content_length: Option<&str>, fallback: usize, max_declared: u64) -> usize {
    let Some(raw) = content_length else {
        return fallback;
    };
    match raw.trim().parse::<i64>() {
        Ok(len) if len > 0 => u64::try_from(len)
            .ok()
            .filter(|len| *len <= max_declared)
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(fallback),
        Ok(_) => fallback,
        Err(err) => {
            tracing::debug!(value = raw, %err, "could not parse Content-Length, using fallback capacity");
            fallback
        },
    }
}

/// `UploadSession` is the state machine accumulating one request body.
#[derive(Debug)]
pub struct UploadSession {
    /// Registry key of the owning connection
    key: ConnectionKey,
    /// Current lifecycle state
    state: UploadState,
    /// Received bytes, `buffer.len()` is the write offset
    buffer: Vec<u8>,
    /// Bytes the buffer may hold
    capacity: usize,
    /// Number of non-empty deliveries
    chunk_count: u64,
}

impl UploadSession {
    /// Associated function for creating an uninitialized session
    #[must_use]
    pub fn new(key: ConnectionKey) -> Self {
        Self {
            key,
            state: UploadState::Uninitialized,
            buffer: Vec::new(),
            capacity: 0,
            chunk_count: 0,
        }
    }

    /// Associated function for creating a session and immediately initializing it
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Allocation`] when the buffer cannot be allocated.
    pub fn begin(key: ConnectionKey, capacity: usize) -> Result<Self, UploadError> {
        let mut session = Self::new(key);
        session.initialize(capacity)?;
        Ok(session)
    }

    /// Allocate the buffer, moving from `Uninitialized` to `Accumulating`
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Allocation`] when the buffer cannot be allocated,
    ///   [`UploadError::InvalidState`] when already initialized.
    pub fn initialize(&mut self, capacity: usize) -> Result<(), UploadError> {
        if self.state != UploadState::Uninitialized {
            return Err(self.invalid("initialize"));
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| UploadError::Allocation { requested: capacity })?;
        self.buffer = buffer;
        self.capacity = capacity;
        self.state = UploadState::Accumulating;
        Ok(())
    }

    /// Append one delivery at the write offset. Empty deliveries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Overflow`] when the delivery does not fit the buffer,
    ///   [`UploadError::InvalidState`] when not accumulating.
    pub fn on_data(&mut self, data: &[u8]) -> Result<(), UploadError> {
        if self.state != UploadState::Accumulating {
            return Err(self.invalid("append to"));
        }
        if data.is_empty() {
            return Ok(());
        }
        let attempted = self.buffer.len() + data.len();
        if attempted > self.capacity {
            return Err(UploadError::Overflow {
                capacity: self.capacity,
                attempted,
            });
        }
        self.buffer.extend_from_slice(data);
        self.chunk_count += 1;
        Ok(())
    }

    /// End of body: release the buffer and summarize, moving to `Complete`
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidState`] when not accumulating.
    pub fn complete(&mut self) -> Result<UploadSummary, UploadError> {
        if self.state != UploadState::Accumulating {
            return Err(self.invalid("complete"));
        }
        let summary = UploadSummary {
            key: self.key,
            bytes: self.buffer.len(),
            chunks: self.chunk_count,
            average_chunk: (self.buffer.len() as u64).checked_div(self.chunk_count),
        };
        self.buffer = Vec::new();
        self.state = UploadState::Complete;
        Ok(summary)
    }

    /// Method for obtaining the bytes received so far
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Method for obtaining the offset of the next write
    #[must_use]
    pub fn write_offset(&self) -> usize {
        self.buffer.len()
    }

    /// Method for obtaining the buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Method for obtaining the number of non-empty deliveries
    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Method for obtaining the current state
    #[must_use]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Method for obtaining the connection key
    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Build the error for an operation attempted in the wrong state
    fn invalid(&self, operation: &'static str) -> UploadError {
        UploadError::InvalidState {
            state: self.state,
            operation,
        }
    }
}

// Hic sunt tests:

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_UPLOAD_CAPACITY, MAX_DECLARED_LENGTH};

/// Shorthand for resolving with default fallback and ceiling
fn resolve(content_length: Option<&str>) -> usize {
    declared_capacity(content_length, DEFAULT_UPLOAD_CAPACITY, MAX_DECLARED_LENGTH)
}

#[test]
fn test_declared_capacity_fallbacks() {

    // Test unusable lengths resolve to the fallback capacity
    for value in [None, Some("0"), Some("-1"), Some("-4294967296"), Some("abc"), Some(""), Some("4294967297"), Some("99999999999999999999")] {
        assert_eq!(resolve(value), DEFAULT_UPLOAD_CAPACITY, "{value:?}");
    }
}

#[test]
fn test_declared_capacity_trusted() {

    assert_eq!(resolve(Some("5987456")), 5_987_456);
    assert_eq!(resolve(Some(" 42 ")), 42);
    assert_eq!(resolve(Some("1")), 1);
    assert_eq!(declared_capacity(Some("100"), 7, 100), 100);
    assert_eq!(declared_capacity(Some("101"), 7, 100), 7);
}

#[test]
fn test_deliveries_reassemble_in_order() {

    let mut session = UploadSession::begin(ConnectionKey::from(1), 64).unwrap();
    assert_eq!(session.state(), UploadState::Accumulating);

    // Test the buffer is the in-order concatenation of deliveries
    for chunk in ["The ", "quick ", "brown ", "", "fox"] {
        session.on_data(chunk.as_bytes()).unwrap();
    }
    assert_eq!(session.contents(), b"The quick brown fox");
    assert_eq!(session.write_offset(), 19);
    assert_eq!(session.chunk_count(), 4);

    let summary = session.complete().unwrap();
    assert_eq!(summary, UploadSummary {
        key: ConnectionKey::from(1),
        bytes: 19,
        chunks: 4,
        average_chunk: Some(4),
    });
    assert_eq!(session.state(), UploadState::Complete);
    assert!(session.contents().is_empty());
}

#[test]
fn test_fill_to_exact_capacity() {

    let mut session = UploadSession::begin(ConnectionKey::from(2), 8).unwrap();
    session.on_data(b"1234").unwrap();
    session.on_data(b"5678").unwrap();
    assert_eq!(session.write_offset(), session.capacity());
    assert_eq!(session.complete().unwrap().bytes, 8);
}

#[test]
fn test_overflow_is_rejected() {

    let mut session = UploadSession::begin(ConnectionKey::from(3), 8).unwrap();
    session.on_data(b"12345").unwrap();

    // Test writing past capacity fails and leaves the buffer untouched
    match session.on_data(b"6789") {
        Err(UploadError::Overflow { capacity, attempted }) => {
            assert_eq!(capacity, 8);
            assert_eq!(attempted, 9);
        },
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.contents(), b"12345");
    assert_eq!(session.chunk_count(), 1);
}

#[test]
fn test_complete_without_chunks() {

    let mut session = UploadSession::begin(ConnectionKey::from(4), 16).unwrap();

    // Test completing an empty upload does not divide by zero
    let summary = session.complete().unwrap();
    assert_eq!(summary.bytes, 0);
    assert_eq!(summary.chunks, 0);
    assert_eq!(summary.average_chunk, None);
}

#[test]
fn test_state_transitions_are_enforced() {

    let mut session = UploadSession::new(ConnectionKey::from(5));
    assert_eq!(session.state(), UploadState::Uninitialized);
    assert!(matches!(session.on_data(b"x"), Err(UploadError::InvalidState { .. })));
    assert!(matches!(session.complete(), Err(UploadError::InvalidState { .. })));

    session.initialize(4).unwrap();
    assert!(matches!(session.initialize(4), Err(UploadError::InvalidState { .. })));

    session.complete().unwrap();
    assert!(matches!(session.on_data(b"x"), Err(UploadError::InvalidState { state: UploadState::Complete, .. })));
    assert!(matches!(session.complete(), Err(UploadError::InvalidState { .. })));
}

#[test]
fn test_impossible_allocation_fails() {

    // Test an allocation which cannot succeed is reported instead of aborting
    match UploadSession::begin(ConnectionKey::from(6), usize::MAX) {
        Err(UploadError::Allocation { requested }) => assert_eq!(requested, usize::MAX),
        other => panic!("unexpected {other:?}"),
    }
}
}
