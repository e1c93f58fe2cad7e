//! This module provides `TransferLoop`, which drives one upload after another.

use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    transfer::TransferSession,
    transport::Transport,
};

/// Outcome counts of a finished loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Iterations executed
    pub iterations: u64,
    /// Iterations answered with a success status
    pub succeeded: u64,
    /// Iterations which failed in the transport or got an error status
    pub failed: u64,
}

/// `TransferLoop` uploads a fresh payload per iteration, pausing in between.
/// Failed iterations are not retried, the next iteration simply follows.
#[derive(Debug)]
pub struct TransferLoop<T> {
    /// Network seam
    transport: T,
    /// Immutable loop configuration
    config: ClientConfig,
}

impl<T: Transport> TransferLoop<T> {
    /// Associated function for creating a loop over given transport
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Method for obtaining the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run until `token` is cancelled or the configured number of iterations is done.
    /// An iteration which has started always runs to transport completion.
    pub async fn run(&self, token: CancellationToken) -> LoopReport {

        let mut report = LoopReport::default();
        while !token.is_cancelled() && !self.limit_reached(&report) {
            self.iterate(&mut report).await;
            if self.limit_reached(&report) {
                break;
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {},
            }
        }
        tracing::info!(
            iterations = report.iterations,
            succeeded = report.succeeded,
            failed = report.failed,
            "transfer loop stopped"
        );
        report
    }

    /// Execute a single upload with a fresh session and account for its outcome
    async fn iterate(&self, report: &mut LoopReport) {

        let mut session = TransferSession::new(self.config.endpoint.as_str(), self.config.payload_size);
        let started = Instant::now();
        let outcome = self.transport.execute(&mut session).await;
        report.iterations += 1;

        let capture = session.capture();
        match outcome {
            Ok(status) if status.is_success() => {
                report.succeeded += 1;
                tracing::info!(
                    iteration = report.iterations,
                    bytes = session.bytes_sent(),
                    fragments = capture.fragments(),
                    response = %String::from_utf8_lossy(capture.first_fragment().unwrap_or_default()),
                    elapsed = ?started.elapsed(),
                    "upload acknowledged"
                );
            },
            Ok(status) => {
                report.failed += 1;
                tracing::warn!(
                    iteration = report.iterations,
                    %status,
                    bytes = session.bytes_sent(),
                    "upload rejected"
                );
            },
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    iteration = report.iterations,
                    %err,
                    bytes = session.bytes_sent(),
                    "upload failed, retrying next iteration"
                );
            },
        }
    }

    /// Whether the configured iteration count has been executed
    fn limit_reached(&self, report: &LoopReport) -> bool {
        self.config.iterations.is_some_and(|limit| report.iterations >= limit)
    }
}

// Hic sunt tests:

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    };
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use parking_lot::Mutex;
    use crate::{
        config::ServerConfig,
        error::TransferError,
        upload::UploadSummary,
        upload_store::ConnectionRegistry,
    };

/// Feeds the producer straight into a registry session, no sockets involved
struct LoopbackTransport {
    /// Server side
    registry: ConnectionRegistry,
    /// Pull size used for the body
    pull_size: usize,
    /// Summaries of completed uploads
    summaries: Mutex<Vec<UploadSummary>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError> {
        let declared = session.payload_len().to_string();
        let guard = match self.registry.open(Some(&declared)) {
            Ok(guard) => guard,
            Err(err) => return Ok(err.status()),
        };
        while let Some(chunk) = session.next_chunk(self.pull_size) {
            if let Err(err) = guard.on_data(&chunk) {
                return Ok(err.status());
            }
        }
        match guard.complete() {
            Ok(summary) => self.summaries.lock().push(summary),
            Err(err) => return Ok(err.status()),
        }
        for fragment in [&b"Ok"[..], &b"."[..]] {
            assert_eq!(session.on_response_data(fragment), fragment.len());
        }
        Ok(StatusCode::OK)
    }
}

/// Never reaches the server
struct FailingTransport {
    /// Number of attempts
    attempts: AtomicU64,
}

#[async_trait]
impl Transport for FailingTransport {
    async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(TransferError::Incomplete {
            sent: session.bytes_sent(),
            total: session.payload_len(),
        })
    }
}

/// Answers every upload with a fixed status and cancels the loop on first use
struct CancellingTransport {
    /// Lifecycle token of the loop under test
    token: CancellationToken,
    /// Status to answer with
    status: StatusCode,
}

#[async_trait]
impl Transport for CancellingTransport {
    async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError> {
        self.token.cancel();
        while session.next_chunk(1024).is_some() {}
        Ok(self.status)
    }
}

/// Configuration for quick loops
fn config(payload_size: usize, iterations: Option<u64>) -> ClientConfig {
    ClientConfig {
        payload_size,
        interval: Duration::from_millis(1),
        iterations,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_full_payload_is_reassembled() {

    let transport = LoopbackTransport {
        registry: ConnectionRegistry::new(ServerConfig::default()),
        pull_size: 16_384,
        summaries: Mutex::new(Vec::new()),
    };
    let transfer_loop = TransferLoop::new(transport, config(5_987_456, Some(2)));

    // Test each iteration delivers the whole payload and is acknowledged
    let report = transfer_loop.run(CancellationToken::new()).await;
    assert_eq!(report, LoopReport { iterations: 2, succeeded: 2, failed: 0 });

    let summaries = transfer_loop.transport.summaries.lock();
    assert_eq!(summaries.len(), 2);
    for summary in summaries.iter() {
        assert_eq!(summary.bytes, 5_987_456);
        assert_eq!(summary.chunks, 366);
        assert_eq!(summary.average_chunk, Some(5_987_456 / 366));
    }
    assert_ne!(summaries[0].key, summaries[1].key);
    assert!(transfer_loop.transport.registry.is_empty());
}

#[tokio::test]
async fn test_oversized_upload_counts_as_failure() {

    // Declared length above the ceiling falls back to a buffer too small for the body
    let registry = ConnectionRegistry::new(ServerConfig {
        fallback_capacity: 50,
        max_declared_length: 10,
        ..ServerConfig::default()
    });
    let transport = LoopbackTransport {
        registry: registry.clone(),
        pull_size: 10,
        summaries: Mutex::new(Vec::new()),
    };
    let transfer_loop = TransferLoop::new(transport, config(100, Some(1)));

    // Test the rejected upload is a failed iteration and its session is released
    let report = transfer_loop.run(CancellationToken::new()).await;
    assert_eq!(report, LoopReport { iterations: 1, succeeded: 0, failed: 1 });
    assert!(transfer_loop.transport.summaries.lock().is_empty());
    assert!(registry.is_empty());
    assert_eq!(registry.stats().aborted, 1);
}

#[tokio::test]
async fn test_failures_do_not_stop_the_loop() {

    let transport = FailingTransport { attempts: AtomicU64::new(0) };
    let transfer_loop = TransferLoop::new(transport, config(16, Some(3)));

    // Test every iteration is attempted even though all of them fail
    let report = transfer_loop.run(CancellationToken::new()).await;
    assert_eq!(report, LoopReport { iterations: 3, succeeded: 0, failed: 3 });
    assert_eq!(transfer_loop.transport.attempts.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_cancelled_before_start() {

    let token = CancellationToken::new();
    token.cancel();
    let transfer_loop = TransferLoop::new(FailingTransport { attempts: AtomicU64::new(0) }, config(16, None));
    assert_eq!(transfer_loop.run(token).await, LoopReport::default());
}

#[tokio::test]
async fn test_cancel_finishes_current_iteration() {

    let token = CancellationToken::new();
    let transport = CancellingTransport {
        token: token.clone(),
        status: StatusCode::OK,
    };
    let transfer_loop = TransferLoop::new(transport, ClientConfig {
        payload_size: 4096,
        interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    });

    // Test cancellation during an iteration lets it finish, then skips the pause
    let report = tokio::time::timeout(Duration::from_secs(5), transfer_loop.run(token))
        .await
        .unwrap();
    assert_eq!(report, LoopReport { iterations: 1, succeeded: 1, failed: 0 });
}

#[tokio::test]
async fn test_error_status_counts_as_failure() {

    let token = CancellationToken::new();
    let transport = CancellingTransport {
        token: token.clone(),
        status: StatusCode::INTERNAL_SERVER_ERROR,
    };
    let transfer_loop = TransferLoop::new(transport, config(8, None));
    let report = transfer_loop.run(token).await;
    assert_eq!(report, LoopReport { iterations: 1, succeeded: 0, failed: 1 });
}

#[tokio::test]
async fn test_fresh_state_every_iteration() {

    let counter = Arc::new(AtomicU64::new(0));

    /// Checks every session starts at the beginning of its payload
    struct FreshTransport(Arc<AtomicU64>);

    #[async_trait]
    impl Transport for FreshTransport {
        async fn execute(&self, session: &mut TransferSession) -> Result<StatusCode, TransferError> {
            assert_eq!(session.bytes_sent(), 0);
            assert_eq!(session.capture().fragments(), 0);
            while session.next_chunk(7).is_some() {}
            session.on_response_data(b"Ok.");
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(StatusCode::OK)
        }
    }

    let transfer_loop = TransferLoop::new(FreshTransport(counter.clone()), config(30, Some(4)));
    assert_eq!(transfer_loop.run(CancellationToken::new()).await.succeeded, 4);
    assert_eq!(counter.load(Ordering::Relaxed), 4);
}
}
