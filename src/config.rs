//! Compiled-in defaults for both sides of the harness.

use std::time::Duration;

/// Port the server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 6666;
/// Capacity used when an upload does not declare a usable `Content-Length`
pub const DEFAULT_UPLOAD_CAPACITY: usize = 9_888_777;
/// Declared lengths above this are not trusted (4 GiB)
pub const MAX_DECLARED_LENGTH: u64 = 4_294_967_296;
/// Size of the payload the producer sends on every iteration
pub const DEFAULT_PAYLOAD_SIZE: usize = 5_987_456;
/// Largest chunk the producer hands to the transport in one pull
pub const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// `ServerConfig` contains server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Capacity of upload buffers whose declared length is absent or out of bounds
    pub fallback_capacity: usize,
    /// Upper bound for a declared `Content-Length` to be trusted
    pub max_declared_length: u64,
    /// Time a single request may take before it is aborted
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            fallback_capacity: DEFAULT_UPLOAD_CAPACITY,
            max_declared_length: MAX_DECLARED_LENGTH,
            connection_timeout: Duration::from_secs(120),
        }
    }
}

/// `ClientConfig` contains producer configuration, immutable once the loop starts
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Target of every upload, `http://<host>:<port>/<path>`
    pub endpoint: String,
    /// Number of bytes sent per iteration
    pub payload_size: usize,
    /// Largest chunk pulled from the producer at once
    pub chunk_size: usize,
    /// Pause between two iterations
    pub interval: Duration,
    /// Stop after this many iterations, run until cancelled when `None`
    pub iterations: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{DEFAULT_PORT}/blah.json"),
            payload_size: DEFAULT_PAYLOAD_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            interval: Duration::from_millis(200),
            iterations: None,
        }
    }
}
