//! This module provides `ConnectionRegistry` and `SessionGuard`.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
    config::ServerConfig,
    error::UploadError,
    upload::{declared_capacity, UploadSession, UploadState, UploadSummary},
};

/// Opaque identity of one in-flight upload connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey(u64);

impl From<u64> for ConnectionKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type of reference to the configuration
type ConfigRef = Arc<ServerConfig>;
/// Type of reference to an upload session
pub type SessionRef = Arc<Mutex<UploadSession>>;
/// Type of reference to main session storage
type StorageRef = Arc<RwLock<HashMap<ConnectionKey, SessionRef>>>;

/// Counters shared by all clones of a registry
#[derive(Debug, Default)]
struct Counters {
    /// Uploads which reached `Complete`
    completed: AtomicU64,
    /// Uploads dropped before completion (errors, timeouts, disconnects)
    aborted: AtomicU64,
    /// Body bytes of completed uploads
    bytes_received: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Sessions currently registered
    pub active: usize,
    /// Uploads which reached `Complete`
    pub completed: u64,
    /// Uploads dropped before completion
    pub aborted: u64,
    /// Body bytes of completed uploads
    pub bytes_received: u64,
}

/// `ConnectionRegistry` maps connection keys to their upload sessions.
/// Clones share the same storage, so it can serve as axum state.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    /// Reference to the configuration
    config: ConfigRef,
    /// Reference to the session storage
    sessions: StorageRef,
    /// Source of fresh keys
    next_key: Arc<AtomicU64>,
    /// Reference to the statistics
    counters: Arc<Counters>,
}

impl ConnectionRegistry {
    /// Associated function used to create a new `ConnectionRegistry`
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_key: Arc::new(AtomicU64::new(1)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Method for obtaining the configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Allocate a key no other connection of this registry has used
    #[must_use]
    pub fn next_key(&self) -> ConnectionKey {
        ConnectionKey(self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    /// Try retrieving the session of a connection
    #[must_use]
    pub fn lookup(&self, key: &ConnectionKey) -> Option<SessionRef> {
        self.sessions.read().get(key).cloned()
    }

    /// Register the session built by `init` under `key`.
    /// When `key` is already registered the existing session is returned and `init` is not run.
    ///
    /// # Errors
    ///
    /// Propagates the error of `init`, nothing is registered in that case.
    pub fn create<F>(&self, key: ConnectionKey, init: F) -> Result<SessionRef, UploadError>
    where
        F: FnOnce() -> Result<UploadSession, UploadError>,
    {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let session = Arc::new(Mutex::new(init()?));
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Try removing a session, return it on success
    pub fn remove(&self, key: &ConnectionKey) -> Option<SessionRef> {
        self.sessions.write().remove(key)
    }

    /// Start an upload under a fresh key, sizing its buffer from the declared `Content-Length`.
    /// The returned guard unregisters the session when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Allocation`] when the buffer cannot be allocated.
    pub fn open(&self, content_length: Option<&str>) -> Result<SessionGuard, UploadError> {
        let key = self.next_key();
        let capacity = declared_capacity(
            content_length,
            self.config.fallback_capacity,
            self.config.max_declared_length,
        );
        let session = self.create(key, || UploadSession::begin(key, capacity))?;
        Ok(SessionGuard {
            registry: self.clone(),
            key,
            session,
        })
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Method for obtaining current statistics
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.len(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            aborted: self.counters.aborted.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// `SessionGuard` owns the registration of one upload for the lifetime of its request.
#[derive(Debug)]
pub struct SessionGuard {
    /// Registry the session lives in
    registry: ConnectionRegistry,
    /// Key of the session
    key: ConnectionKey,
    /// The session itself
    session: SessionRef,
}

impl SessionGuard {
    /// Method for obtaining the key
    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Append one delivery, see [`UploadSession::on_data`]
    ///
    /// # Errors
    ///
    /// Propagates the session's error.
    pub fn on_data(&self, data: &[u8]) -> Result<(), UploadError> {
        self.session.lock().on_data(data)
    }

    /// Finish the upload and unregister it
    ///
    /// # Errors
    ///
    /// Propagates the session's error, the session is unregistered either way.
    pub fn complete(self) -> Result<UploadSummary, UploadError> {
        let summary = self.session.lock().complete()?;
        let counters = &self.registry.counters;
        counters.completed.fetch_add(1, Ordering::Relaxed);
        counters.bytes_received.fetch_add(summary.bytes as u64, Ordering::Relaxed);
        Ok(summary)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
        if self.session.lock().state() != UploadState::Complete {
            self.registry.counters.aborted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %self.key, "upload session released before completion");
        }
    }
}

// Hic sunt tests:
