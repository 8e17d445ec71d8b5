//! # contract: the remote side of the ingestion pipeline
//!
//! This module defines the single trait ([`RemoteClient`]) through which the
//! pipeline talks to the inference service's file store, plus the plain data
//! types flowing across it.
//!
//! ## Interface
//! - `store` uploads a prepared payload and returns a [`Handle`] to the remote resource.
//! - `measure` asks the service how many context units a stored handle consumes.
//! - `delete` releases a handle. Best-effort; callers decide what to do on failure.
//! - `list` enumerates every file the service currently holds (used by the pre-run sweep).
//!
//! ## Errors
//! Every method fails with a [`RemoteError`]. The variant tells the retry layer
//! whether another attempt makes sense; the message is for humans only.
//!
//! ## Mocking & Testing
//! The trait is annotated for `mockall` so consumers can generate deterministic
//! mocks (`MockRemoteClient`) for unit/integration tests. The mock is exported
//! behind the default `test-export-mocks` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Remote-reported consumption cost of a handle.
pub type UnitCount = u64;

/// Identifier of a file held by the remote service.
///
/// A handle stands for a remote resource with a finite lifetime owned by this
/// process: once `store` returns one, it must reach `delete` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    /// Resource name used for deletion (e.g. `files/abc123`).
    pub id: String,
    /// URI used to reference the file from a prompt.
    pub uri: String,
    /// Human-readable name, usually the relative path of the source file.
    pub display_name: String,
    pub mime_type: String,
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Deadline exceeded on the request. Retried like a transient failure.
    #[error("remote call timed out: {0}")]
    Timeout(String),
    /// Rate limiting, server errors, dropped connections.
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// The request can never succeed as sent (bad input, missing resource, auth).
    #[error("permanent remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Timeout(_) | RemoteError::Transient(_))
    }
}

/// Trait for storing, measuring and releasing files on the remote service.
/// The implementor is responsible for transport, authentication and mapping
/// upstream failures onto [`RemoteError`].
///
/// Implementations must be usable from many concurrent workers at once.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Upload `content` under `display_name` and return its handle.
    async fn store(
        &self,
        content: &[u8],
        display_name: &str,
        mime_type: &str,
    ) -> Result<Handle, RemoteError>;

    /// Count the context units the stored file consumes.
    async fn measure(&self, handle: &Handle) -> Result<UnitCount, RemoteError>;

    /// Delete a stored file.
    async fn delete(&self, handle: &Handle) -> Result<(), RemoteError>;

    /// List every file currently held by the service.
    async fn list(&self) -> Result<Vec<Handle>, RemoteError>;
}
