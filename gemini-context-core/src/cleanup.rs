//! Releasing remote handles.
//!
//! - [`cleanup`] deletes a set of handles concurrently, collecting failures instead of stopping on them.
//! - [`guarded`] runs a piece of work and then cleans up whatever the [`HandleRegistry`] still
//!   holds, on success, on error and on panic alike.
//! - [`sweep`] removes every file the remote currently holds, for a clean slate before a run.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tracing::{error, info, warn};

use crate::contract::{Handle, RemoteClient, RemoteError};
use crate::registry::HandleRegistry;

/// Result of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<Handle>,
    pub failed: Vec<(Handle, RemoteError)>,
}

impl CleanupReport {
    pub fn failed_handles(&self) -> Vec<&Handle> {
        self.failed.iter().map(|(h, _)| h).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every handle, at most `concurrency` at a time. Deletes are not retried.
pub async fn cleanup<C>(client: &C, handles: Vec<Handle>, concurrency: usize) -> CleanupReport
where
    C: RemoteClient + ?Sized,
{
    if handles.is_empty() {
        return CleanupReport::default();
    }
    info!(count = handles.len(), "Deleting remote files");

    let outcomes: Vec<(Handle, Result<(), RemoteError>)> = futures::stream::iter(handles)
        .map(|handle| async move {
            let result = client.delete(&handle).await;
            (handle, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = CleanupReport::default();
    for (handle, result) in outcomes {
        match result {
            Ok(()) => {
                info!(file = %handle.display_name, handle = %handle.id, "Deleted remote file");
                report.deleted.push(handle);
            }
            Err(e) => {
                warn!(file = %handle.display_name, handle = %handle.id, error = %e, "Failed to delete remote file");
                report.failed.push((handle, e));
            }
        }
    }
    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "Cleanup finished"
    );
    report
}

/// Await `work`, then clean up every handle left in `registry`.
///
/// Cleanup runs whether `work` returns normally or panics; a panic is resumed
/// once cleanup is done. Errors carried in `T` are returned untouched.
pub async fn guarded<C, Fut, T>(
    client: &C,
    registry: &HandleRegistry,
    concurrency: usize,
    work: Fut,
) -> (T, CleanupReport)
where
    C: RemoteClient + ?Sized,
    Fut: Future<Output = T>,
{
    let outcome = AssertUnwindSafe(work).catch_unwind().await;
    if outcome.is_err() {
        error!(live = registry.len(), "Work panicked, releasing remote files before unwinding");
    }
    let report = cleanup(client, registry.drain(), concurrency).await;
    match outcome {
        Ok(value) => (value, report),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Delete every file the remote currently lists.
pub async fn sweep<C>(client: &C, concurrency: usize) -> Result<CleanupReport, RemoteError>
where
    C: RemoteClient + ?Sized,
{
    let existing = client.list().await?;
    info!(count = existing.len(), "Sweeping pre-existing remote files");
    Ok(cleanup(client, existing, concurrency).await)
}
