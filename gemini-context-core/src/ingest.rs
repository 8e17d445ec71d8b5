//! High-level pipeline: fans discovered files out over a bounded worker pool
//! and admits them into the run's token budget.
//!
//! For each file a worker runs, strictly in this order:
//!   - prepare the payload (on the blocking pool, since it reads the file)
//!   - `store` it through the [`retry`](crate::retry) executor and register the handle
//!   - `measure` the handle through the retry executor
//!   - ask the [`AdmissionController`] whether the cost fits
//!
//! # Major Types
//! - [`IngestOptions`]: ceiling, pool size, size limits and retry policy for a run
//! - [`IngestReport`]: one [`AdmissionResult`] per file plus the final budget
//!
//! # Responsibilities
//! - Files are independent: a failure is recorded for that file and the batch carries on
//! - Every handle created for a file that ends up rejected or failed is deleted before its
//!   result is reported
//! - Admitted handles stay in the [`HandleRegistry`] for the caller to use and then release
//!   (see [`cleanup::guarded`](crate::cleanup::guarded))
//!
//! # Ordering
//! There is no ordering between files. Which files are admitted once the budget
//! runs short depends on which workers reach the admission lock first.

use std::fmt;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::{AdmissionController, Decision, DEFAULT_CEILING};
use crate::contract::{Handle, RemoteClient, UnitCount};
use crate::discover::FileRecord;
use crate::prepare::{prepare, PrepareLimits};
use crate::registry::HandleRegistry;
use crate::retry::{self, RetryPolicy};

pub const DEFAULT_CONCURRENCY: usize = 16;

/// Parameters of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub ceiling: UnitCount,
    pub concurrency: usize,
    pub limits: PrepareLimits,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
            concurrency: DEFAULT_CONCURRENCY,
            limits: PrepareLimits::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Terminal outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdmissionResult {
    Admitted {
        relative_path: String,
        handle: Handle,
        cost: UnitCount,
    },
    RejectedBudget {
        relative_path: String,
        cost: UnitCount,
    },
    Failed {
        relative_path: String,
        reason: String,
    },
}

impl AdmissionResult {
    pub fn relative_path(&self) -> &str {
        match self {
            AdmissionResult::Admitted { relative_path, .. }
            | AdmissionResult::RejectedBudget { relative_path, .. }
            | AdmissionResult::Failed { relative_path, .. } => relative_path,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub results: Vec<AdmissionResult>,
    pub consumed: UnitCount,
    pub ceiling: UnitCount,
    pub elapsed: Duration,
    /// Handles of rejected or failed files whose inline delete failed.
    pub undeleted: Vec<Handle>,
}

impl IngestReport {
    pub fn admitted_handles(&self) -> Vec<Handle> {
        self.results
            .iter()
            .filter_map(|r| match r {
                AdmissionResult::Admitted { handle, .. } => Some(handle.clone()),
                _ => None,
            })
            .collect()
    }

    /// Relative paths of the admitted files.
    pub fn admitted(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r, AdmissionResult::Admitted { .. }))
            .map(AdmissionResult::relative_path)
            .collect()
    }

    pub fn admitted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, AdmissionResult::Admitted { .. }))
            .count()
    }

    pub fn rejected(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r, AdmissionResult::RejectedBudget { .. }))
            .map(AdmissionResult::relative_path)
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter_map(|r| match r {
                AdmissionResult::Failed {
                    relative_path,
                    reason,
                } => Some((relative_path.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Upload Summary:")?;
        writeln!(f, "Total files admitted: {}", self.admitted_count())?;
        let rejected = self.rejected();
        writeln!(f, "Files skipped (token limit): {}", rejected.len())?;
        for path in rejected {
            writeln!(f, "  - {path}")?;
        }
        let failed = self.failed();
        writeln!(f, "Files failed: {}", failed.len())?;
        for (path, reason) in failed {
            writeln!(f, "  - {path}: {reason}")?;
        }
        writeln!(f, "Total tokens: {} / {}", self.consumed, self.ceiling)?;
        write!(f, "Total upload time: {:.2} seconds", self.elapsed.as_secs_f64())
    }
}

/// Run every file through prepare → store → measure → admit.
///
/// Handles are registered in `registry` as soon as they exist; those of
/// rejected or failed files are deleted and released before this returns, so
/// afterwards `registry` holds exactly the admitted handles (plus any left by
/// earlier calls).
pub async fn ingest<C>(
    client: &C,
    files: Vec<FileRecord>,
    options: &IngestOptions,
    registry: &HandleRegistry,
) -> IngestReport
where
    C: RemoteClient + ?Sized,
{
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "ingest",
        run_id = %run_id,
        files = files.len(),
        ceiling = options.ceiling,
        concurrency = options.concurrency
    );

    async move {
        info!("Starting ingestion run");
        let started = Instant::now();
        let controller = AdmissionController::new(options.ceiling);

        let outcomes: Vec<FileOutcome> = futures::stream::iter(files)
            .map(|record| process_file(client, record, options, &controller, registry))
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        let budget = controller.snapshot();
        let mut results = Vec::with_capacity(outcomes.len());
        let mut undeleted = Vec::new();
        for outcome in outcomes {
            results.push(outcome.result);
            undeleted.extend(outcome.undeleted);
        }

        let report = IngestReport {
            run_id,
            results,
            consumed: budget.consumed,
            ceiling: budget.ceiling,
            elapsed: started.elapsed(),
            undeleted,
        };

        info!(
            admitted = report.admitted_count(),
            rejected = report.rejected().len(),
            failed = report.failed().len(),
            consumed = report.consumed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Ingestion run complete"
        );
        match serde_json::to_string_pretty(&report) {
            Ok(json) => debug!(json = %json, "Ingest report as JSON"),
            Err(e) => error!(error = ?e, "Failed to serialize ingest report as JSON"),
        }
        report
    }
    .instrument(span)
    .await
}

struct FileOutcome {
    result: AdmissionResult,
    undeleted: Option<Handle>,
}

impl FileOutcome {
    fn failed(relative_path: String, reason: String, undeleted: Option<Handle>) -> Self {
        Self {
            result: AdmissionResult::Failed {
                relative_path,
                reason,
            },
            undeleted,
        }
    }
}

async fn process_file<C>(
    client: &C,
    record: FileRecord,
    options: &IngestOptions,
    controller: &AdmissionController,
    registry: &HandleRegistry,
) -> FileOutcome
where
    C: RemoteClient + ?Sized,
{
    let relative_path = record.relative_path.clone();

    let limits = options.limits.clone();
    let payload = match tokio::task::spawn_blocking(move || prepare(&record, &limits)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!(file = %relative_path, error = %e, "Failed to prepare file");
            return FileOutcome::failed(relative_path, e.to_string(), None);
        }
        Err(e) => {
            error!(file = %relative_path, error = %e, "Prepare task did not complete");
            return FileOutcome::failed(relative_path, format!("prepare task failed: {e}"), None);
        }
    };
    if payload.truncated {
        info!(file = %relative_path, "Truncated oversized file to its trailing lines");
    }

    let bytes = payload.to_upload_bytes();
    let handle = match retry::execute(&options.retry, "store", || {
        client.store(&bytes, &payload.relative_path, &payload.mime_type)
    })
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!(file = %relative_path, error = %e, "Failed to upload file");
            return FileOutcome::failed(relative_path, format!("upload failed: {e}"), None);
        }
    };
    registry.register(handle.clone());
    debug!(file = %relative_path, handle = %handle.id, "Stored file");

    let cost = match retry::execute(&options.retry, "measure", || client.measure(&handle)).await {
        Ok(cost) => cost,
        Err(e) => {
            warn!(file = %relative_path, error = %e, "Failed to count tokens");
            let undeleted = discard(client, registry, handle).await;
            return FileOutcome::failed(relative_path, format!("token count failed: {e}"), undeleted);
        }
    };

    match controller.decide(&handle, cost) {
        Decision::Admitted => {
            info!(file = %relative_path, tokens = cost, "Admitted file");
            FileOutcome {
                result: AdmissionResult::Admitted {
                    relative_path,
                    handle,
                    cost,
                },
                undeleted: None,
            }
        }
        Decision::RejectedBudget => {
            info!(file = %relative_path, tokens = cost, "Skipping file: would exceed token limit");
            let undeleted = discard(client, registry, handle).await;
            FileOutcome {
                result: AdmissionResult::RejectedBudget {
                    relative_path,
                    cost,
                },
                undeleted,
            }
        }
    }
}

/// Delete a handle the run will not keep, then release it from the registry.
/// Returns the handle if the delete failed.
async fn discard<C>(client: &C, registry: &HandleRegistry, handle: Handle) -> Option<Handle>
where
    C: RemoteClient + ?Sized,
{
    // Released only after the delete completes, so an interrupted delete is retried by cleanup.
    let result = client.delete(&handle).await;
    registry.release(&handle);
    match result {
        Ok(()) => {
            debug!(handle = %handle.id, "Deleted discarded file");
            None
        }
        Err(e) => {
            warn!(handle = %handle.id, error = %e, "Failed to delete discarded file");
            Some(handle)
        }
    }
}
