//! Turning a discovered file into a self-describing upload payload.
//!
//! Small files are embedded verbatim. Files over the byte ceiling keep only
//! their trailing lines, on the assumption that the end of a large file (logs,
//! transcripts) is the part worth spending context on. Either way a short
//! header naming the original path and size is prepended.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discover::FileRecord;

pub const DEFAULT_MAX_BYTES_VERBATIM: u64 = 1_000_000;
pub const DEFAULT_MAX_LINES_IF_TRUNCATED: usize = 5_000;
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Size policy and upload type applied to every file of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareLimits {
    pub max_bytes_verbatim: u64,
    pub max_lines_if_truncated: usize,
    pub mime_type: String,
}

impl Default for PrepareLimits {
    fn default() -> Self {
        Self {
            max_bytes_verbatim: DEFAULT_MAX_BYTES_VERBATIM,
            max_lines_if_truncated: DEFAULT_MAX_LINES_IF_TRUNCATED,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

/// A payload ready for `store`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPayload {
    pub relative_path: String,
    /// Decoded file text (possibly only its tail), without the header.
    pub content: Vec<u8>,
    pub truncated: bool,
    pub header: String,
    pub mime_type: String,
}

impl PreparedPayload {
    /// The bytes actually transmitted: header followed by content.
    pub fn to_upload_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.header.len() + self.content.len());
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&self.content);
        bytes
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read `record` from disk and build its payload under `limits`.
pub fn prepare(record: &FileRecord, limits: &PrepareLimits) -> Result<PreparedPayload, PrepareError> {
    let raw = std::fs::read(&record.absolute_path).map_err(|source| PrepareError::Io {
        path: record.relative_path.clone(),
        source,
    })?;
    Ok(prepare_bytes(&record.relative_path, &raw, limits))
}

/// Build a payload from bytes already in memory. Pure and deterministic.
pub fn prepare_bytes(relative_path: &str, raw: &[u8], limits: &PrepareLimits) -> PreparedPayload {
    let size = raw.len() as u64;
    let text = String::from_utf8_lossy(raw);

    let (content, truncated) = if size <= limits.max_bytes_verbatim {
        (text.into_owned(), false)
    } else {
        (tail_lines(&text, limits.max_lines_if_truncated), true)
    };

    let mut header = format!("File: {relative_path}\nSize: {size} bytes\n");
    if truncated {
        header.push_str(&format!(
            "Truncated: original size {size} bytes exceeds {}; showing the last {} lines\n",
            limits.max_bytes_verbatim, limits.max_lines_if_truncated
        ));
    }
    header.push('\n');

    debug!(
        file = relative_path,
        size,
        truncated,
        kept_bytes = content.len(),
        "Prepared payload"
    );

    PreparedPayload {
        relative_path: relative_path.to_string(),
        content: content.into_bytes(),
        truncated,
        header,
        mime_type: limits.mime_type.clone(),
    }
}

/// The last `n` lines of `text`, line terminators included.
fn tail_lines(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].concat()
}
