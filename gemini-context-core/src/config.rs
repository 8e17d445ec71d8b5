use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::admission::DEFAULT_CEILING;
use crate::discover::DiscoverOptions;
use crate::ingest::{IngestOptions, DEFAULT_CONCURRENCY};
use crate::prepare::{
    PrepareLimits, DEFAULT_MAX_BYTES_VERBATIM, DEFAULT_MAX_LINES_IF_TRUNCATED, DEFAULT_MIME_TYPE,
};
use crate::retry::RetryPolicy;

/// Pipeline settings as they appear in the `ingest` and `retry` sections of a
/// config file. Every field has a default, so an empty document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub ceiling: u64,
    pub concurrency: usize,
    pub max_bytes_verbatim: u64,
    pub max_lines_if_truncated: usize,
    pub mime_type: String,
    pub ignore: Vec<String>,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
            concurrency: DEFAULT_CONCURRENCY,
            max_bytes_verbatim: DEFAULT_MAX_BYTES_VERBATIM,
            max_lines_if_truncated: DEFAULT_MAX_LINES_IF_TRUNCATED,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            ignore: Vec::new(),
        }
    }
}

impl Config {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            ceiling: self.ingest.ceiling,
            concurrency: self.ingest.concurrency,
            limits: PrepareLimits {
                max_bytes_verbatim: self.ingest.max_bytes_verbatim,
                max_lines_if_truncated: self.ingest.max_lines_if_truncated,
                mime_type: self.ingest.mime_type.clone(),
            },
            retry: self.retry.clone(),
        }
    }

    pub fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            ignore: self.ingest.ignore.clone(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            ceiling = self.ingest.ceiling,
            concurrency = self.ingest.concurrency,
            max_attempts = self.retry.max_attempts,
            "Loaded pipeline config"
        );
        debug!(?self, "Pipeline config loaded (full debug)");
    }
}
