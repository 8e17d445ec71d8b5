/// `load_config` module: reads the optional YAML config file into a [`CliConfig`].
///
/// The file carries no secrets. The API key is read from the environment by
/// [`GeminiClient::new_from_env`](crate::upload::GeminiClient::new_from_env).
///
/// # Responsibilities
/// - Parse the user-supplied YAML into the core [`Config`] plus the CLI-only `remote` section
/// - Fill every missing key with its default, so an empty file (or no file) is valid
/// - Apply command-line overrides on top of the file
/// - Fail with a message naming the file when it cannot be read or parsed
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use gemini_context_core::config::Config;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "models/gemini-1.5-pro-latest";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub pipeline: Config,
    #[serde(default)]
    pub remote: RemoteSection,
}

/// Where and how to reach the inference service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl RemoteSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CliConfig {
    /// Override the upload MIME type and worker count when given on the command line.
    pub fn with_overrides(mut self, mime_type: Option<String>, workers: Option<usize>) -> Self {
        if let Some(mime_type) = mime_type {
            self.pipeline.ingest.mime_type = mime_type;
        }
        if let Some(workers) = workers {
            self.pipeline.ingest.concurrency = workers;
        }
        self
    }
}

/// Loads the YAML config file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // serde_yaml rejects an empty document, but an empty file means "all defaults".
    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(CliConfig::default());
    }

    match serde_yaml::from_str::<CliConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML {path_ref:?}: {e}"))
        }
    }
}

/// Loads `path` if given, otherwise returns the defaults.
pub fn load_optional_config<P: AsRef<Path>>(path: Option<P>) -> Result<CliConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            info!("No config file given, using defaults");
            Ok(CliConfig::default())
        }
    }
}
