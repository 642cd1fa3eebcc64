//! Environment configuration for the engine connection.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_COMFY_URL: &str = "http://localhost:8188";

/// Poll timeout bounds, in seconds.
pub const POLL_TIMEOUT_RANGE: (f64, f64) = (1.0, 300.0);

/// Poll interval bounds, in seconds.
pub const POLL_INTERVAL_RANGE: (f64, f64) = (0.1, 10.0);

/// Consecutive transport failures tolerated by a poll.
pub const DEFAULT_MAX_TRANSPORT_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required but not set")]
    Missing { var: &'static str },

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    /// Name of the offending environment variable.
    pub fn var(&self) -> &'static str {
        match self {
            Self::Missing { var } | Self::Invalid { var, .. } => *var,
        }
    }
}

/// How finished artifacts are handed back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Fetch the bytes through `/view`.
    #[default]
    File,
    /// Return a `/view` URL without fetching.
    Url,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "url" => Ok(Self::Url),
            _ => Err("expected 'file' or 'url'".into()),
        }
    }
}

/// Bounded polling budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub max_transport_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            max_transport_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
        }
    }
}

impl PollConfig {
    /// Build a config from seconds, rejecting out-of-range values.
    pub fn from_secs(timeout: f64, interval: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: bounded_secs("POLL_TIMEOUT", timeout, POLL_TIMEOUT_RANGE)?,
            interval: bounded_secs("POLL_INTERVAL", interval, POLL_INTERVAL_RANGE)?,
            max_transport_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
        })
    }

    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }
}

fn bounded_secs(
    var: &'static str,
    secs: f64,
    (min, max): (f64, f64),
) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < min || secs > max {
        return Err(ConfigError::Invalid {
            var,
            value: secs.to_string(),
            reason: format!("must be between {min} and {max} seconds"),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Engine connection and output settings.
#[derive(Debug, Clone)]
pub struct ComfyConfig {
    /// Base URL the library talks to.
    pub base_url: String,
    /// Base URL handed to callers in URL output mode.
    pub external_url: Option<String>,
    pub workflows_dir: Option<PathBuf>,
    /// Workflow used by the simple-prompt operation.
    pub workflow_file: Option<PathBuf>,
    /// Node whose `text` input receives the simple prompt.
    pub prompt_node_id: Option<String>,
    pub output_node_id: Option<String>,
    pub output_mode: OutputMode,
    pub poll: PollConfig,
}

impl Default for ComfyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COMFY_URL.into(),
            external_url: None,
            workflows_dir: None,
            workflow_file: None,
            prompt_node_id: None,
            output_node_id: None,
            output_mode: OutputMode::File,
            poll: PollConfig::default(),
        }
    }
}

impl ComfyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `COMFY_URL`                | `http://localhost:8188` |
    /// | `COMFY_URL_EXTERNAL`       | unset                   |
    /// | `COMFY_WORKFLOWS_DIR`      | unset                   |
    /// | `COMFY_WORKFLOW_JSON_FILE` | unset                   |
    /// | `PROMPT_NODE_ID`           | unset                   |
    /// | `OUTPUT_NODE_ID`           | unset                   |
    /// | `OUTPUT_MODE`              | `file`                  |
    /// | `POLL_TIMEOUT`             | `60`                    |
    /// | `POLL_INTERVAL`            | `1.0`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = var("COMFY_URL")
            .unwrap_or_else(|| DEFAULT_COMFY_URL.into())
            .trim_end_matches('/')
            .to_string();
        let external_url = var("COMFY_URL_EXTERNAL").map(|u| u.trim_end_matches('/').to_string());

        let output_mode = match var("OUTPUT_MODE") {
            Some(raw) => raw.parse::<OutputMode>().map_err(|reason| ConfigError::Invalid {
                var: "OUTPUT_MODE",
                value: raw.clone(),
                reason,
            })?,
            None => OutputMode::default(),
        };

        let timeout = parse_secs(var("POLL_TIMEOUT"), "POLL_TIMEOUT", 60.0)?;
        let interval = parse_secs(var("POLL_INTERVAL"), "POLL_INTERVAL", 1.0)?;

        Ok(Self {
            base_url,
            external_url,
            workflows_dir: var("COMFY_WORKFLOWS_DIR").map(PathBuf::from),
            workflow_file: var("COMFY_WORKFLOW_JSON_FILE").map(PathBuf::from),
            prompt_node_id: var("PROMPT_NODE_ID"),
            output_node_id: var("OUTPUT_NODE_ID"),
            output_mode,
            poll: PollConfig::from_secs(timeout, interval)?,
        })
    }

    /// Base URL for artifact links: the external URL when set.
    pub fn public_base_url(&self) -> &str {
        self.external_url.as_deref().unwrap_or(&self.base_url)
    }
}

fn parse_secs(raw: Option<String>, var: &'static str, default: f64) -> Result<f64, ConfigError> {
    match raw {
        Some(raw) => raw.parse::<f64>().map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
