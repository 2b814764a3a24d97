//! Relay server configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then CLI
//! flags (applied in `main`). Every table and key in the file is optional:
//!
//! ```toml
//! bind = "0.0.0.0:5000"
//! frames_dir = "frames"
//! frame_interval_ms = 33
//! default_auto_interval = 5
//! # history_limit = 500          # unbounded when absent
//! # snapshot_dir = "snapshots"   # archive a frame every snapshot_interval_secs
//! snapshot_interval_secs = 2
//!
//! [analyzer]
//! backend = "openai"
//! model = "gpt-4o-mini"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerBackend {
    Openai,
    Canned,
}

impl std::fmt::Display for AnalyzerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyzerBackend::Openai => write!(f, "openai"),
            AnalyzerBackend::Canned => write!(f, "canned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub backend: AnalyzerBackend,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Reply used by the canned backend.
    pub canned_response: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            backend: AnalyzerBackend::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            canned_response: "No analyzer configured; frame received.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    /// Directory the camera replays JPEG frames from.
    pub frames_dir: PathBuf,
    /// Delay between frames (33 ms ≈ 30 fps).
    pub frame_interval_ms: u64,
    /// Most records kept in memory; the oldest are dropped first. `None`
    /// keeps every record.
    pub history_limit: Option<usize>,
    /// Interval reported by `auto_capture_state` before any job has run.
    pub default_auto_interval: u64,
    /// While streaming, write a numbered JPEG here every
    /// `snapshot_interval_secs`.
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
    pub analyzer: AnalyzerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            frames_dir: PathBuf::from("frames"),
            frame_interval_ms: 33,
            history_limit: None,
            default_auto_interval: 5,
            snapshot_dir: None,
            snapshot_interval_secs: 2,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults, overlaid with the TOML file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let config = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .map_err(|e| RelayError::Config(format!("{}: {e}", p.display())))?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, RelayError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.frame_interval_ms == 0 {
            return Err(RelayError::Config("frame_interval_ms must be positive".into()));
        }
        if self.history_limit == Some(0) {
            return Err(RelayError::Config("history_limit must be positive".into()));
        }
        if self.default_auto_interval == 0 {
            return Err(RelayError::Config("default_auto_interval must be positive".into()));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(RelayError::Config("snapshot_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}
