//! Command-line interface: `serve` runs the relay, `watch` attaches a
//! terminal viewer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::ViewerConfig;
use crate::config::{AnalyzerBackend, RelayConfig};
use crate::error::RelayError;

#[derive(Parser)]
#[command(name = "camera-relay")]
#[command(version)]
#[command(about = "Stream a camera to many viewers and analyse frames on demand or on a timer")]
pub struct Args {
    /// Log filter (e.g. "debug", "camera_relay=trace"). Defaults to RUST_LOG, then "info"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server
    Serve(ServeArgs),
    /// Connect to a relay as an interactive terminal viewer
    Watch(WatchArgs),
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// TOML config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (default 0.0.0.0:5000)
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory of JPEG frames the camera replays
    #[arg(long)]
    pub frames_dir: Option<PathBuf>,

    /// Milliseconds between streamed frames
    #[arg(long)]
    pub frame_interval_ms: Option<u64>,

    /// Analysis backend
    #[arg(long, value_enum)]
    pub analyzer: Option<AnalyzerBackend>,

    /// Keep at most this many analysis records (default: all)
    #[arg(long)]
    pub history_limit: Option<usize>,

    /// Archive a numbered JPEG here while streaming
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Seconds between archived snapshots (default 2)
    #[arg(long)]
    pub snapshot_interval_secs: Option<u64>,
}

impl ServeArgs {
    /// Config file (if any) with flag overrides applied.
    pub fn resolve(&self) -> Result<RelayConfig, RelayError> {
        let mut config = RelayConfig::load(self.config.as_deref())?;
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(dir) = &self.frames_dir {
            config.frames_dir = dir.clone();
        }
        if let Some(ms) = self.frame_interval_ms {
            config.frame_interval_ms = ms;
        }
        if let Some(backend) = self.analyzer {
            config.analyzer.backend = backend;
        }
        if let Some(limit) = self.history_limit {
            config.history_limit = Some(limit);
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = Some(dir.clone());
        }
        if let Some(secs) = self.snapshot_interval_secs {
            config.snapshot_interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(clap::Args)]
pub struct WatchArgs {
    /// WebSocket URL of the relay
    #[arg(long, default_value = "ws://127.0.0.1:5000/")]
    pub url: String,

    /// Write the latest frame's JPEG to this file
    #[arg(long)]
    pub save_frame: Option<PathBuf>,
}

impl WatchArgs {
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            url: self.url.clone(),
            save_frame: self.save_frame.clone(),
            ..ViewerConfig::default()
        }
    }
}
