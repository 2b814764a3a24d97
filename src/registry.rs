//! Server-side session registry: the single owner of stream, auto-capture and
//! history state.
//!
//! ## Design
//! - Shared state sits behind `Arc<Mutex<RelayState>>`; the guard is never
//!   held across an `.await`.
//! - Every viewer subscribes to one `tokio::sync::broadcast` channel of
//!   [`ServerEvent`]s, so a state change is fanned out to all viewers at once.
//! - Record ids are assigned and the `new_response` broadcast is sent under
//!   the same lock, so viewers see responses in id order even when several
//!   analyses finish concurrently.
//! - Stream, auto-capture, history and count events are only sent under the
//!   lock, which lets
//!   [`SessionRegistry::resync`] hand a lagging viewer a fresh receiver and a
//!   matching catch-up snapshot with nothing in between.
//! - Camera IO runs on the blocking pool, never under the lock.
//!
//! ## Lifecycle
//! 1. A viewer connects → [`SessionRegistry::join`], then receives
//!    [`SessionRegistry::connect_snapshot`] and everyone gets a new count.
//! 2. Commands from any viewer go through [`SessionRegistry::handle_command`].
//! 3. The frame loop and the auto-capture job run as background tasks owned by
//!    the registry and are aborted when stopped.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::Analyzer;
use crate::camera::{Camera, FrameReader};
use crate::config::RelayConfig;
use crate::dispatch::resolve_prompt;
use crate::error::RelayError;
use crate::protocol::{AnalysisRecord, ClientCommand, ServerEvent};

/// Events buffered per viewer before a slow viewer starts skipping.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Longest accepted auto-capture interval (one day).
pub const MAX_AUTO_INTERVAL_SECS: i64 = 86_400;

/// Where and how often the frame loop archives a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSettings {
    pub dir: PathBuf,
    pub every: Duration,
}

/// Tunables taken from [`RelayConfig`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub frame_interval: Duration,
    /// `None` keeps every record.
    pub history_limit: Option<usize>,
    pub default_auto_interval: u64,
    pub snapshots: Option<SnapshotSettings>,
}

impl From<&RelayConfig> for RegistrySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            history_limit: config.history_limit,
            default_auto_interval: config.default_auto_interval,
            snapshots: config.snapshot_dir.as_ref().map(|dir| SnapshotSettings {
                dir: dir.clone(),
                every: config.snapshot_interval(),
            }),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

struct AutoCaptureJob {
    interval_secs: u64,
    prompt: String,
    handle: JoinHandle<()>,
}

struct RelayState {
    viewers: HashSet<String>,
    stream: Option<JoinHandle<()>>,
    latest_frame: Option<Arc<Vec<u8>>>,
    auto_capture: Option<AutoCaptureJob>,
    /// Newest first.
    history: VecDeque<AnalysisRecord>,
    next_id: u64,
    last_auto_interval: u64,
}

/// Cloneable handle to the relay's shared state.
#[derive(Clone)]
pub struct SessionRegistry {
    state: Arc<Mutex<RelayState>>,
    events: broadcast::Sender<ServerEvent>,
    camera: Arc<dyn Camera>,
    analyzer: Arc<Analyzer>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    pub fn new(camera: Arc<dyn Camera>, analyzer: Analyzer, settings: RegistrySettings) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = RelayState {
            viewers: HashSet::new(),
            stream: None,
            latest_frame: None,
            auto_capture: None,
            history: VecDeque::new(),
            next_id: 1,
            last_auto_interval: settings.default_auto_interval,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            events,
            camera,
            analyzer: Arc::new(analyzer),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Viewers and fan-out
    // -----------------------------------------------------------------------

    /// Register a viewer. Returns its id and a receiver for broadcast events.
    pub fn join(&self) -> (String, broadcast::Receiver<ServerEvent>) {
        let id = uuid::Uuid::new_v4().to_string();
        let rx = self.events.subscribe();
        self.lock().viewers.insert(id.clone());
        (id, rx)
    }

    /// Unregister a viewer. Returns `false` if the id was unknown.
    pub fn leave(&self, viewer_id: &str) -> bool {
        self.lock().viewers.remove(viewer_id)
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Send an event to every viewer. A send with no viewers is not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    pub fn broadcast_client_count(&self) {
        let state = self.lock();
        let count = state.viewers.len() as u64;
        let _ = self.events.send(ServerEvent::ClientCount { count });
    }

    /// Events a newly connected viewer needs to rebuild its mirrors.
    pub fn connect_snapshot(&self) -> Vec<ServerEvent> {
        let state = self.lock();
        let interval = state
            .auto_capture
            .as_ref()
            .map(|job| job.interval_secs)
            .unwrap_or(state.last_auto_interval);
        vec![
            ServerEvent::stream_status(state.stream.is_some()),
            ServerEvent::AutoCaptureState {
                is_running: state.auto_capture.is_some(),
                interval,
            },
            ServerEvent::ResponsesHistory {
                history: state.history.iter().cloned().collect(),
            },
        ]
    }

    /// A fresh receiver plus the events that bring a viewer which skipped
    /// broadcasts back in line with the registry.
    ///
    /// Unlike [`connect_snapshot`](Self::connect_snapshot) this is applied on
    /// top of a mirror that may be stale, so a stopped job is reported as
    /// `auto_capture_stopped` rather than `auto_capture_state{is_running:false}`.
    pub fn resync(&self) -> (broadcast::Receiver<ServerEvent>, Vec<ServerEvent>) {
        let state = self.lock();
        let rx = self.events.subscribe();
        let auto_capture = match &state.auto_capture {
            Some(job) => ServerEvent::AutoCaptureState {
                is_running: true,
                interval: job.interval_secs,
            },
            None => ServerEvent::AutoCaptureStopped,
        };
        let events = vec![
            ServerEvent::ClientCount {
                count: state.viewers.len() as u64,
            },
            ServerEvent::stream_status(state.stream.is_some()),
            auto_capture,
            ServerEvent::ResponsesHistory {
                history: state.history.iter().cloned().collect(),
            },
        ];
        (rx, events)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub async fn handle_command(&self, command: ClientCommand) {
        debug!(command = command.name(), "handling command");
        match command {
            ClientCommand::StartStream => self.start_stream().await,
            ClientCommand::StopStream => self.stop_stream(),
            ClientCommand::CaptureAndAnalyze { prompt } => self.request_analysis(prompt),
            ClientCommand::ClearHistory => self.clear_history(),
            ClientCommand::StartAutoCapture { interval, prompt } => {
                self.start_auto_capture(interval, prompt)
            }
            ClientCommand::StopAutoCapture => self.stop_auto_capture(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().stream.is_some()
    }

    async fn open_camera(&self) -> Result<Box<dyn FrameReader>, RelayError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || camera.open())
            .await
            .map_err(|e| RelayError::Camera(format!("camera open task failed: {e}")))?
    }

    /// Start the frame loop if it is not running, then report the stream
    /// state to everyone. Also serves as a state query.
    pub async fn start_stream(&self) {
        let reader = if self.is_streaming() {
            None
        } else {
            match self.open_camera().await {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!(error = %e, "cannot open camera");
                    None
                }
            }
        };

        let mut state = self.lock();
        // A concurrent start may have won while the camera was opening; the
        // spare reader is dropped.
        if let Some(reader) = reader {
            if state.stream.is_none() {
                info!(camera = %self.camera.describe(), "stream started");
                let task = run_frame_loop(
                    self.clone(),
                    reader,
                    self.settings.frame_interval,
                    self.settings.snapshots.clone(),
                );
                state.stream = Some(tokio::spawn(task));
            }
        }
        // Sent under the lock so no frame can overtake the status.
        let _ = self.events.send(ServerEvent::stream_status(state.stream.is_some()));
    }

    pub fn stop_stream(&self) {
        let mut state = self.lock();
        if let Some(handle) = state.stream.take() {
            handle.abort();
            info!("stream stopped");
        }
        state.latest_frame = None;
        let _ = self.events.send(ServerEvent::stream_status(false));
    }

    /// Store and broadcast a frame produced by the frame loop.
    fn publish_frame(&self, jpeg: Vec<u8>) {
        let image = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        let mut state = self.lock();
        if state.stream.is_none() {
            return;
        }
        state.latest_frame = Some(Arc::new(jpeg));
        drop(state);
        self.publish(ServerEvent::VideoFrame { image });
    }

    /// Latest streamed frame, or a single frame read from the camera when the
    /// stream is paused.
    pub async fn grab_frame(&self) -> Result<Arc<Vec<u8>>, RelayError> {
        let latest = self.lock().latest_frame.clone();
        if let Some(frame) = latest {
            return Ok(frame);
        }
        let reader = self.open_camera().await?;
        let (_reader, frame) = read_off_runtime(reader).await?;
        Ok(Arc::new(frame?))
    }

    /// Analyse the current frame in the background.
    pub fn request_analysis(&self, prompt: String) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.analyze_now(&prompt).await;
        });
    }

    /// Analyse the current frame and broadcast the outcome: `new_response` on
    /// success, `analysis_error` otherwise.
    pub async fn analyze_now(&self, prompt: &str) -> Option<AnalysisRecord> {
        let prompt = resolve_prompt(prompt);
        let frame = match self.grab_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "no frame to analyse");
                self.publish(ServerEvent::AnalysisError {
                    error: e.to_string(),
                });
                return None;
            }
        };
        match self.analyzer.analyze(&frame, &prompt).await {
            Ok(response) => Some(self.record_response(prompt, response)),
            Err(e) => {
                warn!(analyzer = self.analyzer.name(), error = %e, "analysis failed");
                self.publish(ServerEvent::AnalysisError {
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn record_response(&self, prompt: String, response: String) -> AnalysisRecord {
        let mut state = self.lock();
        let record = AnalysisRecord {
            id: state.next_id,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            prompt,
            response,
        };
        state.next_id += 1;
        state.history.push_front(record.clone());
        info!(id = record.id, "analysis recorded");
        let _ = self.events.send(ServerEvent::NewResponse(record.clone()));

        // Viewers only ever add rows, so a trim is followed by the trimmed
        // table to keep their copies equal to what a reconnect would load.
        if let Some(limit) = self.settings.history_limit {
            if state.history.len() > limit {
                state.history.truncate(limit);
                debug!(limit, "history trimmed");
                let _ = self.events.send(ServerEvent::ResponsesHistory {
                    history: state.history.iter().cloned().collect(),
                });
            }
        }
        record
    }

    /// Newest first.
    pub fn history(&self) -> Vec<AnalysisRecord> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.history.clear();
        info!("history cleared");
        let _ = self.events.send(ServerEvent::HistoryCleared);
    }

    pub fn is_auto_capturing(&self) -> bool {
        self.lock().auto_capture.is_some()
    }

    /// Prompt of the running auto-capture job.
    pub fn auto_capture_prompt(&self) -> Option<String> {
        self.lock().auto_capture.as_ref().map(|job| job.prompt.clone())
    }

    /// Start (or restart with new settings) the auto-capture job.
    ///
    /// Intervals outside `1..=MAX_AUTO_INTERVAL_SECS` are answered with
    /// `analysis_error` and leave any running job untouched.
    pub fn start_auto_capture(&self, interval: i64, prompt: String) {
        if !(1..=MAX_AUTO_INTERVAL_SECS).contains(&interval) {
            warn!(interval, "rejected auto-capture interval");
            self.publish(ServerEvent::AnalysisError {
                error: format!(
                    "auto-capture interval must be between 1 and {MAX_AUTO_INTERVAL_SECS} seconds, got {interval}"
                ),
            });
            return;
        }
        let interval_secs = interval as u64;
        let prompt = resolve_prompt(&prompt);
        let task = run_auto_capture(
            self.clone(),
            Duration::from_secs(interval_secs),
            prompt.clone(),
        );
        let job = AutoCaptureJob {
            interval_secs,
            prompt,
            handle: tokio::spawn(task),
        };

        let mut state = self.lock();
        if let Some(previous) = state.auto_capture.replace(job) {
            previous.handle.abort();
        }
        state.last_auto_interval = interval_secs;
        info!(interval_secs, "auto-capture started");
        let _ = self.events.send(ServerEvent::AutoCaptureStarted {
            interval: interval_secs,
        });
    }

    pub fn stop_auto_capture(&self) {
        let mut state = self.lock();
        if let Some(job) = state.auto_capture.take() {
            job.handle.abort();
            info!("auto-capture stopped");
        }
        let _ = self.events.send(ServerEvent::AutoCaptureStopped);
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Read one frame on the blocking pool, handing the reader back.
async fn read_off_runtime(
    mut reader: Box<dyn FrameReader>,
) -> Result<(Box<dyn FrameReader>, Result<Vec<u8>, RelayError>), RelayError> {
    tokio::task::spawn_blocking(move || {
        let frame = reader.read_frame();
        (reader, frame)
    })
    .await
    .map_err(|e| RelayError::Camera(format!("frame read task failed: {e}")))
}

/// Numbered frame archive written while the stream runs. Numbering restarts
/// with every stream.
#[derive(Debug)]
struct SnapshotArchive {
    dir: PathBuf,
    every: Duration,
    last: Instant,
    next_index: u64,
}

impl SnapshotArchive {
    fn new(settings: SnapshotSettings, now: Instant) -> Self {
        Self {
            dir: settings.dir,
            every: settings.every,
            last: now,
            next_index: 0,
        }
    }

    /// Path for a snapshot taken at `now`, if one is due.
    fn due(&mut self, now: Instant) -> Option<PathBuf> {
        if now.duration_since(self.last) < self.every {
            return None;
        }
        self.last = now;
        let path = self.dir.join(format!("snapshot_{}.jpg", self.next_index));
        self.next_index += 1;
        Some(path)
    }
}

async fn open_archive(settings: Option<SnapshotSettings>) -> Option<SnapshotArchive> {
    let settings = settings?;
    if let Err(e) = tokio::fs::create_dir_all(&settings.dir).await {
        warn!(dir = %settings.dir.display(), error = %e, "snapshots disabled");
        return None;
    }
    Some(SnapshotArchive::new(settings, Instant::now()))
}

async fn run_frame_loop(
    registry: SessionRegistry,
    mut reader: Box<dyn FrameReader>,
    period: Duration,
    snapshots: Option<SnapshotSettings>,
) {
    let mut archive = open_archive(snapshots).await;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let frame = match read_off_runtime(reader).await {
            Ok((returned, frame)) => {
                reader = returned;
                frame
            }
            Err(e) => {
                warn!(error = %e, "frame loop stopped");
                return;
            }
        };
        let jpeg = match frame {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(error = %e, "frame read failed");
                continue;
            }
        };
        if let Some(path) = archive.as_mut().and_then(|a| a.due(Instant::now())) {
            match tokio::fs::write(&path, &jpeg).await {
                Ok(()) => debug!(path = %path.display(), "snapshot saved"),
                Err(e) => warn!(path = %path.display(), error = %e, "snapshot failed"),
            }
        }
        registry.publish_frame(jpeg);
    }
}

async fn run_auto_capture(registry: SessionRegistry, period: Duration, prompt: String) {
    // First capture one full interval after start.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        debug!("auto-capture tick");
        registry.analyze_now(&prompt).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
