//! Viewer-side mirror of server state.
//!
//! ## Design
//! - [`ViewerState`] is a plain value. The only way to change it is
//!   [`ViewerState::reduce`], which consumes the current value together with
//!   one [`InboundEvent`] and returns the next value.
//! - The server is always right. Nothing here predicts a state change from a
//!   user action; mirrors move only when the matching server event arrives.
//! - Snapshot events sent at connect time (`auto_capture_state`,
//!   `responses_history`) replace state instead of patching it, so a
//!   reconnect rebuilds everything from scratch.

use crate::history::HistoryTable;
use crate::protocol::{AnalysisRecord, ClientCommand, ServerEvent, STATUS_RUNNING};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Paused,
    Running,
}

impl StreamState {
    /// Map a `stream_status` tag. Anything but `"running"` is paused.
    pub fn from_status(status: &str) -> Self {
        if status == STATUS_RUNNING {
            StreamState::Running
        } else {
            StreamState::Paused
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StreamState::Running => "Stream running",
            StreamState::Paused => "Stream paused",
        }
    }
}

/// Mirror of the server's auto-capture job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoCaptureState {
    pub is_running: bool,
    /// Seconds between captures; `None` while stopped.
    pub interval_seconds: Option<u64>,
}

/// Which auto-capture controls accept input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlEnablement {
    pub start_auto: bool,
    pub stop_auto: bool,
    pub interval_input: bool,
}

impl ControlEnablement {
    /// Auto-capture idle: it can be started, not stopped.
    pub const IDLE: Self = Self {
        start_auto: true,
        stop_auto: false,
        interval_input: true,
    };

    /// Auto-capture running: it can be stopped, not restarted or retimed.
    pub const CAPTURING: Self = Self {
        start_auto: false,
        stop_auto: true,
        interval_input: false,
    };
}

impl Default for ControlEnablement {
    fn default() -> Self {
        Self::IDLE
    }
}

/// The most recently applied video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Base64-encoded JPEG exactly as received.
    pub image: String,
    /// How many frames this viewer had applied when this one landed.
    pub sequence: u64,
}

/// Something that happened to a viewer: a transport lifecycle change or a
/// decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

impl From<ServerEvent> for InboundEvent {
    fn from(ev: ServerEvent) -> Self {
        InboundEvent::Server(ev)
    }
}

/// Everything a viewer displays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewerState {
    pub connection: ConnectionState,
    pub stream: StreamState,
    pub auto_capture: AutoCaptureState,
    pub controls: ControlEnablement,
    /// Human-readable status line. Written by stream and auto-capture events.
    pub status_label: String,
    pub frame: Option<Frame>,
    pub frames_received: u64,
    pub client_count: Option<u64>,
    /// Text of the latest response or error.
    pub response_panel: String,
    pub history: HistoryTable,
}

/// Result of applying one event: the next state plus at most one command the
/// runtime must send.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: ViewerState,
    pub outbound: Option<ClientCommand>,
}

impl ViewerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Controls keep their enablement while disconnected but accept nothing.
    pub fn controls_frozen(&self) -> bool {
        !self.is_connected()
    }

    /// Apply one event.
    pub fn reduce(mut self, event: &InboundEvent) -> Transition {
        let mut outbound = None;
        match event {
            InboundEvent::Connected => {
                self.connection = ConnectionState::Connected;
                // The connect snapshot decides these; start from the idle shape
                // so `auto_capture_state{is_running:false}` needs no action.
                self.auto_capture = AutoCaptureState::default();
                self.controls = ControlEnablement::IDLE;
                // Asks the server to stream and, through its reply, to report
                // the current stream state.
                outbound = Some(ClientCommand::StartStream);
            }
            InboundEvent::Disconnected => {
                self.connection = ConnectionState::Disconnected;
            }
            InboundEvent::Server(ev) => self.apply_server_event(ev),
        }
        Transition {
            state: self,
            outbound,
        }
    }

    fn apply_server_event(&mut self, ev: &ServerEvent) {
        match ev {
            ServerEvent::VideoFrame { image } => {
                self.frames_received += 1;
                self.frame = Some(Frame {
                    image: image.clone(),
                    sequence: self.frames_received,
                });
            }
            ServerEvent::ClientCount { count } => {
                self.client_count = Some(*count);
            }
            ServerEvent::StreamStatus { status } => {
                self.stream = StreamState::from_status(status);
                self.status_label = self.stream.label().to_string();
            }
            ServerEvent::AutoCaptureStarted { interval } => {
                self.auto_capture_started(*interval);
            }
            ServerEvent::AutoCaptureStopped => {
                self.auto_capture = AutoCaptureState::default();
                self.controls = ControlEnablement::IDLE;
                self.status_label = "Auto-capture stopped".to_string();
            }
            ServerEvent::AutoCaptureState {
                is_running,
                interval,
            } => {
                if *is_running {
                    self.auto_capture_started(*interval);
                }
            }
            ServerEvent::NewResponse(record) => {
                self.response_panel = record.response.clone();
                self.history.insert_at_top(record.clone());
            }
            ServerEvent::ResponsesHistory { history } => {
                self.history.bulk_load(history.iter().cloned());
            }
            ServerEvent::HistoryCleared => {
                self.history.clear();
                self.response_panel.clear();
            }
            ServerEvent::AnalysisError { error } => {
                self.response_panel = format!("Error: {error}");
            }
        }
    }

    fn auto_capture_started(&mut self, interval: u64) {
        self.auto_capture = AutoCaptureState {
            is_running: true,
            interval_seconds: Some(interval),
        };
        self.controls = ControlEnablement::CAPTURING;
        self.status_label = format!("Auto-capture active (every {interval}s)");
    }

    /// Records from top to bottom.
    pub fn records(&self) -> impl Iterator<Item = &AnalysisRecord> {
        self.history.iter()
    }
}
