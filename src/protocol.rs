//! Wire protocol shared by the relay server and viewers.
//!
//! Every message is one WebSocket text frame holding
//! `{"event": <name>, "data": <payload>}`. Payload-less events omit `data`.
//!
//! - [`ServerEvent`]: server → viewer, usually fanned out to every viewer.
//! - [`ClientCommand`]: viewer → server, fire-and-forget; the only
//!   acknowledgment is whatever state event the server broadcasts next.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// `stream_status` value meaning frames are being produced.
pub const STATUS_RUNNING: &str = "running";
/// `stream_status` value the server sends when the stream is stopped.
pub const STATUS_PAUSED: &str = "paused";

/// One completed prompt/response pair.
///
/// Created by the server when an analysis finishes; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: u64,
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
}

/// Events pushed from the relay to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    VideoFrame {
        /// Base64-encoded JPEG.
        image: String,
    },
    ClientCount {
        count: u64,
    },
    StreamStatus {
        /// `"running"`; any other value means paused.
        status: String,
    },
    NewResponse(AnalysisRecord),
    ResponsesHistory {
        /// Newest first.
        history: Vec<AnalysisRecord>,
    },
    HistoryCleared,
    AnalysisError {
        error: String,
    },
    AutoCaptureStarted {
        interval: u64,
    },
    AutoCaptureStopped,
    AutoCaptureState {
        is_running: bool,
        interval: u64,
    },
}

/// Commands sent from a viewer to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    StartStream,
    StopStream,
    CaptureAndAnalyze {
        prompt: String,
    },
    ClearHistory,
    StartAutoCapture {
        /// Seconds. Range checking is left to the server.
        interval: i64,
        prompt: String,
    },
    StopAutoCapture,
}

impl ServerEvent {
    /// Build a `stream_status` event from a running flag.
    pub fn stream_status(running: bool) -> Self {
        let status = if running { STATUS_RUNNING } else { STATUS_PAUSED };
        ServerEvent::StreamStatus {
            status: status.to_string(),
        }
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::VideoFrame { .. } => "video_frame",
            ServerEvent::ClientCount { .. } => "client_count",
            ServerEvent::StreamStatus { .. } => "stream_status",
            ServerEvent::NewResponse(_) => "new_response",
            ServerEvent::ResponsesHistory { .. } => "responses_history",
            ServerEvent::HistoryCleared => "history_cleared",
            ServerEvent::AnalysisError { .. } => "analysis_error",
            ServerEvent::AutoCaptureStarted { .. } => "auto_capture_started",
            ServerEvent::AutoCaptureStopped => "auto_capture_stopped",
            ServerEvent::AutoCaptureState { .. } => "auto_capture_state",
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one text frame. Unknown event names and missing or mistyped
    /// fields are errors; callers drop the frame.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::StartStream => "start_stream",
            ClientCommand::StopStream => "stop_stream",
            ClientCommand::CaptureAndAnalyze { .. } => "capture_and_analyze",
            ClientCommand::ClearHistory => "clear_history",
            ClientCommand::StartAutoCapture { .. } => "start_auto_capture",
            ClientCommand::StopAutoCapture => "stop_auto_capture",
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}
