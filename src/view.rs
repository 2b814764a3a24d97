//! Viewer output: what the runtime does with each applied state.
//!
//! [`ViewerOutput`] is the seam between the viewer runtime and whatever shows
//! the state; [`TerminalView`] prints it.

use std::path::PathBuf;

use base64::Engine;
use colored::*;
use tracing::{trace, warn};

use crate::error::RelayError;
use crate::protocol::{AnalysisRecord, ServerEvent};
use crate::state::{InboundEvent, StreamState, ViewerState};

/// Receives every state the viewer runtime applies.
pub trait ViewerOutput: Send {
    /// `state` already includes `event`.
    fn render(&mut self, event: &InboundEvent, state: &ViewerState);

    /// A gesture produced no command.
    fn rejected(&mut self, err: &RelayError);
}

/// Prints state changes as they are applied.
#[derive(Debug, Default)]
pub struct TerminalView {
    /// Where the latest frame's JPEG is written, if anywhere.
    save_frame: Option<PathBuf>,
}

/// One history row as plain text.
pub fn format_record(record: &AnalysisRecord) -> String {
    format!(
        "#{:<4} {}  {}  ->  {}",
        record.id, record.timestamp, record.prompt, record.response
    )
}

/// Enablement of the auto-capture controls, e.g.
/// `start-auto: on | stop-auto: off | interval: on`.
pub fn controls_line(state: &ViewerState) -> String {
    let flag = |on: bool| if on { "on" } else { "off" };
    format!(
        "start-auto: {} | stop-auto: {} | interval: {}",
        flag(state.controls.start_auto),
        flag(state.controls.stop_auto),
        flag(state.controls.interval_input)
    )
}

impl TerminalView {
    pub fn new(save_frame: Option<PathBuf>) -> Self {
        Self { save_frame }
    }
}

impl ViewerOutput for TerminalView {
    fn render(&mut self, event: &InboundEvent, state: &ViewerState) {
        match event {
            InboundEvent::Connected => println!("{} {}", "●".green(), "Connected".green().bold()),
            InboundEvent::Disconnected => {
                println!("{} {}", "●".red(), "Disconnected".red().bold())
            }
            InboundEvent::Server(ev) => self.render_server_event(ev, state),
        }
    }

    fn rejected(&mut self, err: &RelayError) {
        eprintln!("{} {}", "✗".red(), err.to_string().red());
    }
}

impl TerminalView {

    fn render_server_event(&mut self, ev: &ServerEvent, state: &ViewerState) {
        match ev {
            ServerEvent::VideoFrame { .. } => {
                trace!(frames = state.frames_received, "frame applied");
                self.write_frame(state);
            }
            ServerEvent::ClientCount { count } => {
                println!("{} {}", "viewers:".dimmed(), count.to_string().bright_white());
            }
            ServerEvent::StreamStatus { .. } => {
                let label = match state.stream {
                    StreamState::Running => state.status_label.bright_green(),
                    StreamState::Paused => state.status_label.yellow(),
                };
                println!("{label}");
            }
            ServerEvent::AutoCaptureStarted { .. }
            | ServerEvent::AutoCaptureStopped
            | ServerEvent::AutoCaptureState { .. } => {
                if state.auto_capture.is_running {
                    println!("{}", state.status_label.bright_cyan());
                } else if matches!(ev, ServerEvent::AutoCaptureStopped) {
                    println!("{}", state.status_label.yellow());
                }
                println!("  {}", controls_line(state).dimmed());
            }
            ServerEvent::NewResponse(record) => {
                println!("{}", format_record(record).bright_white());
                println!("  {}", state.response_panel.bright_blue());
            }
            ServerEvent::ResponsesHistory { .. } => {
                println!("{} ({} records)", "History".bold(), state.history.len());
                for record in state.records() {
                    println!("  {}", format_record(record));
                }
            }
            ServerEvent::HistoryCleared => println!("{}", "History cleared".yellow()),
            ServerEvent::AnalysisError { .. } => println!("{}", state.response_panel.red()),
        }
    }

    fn write_frame(&self, state: &ViewerState) {
        let (Some(path), Some(frame)) = (&self.save_frame, &state.frame) else {
            return;
        };
        match base64::engine::general_purpose::STANDARD.decode(&frame.image) {
            Ok(jpeg) => {
                if let Err(e) = std::fs::write(path, jpeg) {
                    warn!(path = %path.display(), error = %e, "cannot save frame");
                }
            }
            Err(e) => warn!(error = %e, "frame is not valid base64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_record() {
        let r = AnalysisRecord {
            id: 3,
            timestamp: "2026-01-01 10:00:00".into(),
            prompt: "What is in this picture?".into(),
            response: "a cat".into(),
        };
        assert_eq!(
            format_record(&r),
            "#3    2026-01-01 10:00:00  What is in this picture?  ->  a cat"
        );
    }

    #[test]
    fn test_controls_line_idle() {
        assert_eq!(
            controls_line(&ViewerState::new()),
            "start-auto: on | stop-auto: off | interval: on"
        );
    }

    #[test]
    fn test_saved_frame_is_decoded_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.jpg");
        let mut view = TerminalView::new(Some(path.clone()));
        let event = InboundEvent::Server(ServerEvent::VideoFrame {
            image: "anBlZw==".into(),
        });
        let state = ViewerState::new().reduce(&event).state;
        view.render(&event, &state);
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[test]
    fn test_invalid_frame_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.jpg");
        let mut view = TerminalView::new(Some(path.clone()));
        let event = InboundEvent::Server(ServerEvent::VideoFrame {
            image: "***".into(),
        });
        let state = ViewerState::new().reduce(&event).state;
        view.render(&event, &state);
        assert!(!path.exists());
    }
}
