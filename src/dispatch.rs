//! Translate user gestures into protocol commands.
//!
//! [`dispatch`] is a pure function of the gesture and the mirrored state. It
//! never changes state itself: the server's reply event does that.

use crate::error::RelayError;
use crate::protocol::ClientCommand;
use crate::state::ViewerState;

/// Prompt used when the prompt box is blank.
pub const DEFAULT_PROMPT: &str = "What is in this picture?";

/// A user gesture, with free-text inputs exactly as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    StartStream,
    StopStream,
    CaptureAndAnalyze { prompt: String },
    ClearHistory,
    StartAutoCapture { interval: String, prompt: String },
    StopAutoCapture,
}

/// Trimmed prompt, or [`DEFAULT_PROMPT`] when blank.
pub fn resolve_prompt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse the interval box as whole seconds. Range is checked by the server.
pub fn parse_interval(raw: &str) -> Result<i64, RelayError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| RelayError::InvalidInterval(raw.to_string()))
}

/// Map a gesture to the command to send.
///
/// Fails with [`RelayError::NotConnected`] while the connection is down (the
/// gesture is dropped, not queued) and with [`RelayError::ControlDisabled`]
/// when the mirrored auto-capture state has the control switched off.
pub fn dispatch(intent: UserIntent, state: &ViewerState) -> Result<ClientCommand, RelayError> {
    if state.controls_frozen() {
        return Err(RelayError::NotConnected);
    }
    let cmd = match intent {
        UserIntent::StartStream => ClientCommand::StartStream,
        UserIntent::StopStream => ClientCommand::StopStream,
        UserIntent::CaptureAndAnalyze { prompt } => ClientCommand::CaptureAndAnalyze {
            prompt: resolve_prompt(&prompt),
        },
        UserIntent::ClearHistory => ClientCommand::ClearHistory,
        UserIntent::StartAutoCapture { interval, prompt } => {
            if !state.controls.start_auto {
                return Err(RelayError::ControlDisabled("start_auto"));
            }
            if !state.controls.interval_input {
                return Err(RelayError::ControlDisabled("interval_input"));
            }
            ClientCommand::StartAutoCapture {
                interval: parse_interval(&interval)?,
                prompt: resolve_prompt(&prompt),
            }
        }
        UserIntent::StopAutoCapture => {
            if !state.controls.stop_auto {
                return Err(RelayError::ControlDisabled("stop_auto"));
            }
            ClientCommand::StopAutoCapture
        }
    };
    Ok(cmd)
}
