//! Viewer runtime: connection lifecycle, reconnects and user input.
//!
//! One task owns the [`ViewerState`]. Inbound frames and user intents are
//! handled one at a time inside a single `select!`, so handlers never
//! interleave. The viewer keeps no timers of its own apart from the
//! reconnect backoff; auto-capture cadence is entirely server-driven.

use std::path::PathBuf;
use std::time::Duration;

use colored::*;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::dispatch::{dispatch, UserIntent};
use crate::error::RelayError;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::state::{InboundEvent, Transition, ViewerState};
use crate::view::{TerminalView, ViewerOutput};

/// Commands understood on stdin.
pub const HELP: &str = "commands: start | stop | capture [prompt] | clear | auto <seconds> [prompt] | stop-auto | quit";

const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// WebSocket URL of the relay, e.g. `ws://127.0.0.1:5000/`.
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Write each applied frame's JPEG here.
    pub save_frame: Option<PathBuf>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/".to_string(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            save_frame: None,
        }
    }
}

/// Parse one line of user input into a gesture.
pub fn parse_command(line: &str) -> Option<UserIntent> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let intent = match word.to_ascii_lowercase().as_str() {
        "start" => UserIntent::StartStream,
        "stop" => UserIntent::StopStream,
        "capture" => UserIntent::CaptureAndAnalyze {
            prompt: rest.to_string(),
        },
        "clear" => UserIntent::ClearHistory,
        "auto" => {
            let (interval, prompt) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            UserIntent::StartAutoCapture {
                interval: interval.to_string(),
                prompt: prompt.trim().to_string(),
            }
        }
        "stop-auto" => UserIntent::StopAutoCapture,
        _ => return None,
    };
    Some(intent)
}

/// Read gestures from stdin until EOF or `quit`. The channel closes when the
/// reader stops, which ends [`run_viewer`].
pub fn spawn_stdin_intents() -> mpsc::Receiver<UserIntent> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        eprintln!("{}", HELP.bright_blue());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" || line == "exit" {
                break;
            }
            match parse_command(line) {
                Some(intent) => {
                    if tx.send(intent).await.is_err() {
                        break;
                    }
                }
                None => eprintln!("{}", HELP.yellow()),
            }
        }
    });
    rx
}

/// Apply one event to the state in place and render it. Returns the command
/// the reducer asked to send.
fn apply<O: ViewerOutput>(state: &mut ViewerState, event: InboundEvent, view: &mut O) -> Option<ClientCommand> {
    let Transition { state: next, outbound } = std::mem::take(state).reduce(&event);
    *state = next;
    view.render(&event, state);
    outbound
}

async fn send_command<S>(sink: &mut S, command: &ClientCommand) -> Result<(), RelayError>
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    debug!(command = command.name(), "sending command");
    sink.send(WsMessage::Text(command.encode()?)).await?;
    Ok(())
}

/// Next reconnect delay: `base` plus a little random jitter.
pub fn backoff_with_jitter(base: Duration) -> Duration {
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The connection went away; reconnect.
    Dropped,
    /// The user is done; stop.
    Quit,
}

/// Connect, stay in sync, and reconnect with exponential backoff until the
/// intent channel closes. State changes are printed to the terminal.
pub async fn run_viewer(
    config: ViewerConfig,
    intents: mpsc::Receiver<UserIntent>,
) -> Result<(), RelayError> {
    let view = TerminalView::new(config.save_frame.clone());
    run_viewer_with(config, intents, view).await
}

/// [`run_viewer`] with every applied state handed to `view`.
pub async fn run_viewer_with<O: ViewerOutput>(
    config: ViewerConfig,
    mut intents: mpsc::Receiver<UserIntent>,
    mut view: O,
) -> Result<(), RelayError> {
    let mut state = ViewerState::new();
    let mut backoff = config.initial_backoff;

    loop {
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((ws, _response)) => {
                info!(url = %config.url, "connected to relay");
                backoff = config.initial_backoff;
                let (mut sink, mut stream) = ws.split();
                let end = run_session(&mut sink, &mut stream, &mut state, &mut intents, &mut view).await;
                apply(&mut state, InboundEvent::Disconnected, &mut view);
                if end == SessionEnd::Quit {
                    let _ = sink.close().await;
                    return Ok(());
                }
            }
            Err(e) => warn!(url = %config.url, error = %e, "cannot reach relay"),
        }

        let delay = backoff_with_jitter(backoff);
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                intent = intents.recv() => match intent {
                    // Gestures while offline are dropped, not queued.
                    Some(intent) => {
                        if let Err(e) = dispatch(intent, &state) {
                            view.rejected(&e);
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

async fn run_session<Si, St, O>(
    sink: &mut Si,
    stream: &mut St,
    state: &mut ViewerState,
    intents: &mut mpsc::Receiver<UserIntent>,
    view: &mut O,
) -> SessionEnd
where
    O: ViewerOutput,
    Si: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    St: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    if let Some(command) = apply(state, InboundEvent::Connected, view) {
        if let Err(e) = send_command(sink, &command).await {
            warn!(error = %e, "initial command failed");
            return SessionEnd::Dropped;
        }
    }

    loop {
        let outbound = tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match ServerEvent::decode(&text) {
                    Ok(event) => apply(state, InboundEvent::Server(event), view),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed event");
                        None
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    warn!(error = %e, "connection lost");
                    return SessionEnd::Dropped;
                }
            },
            intent = intents.recv() => match intent {
                None => return SessionEnd::Quit,
                Some(intent) => match dispatch(intent, state) {
                    Ok(command) => Some(command),
                    Err(e) => {
                        view.rejected(&e);
                        None
                    }
                },
            },
        };

        if let Some(command) = outbound {
            if let Err(e) = send_command(sink, &command).await {
                warn!(error = %e, "send failed");
                return SessionEnd::Dropped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("start", UserIntent::StartStream)]
    #[case("STOP", UserIntent::StopStream)]
    #[case("clear", UserIntent::ClearHistory)]
    #[case("stop-auto", UserIntent::StopAutoCapture)]
    #[case("capture", UserIntent::CaptureAndAnalyze { prompt: String::new() })]
    #[case("capture  how many cats?", UserIntent::CaptureAndAnalyze { prompt: "how many cats?".into() })]
    #[case("auto 5 describe the room", UserIntent::StartAutoCapture { interval: "5".into(), prompt: "describe the room".into() })]
    #[case("auto 10", UserIntent::StartAutoCapture { interval: "10".into(), prompt: String::new() })]
    #[case("auto", UserIntent::StartAutoCapture { interval: String::new(), prompt: String::new() })]
    fn test_parse_command(#[case] line: &str, #[case] expected: UserIntent) {
        assert_eq!(parse_command(line), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("launch")]
    #[case("stopauto")]
    fn test_parse_command_unknown(#[case] line: &str) {
        assert_eq!(parse_command(line), None);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let base = Duration::from_millis(500);
        for _ in 0..50 {
            let d = backoff_with_jitter(base);
            assert!(d >= base);
            assert!(d <= base + Duration::from_millis(MAX_JITTER_MS));
        }
    }

    #[test]
    fn test_viewer_config_defaults() {
        let c = ViewerConfig::default();
        assert_eq!(c.url, "ws://127.0.0.1:5000/");
        assert!(c.initial_backoff < c.max_backoff);
        assert!(c.save_frame.is_none());
    }

    #[tokio::test]
    async fn test_run_viewer_returns_when_intents_close() {
        // Nothing listens on this port; the viewer waits to reconnect and
        // notices the closed channel.
        let config = ViewerConfig {
            url: "ws://127.0.0.1:1/".to_string(),
            initial_backoff: Duration::from_millis(10),
            ..ViewerConfig::default()
        };
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(5), run_viewer(config, rx)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
