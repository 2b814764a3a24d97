//! Crate-level error type.

/// Errors produced by the relay server, the viewer runtime and the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),

    /// The camera could not be opened or a frame could not be read.
    #[error("camera unavailable: {0}")]
    Camera(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    /// An intent was issued while the viewer has no live connection.
    #[error("not connected to the relay")]
    NotConnected,

    /// An intent targeted a control the mirrored server state has disabled.
    #[error("control '{0}' is disabled")]
    ControlDisabled(&'static str),

    #[error("invalid interval {0:?}: expected an integer number of seconds")]
    InvalidInterval(String),
}

impl From<toml::de::Error> for RelayError {
    fn from(e: toml::de::Error) -> Self {
        RelayError::Config(e.to_string())
    }
}
