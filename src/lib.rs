//! Live camera relay with on-demand and scheduled AI frame analysis.
//!
//! The server ([`server`], [`registry`]) owns all state and fans events out
//! to viewers over WebSocket. A viewer keeps a mirror of that state in
//! [`state::ViewerState`], changed only by the reducer, and turns user
//! gestures into commands with [`dispatch::dispatch`].

pub mod analysis;
pub mod camera;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod state;
pub mod view;

pub use dispatch::{dispatch, UserIntent, DEFAULT_PROMPT};
pub use error::RelayError;
pub use history::HistoryTable;
pub use protocol::{AnalysisRecord, ClientCommand, ServerEvent};
pub use registry::SessionRegistry;
pub use state::{InboundEvent, Transition, ViewerState};
pub use view::ViewerOutput;
