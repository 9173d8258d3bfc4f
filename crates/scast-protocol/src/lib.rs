pub mod paths;

use serde::{Deserialize, Serialize};

/// Where a command came from. Used for feedback routing and logging only;
/// both origins are equally trusted (socket reachability is the boundary).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The interactive control surface on the device (the `scast` CLI).
    Local,
    /// An external tool reaching the socket, e.g. over a debug bridge.
    External,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::External => write!(f, "external"),
        }
    }
}

/// Client-to-daemon requests sent as JSON-lines over the Unix socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// Start the display server, acquiring the capture grant if needed.
    Start {
        #[serde(default = "default_origin")]
        origin: Origin,
    },
    /// Stop the display server.
    Stop {
        #[serde(default = "default_origin")]
        origin: Origin,
    },
    /// Query current status. Never mutates state.
    Status,
    /// Switch this connection into status-streaming mode.
    Subscribe,
}

/// Daemon-to-client responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Event(Event),
}

impl Response {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Response::Ok { data }
    }
}

/// Events streamed to subscribers.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The authoritative running flag changed (or an optimistic signal
    /// was published ahead of process confirmation).
    StatusChanged { running: bool },
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PermissionDenied,
    StartFailed,
    Busy,
    InvalidRequest,
    ServerError,
}

/// Status snapshot returned by `Request::Status` and by start/stop acks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Derived running flag (state is Starting or Running).
    pub running: bool,
    /// Coordinator state name, for display.
    pub state: String,
    /// Whether the screen-capture grant is held.
    pub grant: bool,
}

fn default_origin() -> Origin {
    Origin::External
}
