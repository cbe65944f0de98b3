//! Domain event definitions for the `flutter run --machine` daemon protocol

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Event Structs
// ─────────────────────────────────────────────────────────

/// Log message from the daemon itself (not the app)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonLogMessage {
    pub level: String,
    pub message: String,
}

/// App start event - when app begins launching
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStart {
    pub app_id: String,
    pub device_id: String,
    #[serde(default)]
    pub directory: Option<String>,
}

/// App stop event
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStop {
    pub app_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// App log event - Flutter print() and debug output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppLog {
    pub app_id: String,
    pub log: String,
    #[serde(default)]
    pub error: bool,
}

/// Debug port information, carrying the VM Service WebSocket URI
///
/// Both fields are optional on the wire: a `app.debugPort` event without
/// `wsUri` is reported as a protocol error by the launcher instead of being
/// silently dropped as an unknown event.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDebugPort {
    pub app_id: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ws_uri: Option<String>,
}

// ─────────────────────────────────────────────────────────
// DaemonMessage Enum
// ─────────────────────────────────────────────────────────

/// Fully typed daemon message
#[derive(Debug, Clone)]
pub enum DaemonMessage {
    DaemonLogMessage(DaemonLogMessage),

    // App lifecycle
    AppStart(AppStart),
    AppStarted { app_id: String },
    AppStop(AppStop),
    AppLog(AppLog),
    AppDebugPort(AppDebugPort),

    // Responses to requests we sent (e.g. `app.stop`)
    Response {
        id: serde_json::Value,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    },

    // Fallback for unknown events
    UnknownEvent {
        event: String,
        params: serde_json::Value,
    },
}

impl DaemonMessage {
    /// Get the app ID if this message relates to an app
    pub fn app_id(&self) -> Option<&str> {
        match self {
            DaemonMessage::AppStart(e) => Some(&e.app_id),
            DaemonMessage::AppStarted { app_id } => Some(app_id),
            DaemonMessage::AppStop(e) => Some(&e.app_id),
            DaemonMessage::AppLog(e) => Some(&e.app_id),
            DaemonMessage::AppDebugPort(e) => Some(&e.app_id),
            _ => None,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            DaemonMessage::DaemonLogMessage(m) => format!("[{}] {}", m.level, m.message),
            DaemonMessage::AppStart(s) => format!("App starting on {}", s.device_id),
            DaemonMessage::AppStarted { .. } => "App started".to_string(),
            DaemonMessage::AppStop(s) => match &s.error {
                Some(err) => format!("App stopped: {}", err),
                None => "App stopped".to_string(),
            },
            DaemonMessage::AppLog(log) => log.log.clone(),
            DaemonMessage::AppDebugPort(d) => match &d.ws_uri {
                Some(uri) => format!("VM Service at {}", uri),
                None => "Debug port reported without wsUri".to_string(),
            },
            DaemonMessage::Response { id, error, .. } => {
                if error.is_some() {
                    format!("Response #{}: error", id)
                } else {
                    format!("Response #{}: ok", id)
                }
            }
            DaemonMessage::UnknownEvent { event, .. } => format!("Event: {}", event),
        }
    }
}

// ─────────────────────────────────────────────────────────
// DaemonEvent
// ─────────────────────────────────────────────────────────

/// Events from the Flutter daemon process
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Raw stdout line from daemon (JSON-RPC wrapped)
    Stdout(String),
    /// Stderr output (usually build errors/warnings)
    Stderr(String),
    /// Daemon process has exited
    Exited { code: Option<i32> },
}
