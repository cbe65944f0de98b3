//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Flutter Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Flutter SDK not found. Set FLUTTER_ROOT or ensure 'flutter' is in your PATH.")]
    FlutterNotFound,

    #[error("No Flutter project found in: {path}")]
    NoProject { path: PathBuf },

    #[error("Failed to spawn Flutter process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("flutter run did not report app.debugPort within {secs}s")]
    DebugPortTimeout { secs: u64 },

    #[error("Daemon protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Transport / Correlator Errors
    // ─────────────────────────────────────────────────────────────
    #[error("VM Service connection is not open")]
    ConnectionNotReady,

    #[error("Failed to connect to VM Service at {uri}: {reason}")]
    Connection { uri: String, reason: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("VM Service RPC error: {message}")]
    RemoteRpc {
        code: Option<i64>,
        message: String,
        payload: serde_json::Value,
    },

    #[error("VM Service error: {0}")]
    VmService(String),

    // ─────────────────────────────────────────────────────────────
    // Dump Pipeline Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Widget tree not ready after {attempts} attempts")]
    StabilizationTimeout { attempts: u32 },

    #[error("Unexpected result shape: {raw}")]
    UnexpectedResultShape { raw: String },

    #[error("Expression evaluation failed: {message}")]
    EvaluationFailed { message: String },

    #[error("Failed to parse dump payload: {message}")]
    ParseFailure {
        message: String,
        offset: Option<usize>,
    },

    #[error("Crawler reported an error: {message}")]
    CrawlerReported { message: String },

    #[error("Source injection failed: {message}")]
    Injection { message: String },

    // ─────────────────────────────────────────────────────────────
    // Asset Errors (non-fatal, recorded per asset)
    // ─────────────────────────────────────────────────────────────
    #[error("Image too large ({size} bytes, limit {limit}): {path}")]
    AssetTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("Image file not found: {path}")]
    AssetNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn connection(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`Error::VmService`] error with a message.
    pub fn vm_service(msg: impl Into<String>) -> Self {
        Self::VmService(msg.into())
    }

    /// Create a [`Error::UnexpectedResultShape`] from the offending value.
    pub fn unexpected_shape(value: &serde_json::Value) -> Self {
        Self::UnexpectedResultShape {
            raw: value.to_string(),
        }
    }

    pub fn injection(message: impl Into<String>) -> Self {
        Self::Injection {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The connection to the target is gone or was never usable.
    ///
    /// These abort loops that otherwise tolerate per-call failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectionNotReady | Error::ChannelClosed | Error::Connection { .. }
        )
    }

    /// Per-asset problems that are recorded but never abort a dump.
    pub fn is_asset_issue(&self) -> bool {
        matches!(self, Error::AssetTooLarge { .. } | Error::AssetNotFound { .. })
    }

    /// The message text reported by the target, if this error came from it.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::RemoteRpc { message, .. } => Some(message),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
