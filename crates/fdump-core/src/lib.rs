//! # fdump-core - Core Domain Types
//!
//! Foundation crate for flutter-dump. Provides error handling, logging setup,
//! the generic diagnostics-tree type, and `flutter run --machine` event
//! definitions.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Diagnostics Tree (`diagnostics`)
//! - [`DiagnosticsNode`] - Shape-agnostic wrapper over a widget tree JSON value
//!
//! ### Events (`events`)
//! - [`DaemonMessage`] - Parsed messages from Flutter's `--machine` JSON-RPC output
//! - [`DaemonEvent`] - Wrapper enum for daemon stdout/stderr/exit events
//!
//! ### JSON (`json`)
//! - [`json::parse_value`] - Parse JSON text without a nesting limit
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum covering transport, pipeline and asset failures
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use fdump_core::prelude::*;
//! ```

pub mod diagnostics;
pub mod error;
pub mod events;
pub mod json;
pub mod logging;

/// Prelude for common imports used throughout all flutter-dump crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use diagnostics::DiagnosticsNode;
pub use error::{Error, Result, ResultExt};
pub use events::{
    AppDebugPort, AppLog, AppStart, AppStop, DaemonEvent, DaemonLogMessage, DaemonMessage,
};
