//! # fdump-daemon - Flutter Process & VM Service Client
//!
//! Launches `flutter run --machine`, parses its JSON-RPC output, and talks to
//! the resulting Dart VM Service over WebSocket.
//!
//! Depends on [`fdump_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`FlutterCommand`] - Locate the `flutter` executable (`FLUTTER_ROOT`, `FLUTTER_HOME`, `PATH`)
//! - [`FlutterProcess`] - Spawn and stop `flutter run --machine` child processes
//! - [`launch()`] - Spawn and wait for the `app.debugPort` WebSocket URI
//!
//! ### Protocol Parsing
//! - [`parse_daemon_message()`] - Parse a line of Flutter `--machine` output
//!
//! ### VM Service
//! - [`vm_service::VmServiceClient`] - WebSocket JSON-RPC client with id correlation
//! - [`vm_service::VmRpc`] - The `request(method, params)` seam every caller is generic over
//! - [`vm_service::resolve_string()`] - Recover strings truncated by `evaluate`
//!
//! ### Testing
//! - `test_utils::MockVmService` (feature `test-helpers`) - In-process VM Service stand-in

pub mod process;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod vm_service;

/// Re-exported from `fdump_core` for convenience. Canonical import: `fdump_core::DaemonMessage`.
pub use fdump_core::DaemonMessage;
pub use process::{launch, wait_for_debug_port, FlutterCommand, FlutterProcess, LaunchedApp};
pub use protocol::parse_daemon_message;
