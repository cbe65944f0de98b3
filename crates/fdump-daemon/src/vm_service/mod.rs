//! Dart VM Service WebSocket protocol types and utilities.
//!
//! This module contains types and helpers for communicating with the Dart VM
//! Service over WebSocket using the JSON-RPC 2.0 protocol.
//!
//! ## Modules
//!
//! - [`protocol`]: JSON-RPC types, the request tracker, and the message parser.
//! - [`client`]: Async WebSocket client and the [`VmRpc`] trait.
//! - [`extensions`]: Widget-inspector extension calls with their exact params.
//! - [`instance`]: `evaluate`/`getObject` and truncated string recovery.
//!
//! ## Quick start
//!
//! ```ignore
//! use fdump_daemon::vm_service::{
//!     evaluate, get_root_widget_summary_tree, resolve_string, VmServiceClient,
//! };
//!
//! let client = VmServiceClient::connect("ws://127.0.0.1:8181/ws").await?;
//! let isolate_id = client.main_isolate_id().await?;
//!
//! let tree = get_root_widget_summary_tree(&client, &isolate_id, "fdump-inspector").await?;
//!
//! let result = evaluate(&client, &isolate_id, None, "jsonEncode(payload)").await?;
//! let text = resolve_string(&client, &isolate_id, &result).await?;
//!
//! client.disconnect().await;
//! ```

pub mod client;
pub mod extensions;
pub mod instance;
pub mod protocol;

pub use client::{
    get_isolate, get_vm, main_isolate_id, ConnectionState, LocalVmRpc, VmRequestHandle, VmRpc,
    VmServiceClient, DEFAULT_MAX_MESSAGE_BYTES,
};
pub use extensions::{
    ext, get_details_subtree, get_layout_explorer_node, get_root_widget_summary_tree,
    get_selected_widget, reload_sources, set_selection_by_id, RELOAD_SOURCES_SERVICE,
};
pub use instance::{evaluate, get_object, resolve_string, InstanceRef, ResolvedString};
pub use protocol::{
    parse_vm_message, IsolateInfo, IsolateRef, LibraryRef, StreamEvent, StreamEventParams,
    VmClientEvent, VmInfo, VmRequestTracker, VmServiceEvent, VmServiceMessage, VmServiceRequest,
    VmServiceResponse,
};
