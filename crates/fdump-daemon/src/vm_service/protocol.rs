//! JSON-RPC 2.0 protocol types for the Dart VM Service WebSocket interface.
//!
//! The Dart VM Service communicates over WebSocket using JSON-RPC 2.0. This module
//! defines the types for requests, responses, and stream events, plus a request
//! tracker for correlating async responses with their originating requests.
//!
//! Protocol reference:
//! <https://github.com/dart-lang/sdk/blob/main/runtime/vm/service/service.md>

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use fdump_core::json::parse_value;
use fdump_core::prelude::*;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request to the Dart VM Service.
#[derive(Debug, Serialize)]
pub struct VmServiceRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Numeric request ID, unique for the lifetime of the connection.
    pub id: u64,
    /// Method name, e.g. `"getVM"` or `"ext.flutter.inspector.getDetailsSubtree"`.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl VmServiceRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response from the Dart VM Service.
///
/// `id` is kept as a raw value: the VM echoes whatever we sent, but some
/// proxies (DDS, DevTools) re-encode numeric ids as strings.
#[derive(Debug, Deserialize)]
pub struct VmServiceResponse {
    pub id: Value,
    /// Successful result payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error payload, present when the call failed. Kept raw so the
    /// serialized object can be surfaced verbatim.
    #[serde(default)]
    pub error: Option<Value>,
}

impl VmServiceResponse {
    /// Convert this response into the value delivered to the caller.
    ///
    /// An `error` member wins over `result`; a frame with neither is a
    /// protocol violation.
    pub fn into_result(self) -> Result<Value> {
        match (self.error, self.result) {
            (Some(error), _) => Err(remote_error(error)),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(Error::protocol(
                "VM Service response contained neither result nor error",
            )),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Deserialize)]
pub struct VmServiceError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data (`{"details": "..."}` for extension errors).
    #[serde(default)]
    pub data: Option<Value>,
}

/// Build a [`Error::RemoteRpc`] from a raw JSON-RPC error object.
///
/// The message is `error.data.details` when present (Flutter extensions put
/// the Dart exception text there), otherwise the serialized error object.
pub fn remote_error(error: Value) -> Error {
    let details = error
        .get("data")
        .and_then(|data| data.get("details"))
        .and_then(Value::as_str)
        .filter(|details| !details.is_empty())
        .map(str::to_string);

    let parsed: Option<VmServiceError> = serde_json::from_value(error.clone()).ok();
    let code = parsed.as_ref().map(|e| e.code);
    let message = details.unwrap_or_else(|| error.to_string());

    Error::RemoteRpc {
        code,
        message,
        payload: error,
    }
}

// ---------------------------------------------------------------------------
// Stream event types
// ---------------------------------------------------------------------------

/// VM Service stream event notification (no `id` field, `method = "streamNotify"`).
#[derive(Debug, Clone, Deserialize)]
pub struct VmServiceEvent {
    /// Always `"streamNotify"` for event notifications.
    pub method: String,
    /// Stream-specific event payload.
    pub params: StreamEventParams,
}

/// Parameters of a `"streamNotify"` notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventParams {
    /// The stream identifier, e.g. `"Service"`, `"Extension"`.
    pub stream_id: String,
    /// The event itself.
    pub event: StreamEvent,
}

/// A single VM Service stream event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Event kind, e.g. `"ServiceRegistered"`.
    pub kind: String,
    /// Service name for `ServiceRegistered` events (e.g. `"reloadSources"`).
    #[serde(default)]
    pub service: Option<String>,
    /// Namespaced method to call for a registered service (e.g. `"s0.reloadSources"`).
    #[serde(default)]
    pub method: Option<String>,
    /// Kind-specific fields, captured untyped for forward compatibility.
    #[serde(flatten)]
    pub data: Value,
}

/// Traffic the correlator could not route to a waiting caller.
///
/// Forwarded through the client's event channel so that callers interested
/// in side-channel traffic (service registration, late replies) can observe it.
#[derive(Debug, Clone)]
pub enum VmClientEvent {
    /// A stream notification from the VM Service.
    StreamEvent(VmServiceEvent),
    /// A response whose id matches no pending request.
    UnmatchedResponse { id: String },
    /// Valid JSON that is neither a response nor a stream notification.
    Unrecognized(Value),
}

// ---------------------------------------------------------------------------
// VM / Isolate information types
// ---------------------------------------------------------------------------

/// Response body from the `getVM` RPC call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Running isolates.
    #[serde(default)]
    pub isolates: Vec<IsolateRef>,
}

impl VmInfo {
    /// The first isolate that is not an internal VM system isolate.
    pub fn main_isolate(&self) -> Option<&IsolateRef> {
        self.isolates
            .iter()
            .find(|iso| !iso.is_system_isolate.unwrap_or(false))
    }
}

/// Lightweight reference to a Dart isolate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateRef {
    /// Unique isolate ID (e.g. `"isolates/1234"`).
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Whether this is an internal VM system isolate.
    #[serde(default)]
    pub is_system_isolate: Option<bool>,
}

/// Isolate details from the `getIsolate` RPC call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Loaded library references.
    #[serde(default)]
    pub libraries: Vec<LibraryRef>,
}

/// Lightweight reference to a Dart library.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryRef {
    /// Library object ID, usable as `targetId` for `evaluate`.
    pub id: String,
    /// Library URI (e.g. `"package:my_app/main.dart"`).
    pub uri: String,
}

// ---------------------------------------------------------------------------
// Parsed message discriminant
// ---------------------------------------------------------------------------

/// The result of parsing a raw VM Service WebSocket text frame.
#[derive(Debug)]
pub enum VmServiceMessage {
    /// A response to a request (has a non-null `id` field).
    Response(VmServiceResponse),
    /// A stream event notification (no `id`, `method = "streamNotify"`).
    Event(VmServiceEvent),
    /// Valid JSON we could not interpret as either of the above.
    Unrecognized(Value),
    /// Not JSON at all.
    Malformed(String),
}

/// Parse a raw WebSocket text message into a typed [`VmServiceMessage`].
///
/// Dispatch logic:
/// - Not valid JSON → [`VmServiceMessage::Malformed`].
/// - A non-null top-level `"id"` → [`VmServiceResponse`].
/// - A `"method"` of `"streamNotify"` → [`VmServiceEvent`].
/// - Anything else → [`VmServiceMessage::Unrecognized`].
pub fn parse_vm_message(text: &str) -> VmServiceMessage {
    let value: Value = match parse_value(text) {
        Ok(v) => v,
        Err(e) => return VmServiceMessage::Malformed(e.to_string()),
    };

    let has_id = value.get("id").is_some_and(|v| !v.is_null());
    let is_notify = value.get("method").and_then(Value::as_str) == Some("streamNotify");

    if has_id {
        match serde_json::from_value::<VmServiceResponse>(value.clone()) {
            Ok(response) => VmServiceMessage::Response(response),
            Err(_) => VmServiceMessage::Unrecognized(value),
        }
    } else if is_notify {
        match serde_json::from_value::<VmServiceEvent>(value.clone()) {
            Ok(event) => VmServiceMessage::Event(event),
            Err(_) => VmServiceMessage::Unrecognized(value),
        }
    } else {
        VmServiceMessage::Unrecognized(value)
    }
}

/// A numeric `"id"` member anywhere in a frame, quoted or not.
static RESPONSE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""id"\s*:\s*"?(\d+)"?\s*[,}]"#).expect("Invalid response id regex")
});

/// Ids a frame that failed to parse may be answering, most likely first.
///
/// The VM writes the top-level `id` after `result`, so later matches come
/// first. Callers only act on a candidate that is actually pending.
pub fn candidate_response_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = RESPONSE_ID_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    ids.reverse();
    ids
}

/// Normalize a JSON-RPC id into the tracker's key space.
///
/// Numbers and strings both map to their decimal/text form, so a reply
/// carrying `"7"` matches a request sent with `7`.
pub fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Request tracker
// ---------------------------------------------------------------------------

/// Channel half used to deliver a request's outcome to its caller.
pub type ResponseSender = oneshot::Sender<Result<Value>>;

/// Tracks in-flight VM Service requests and matches them to responses.
///
/// Ids are allocated from a per-tracker counter, so every connection starts
/// at `1` and ids are never reused while the tracker lives. Every registered
/// id leaves the table exactly once: through [`complete`](Self::complete),
/// [`discard`](Self::discard) or [`clear`](Self::clear).
pub struct VmRequestTracker {
    next_id: u64,
    pending: HashMap<String, ResponseSender>,
}

impl VmRequestTracker {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next id and register `response_tx` under it.
    pub fn register(&mut self, response_tx: ResponseSender) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id.to_string(), response_tx);
        id
    }

    /// Deliver a response to its waiting caller.
    ///
    /// Returns `false` (and leaves the table untouched) if no pending request
    /// has this key.
    pub fn complete(&mut self, key: &str, response: VmServiceResponse) -> bool {
        match self.pending.remove(key) {
            Some(response_tx) => {
                // The caller may have stopped waiting; nothing to do then.
                let _ = response_tx.send(response.into_result());
                true
            }
            None => false,
        }
    }

    /// Fail a pending request with `error`.
    ///
    /// Returns `false` if no pending request has this key.
    pub fn fail(&mut self, key: &str, error: Error) -> bool {
        match self.pending.remove(key) {
            Some(response_tx) => {
                let _ = response_tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Remove a pending request without answering it, returning its sender.
    ///
    /// Used when the request frame could not be written.
    pub fn discard(&mut self, id: u64) -> Option<ResponseSender> {
        self.pending.remove(&id.to_string())
    }

    /// Drop every pending request. Waiting callers observe a closed channel.
    ///
    /// Returns the number of requests abandoned.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for VmRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
