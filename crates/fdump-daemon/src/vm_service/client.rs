//! Async WebSocket client for the Dart VM Service.
//!
//! The [`VmServiceClient`] connects to the Dart VM Service over WebSocket, sends
//! JSON-RPC 2.0 requests, routes responses back to callers via oneshot channels,
//! and forwards everything it cannot route through an mpsc channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     VmServiceClient                          │
//! │                                                              │
//! │  ┌──────────────┐        ┌──────────────────────────────┐   │
//! │  │   Public API │        │   Background Task             │   │
//! │  │              │        │                                │   │
//! │  │  request() ──┼──cmd──▶│  WebSocket read/write loop    │   │
//! │  │              │  chan   │                                │   │
//! │  │  events()  ◀─┼──evt──◀│  Route: response → tracker    │   │
//! │  │              │  chan   │         other    → event chan  │   │
//! │  └──────────────┘        └──────────────────────────────┘   │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  VmRequestTracker (from protocol.rs)                  │   │
//! │  │  Correlates request IDs with response senders         │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A dump is a one-shot session: there is no reconnection. When the socket
//! drops, every pending request fails with [`Error::ChannelClosed`] and new
//! requests fail with [`Error::ConnectionNotReady`].

use std::sync::{Arc, RwLock};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use fdump_core::prelude::*;

use super::protocol::{
    candidate_response_ids, id_key, parse_vm_message, IsolateInfo, VmClientEvent, VmInfo, VmRequestTracker,
    VmServiceMessage, VmServiceRequest,
};

// ---------------------------------------------------------------------------
// VmRpc
// ---------------------------------------------------------------------------

/// Anything that can issue a VM Service JSON-RPC call.
///
/// The dump pipeline is generic over this trait so the poller, crawler and
/// string reconstructor can be driven by a scripted fake in tests.
#[trait_variant::make(VmRpc: Send)]
pub trait LocalVmRpc {
    /// Issue `method` with optional `params`, returning the `result` member.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capacity of the command channel (bounded, to apply backpressure).
const CMD_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the event channel (bounded, events can be bursty).
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default cap on one incoming message (and frame).
///
/// The VM sends every reply as a single frame, and `getObject` replies carry
/// whole strings, so this sits well above tungstenite's 16 MiB frame limit.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Longest prefix of an unparseable frame included in the log.
const LOG_PREVIEW_CHARS: usize = 120;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Current connection state of a [`VmServiceClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection attempt in progress.
    Connecting,
    /// Connected and ready to exchange messages.
    Connected,
    /// Closed by [`VmServiceClient::disconnect`] or lost.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Internal command type
// ---------------------------------------------------------------------------

/// Internal messages sent from the public API to the background task.
enum ClientCommand {
    /// Send a JSON-RPC request and deliver the outcome to `response_tx`.
    SendRequest {
        method: String,
        params: Option<Value>,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    /// Abandon pending requests, close the socket, and stop the task.
    Disconnect { done_tx: oneshot::Sender<()> },
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type SharedState = Arc<RwLock<ConnectionState>>;

fn set_state(state: &SharedState, new_state: ConnectionState) {
    let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
    *guard = new_state;
}

// ---------------------------------------------------------------------------
// VmRequestHandle
// ---------------------------------------------------------------------------

/// A clonable handle for making VM Service RPC requests.
///
/// This shares the underlying WebSocket connection with the [`VmServiceClient`]
/// that created it. Multiple handles can make concurrent requests through the
/// same background task; completions may arrive in any order.
#[derive(Clone)]
pub struct VmRequestHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
    state: SharedState,
}

impl std::fmt::Debug for VmRequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRequestHandle")
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

impl VmRequestHandle {
    /// Send a JSON-RPC request and wait for the response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotReady`] if the connection is not open. The
    ///   request is never registered in that case.
    /// - [`Error::ChannelClosed`] if the connection closed while waiting.
    /// - [`Error::RemoteRpc`] if the VM Service returned a JSON-RPC error.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::ConnectionNotReady);
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::SendRequest {
                method: method.to_string(),
                params,
                response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

impl VmRpc for VmRequestHandle {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        VmRequestHandle::request(self, method, params).await
    }
}

// ---------------------------------------------------------------------------
// VmServiceClient
// ---------------------------------------------------------------------------

/// Async WebSocket client for the Dart VM Service.
///
/// Create with [`VmServiceClient::connect`], then use [`request`](Self::request)
/// to issue JSON-RPC calls and [`event_receiver`](Self::event_receiver) to
/// consume traffic that did not answer a pending request.
pub struct VmServiceClient {
    handle: VmRequestHandle,
    event_rx: mpsc::Receiver<VmClientEvent>,
}

impl VmServiceClient {
    /// Connect to the Dart VM Service at `ws_uri` and return a client.
    ///
    /// Incoming messages are capped at [`DEFAULT_MAX_MESSAGE_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the WebSocket handshake fails.
    pub async fn connect(ws_uri: &str) -> Result<Self> {
        Self::connect_with_limit(ws_uri, DEFAULT_MAX_MESSAGE_BYTES).await
    }

    /// Like [`connect`](Self::connect), accepting messages up to
    /// `max_message_bytes`. A larger reply closes the connection.
    pub async fn connect_with_limit(ws_uri: &str, max_message_bytes: usize) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<VmClientEvent>(EVENT_CHANNEL_CAPACITY);
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Connecting));

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(max_message_bytes);
        config.max_frame_size = Some(max_message_bytes);

        info!("Connecting to VM Service at {}", ws_uri);
        let (ws_stream, _response) = connect_async_with_config(ws_uri, Some(config), false)
            .await
            .map_err(|err| {
                set_state(&state, ConnectionState::Disconnected);
                Error::connection(ws_uri, err.to_string())
            })?;

        set_state(&state, ConnectionState::Connected);
        info!("VM Service connected");

        tokio::spawn(run_client_task(
            ws_stream,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
        ));

        Ok(Self {
            handle: VmRequestHandle { cmd_tx, state },
            event_rx,
        })
    }

    /// Create a clonable request handle that shares this client's connection.
    pub fn request_handle(&self) -> VmRequestHandle {
        self.handle.clone()
    }

    /// Send a JSON-RPC request and wait for the response.
    ///
    /// See [`VmRequestHandle::request`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.handle.request(method, params).await
    }

    /// Return a mutable reference to the unrouted-traffic receiver.
    pub fn event_receiver(&mut self) -> &mut mpsc::Receiver<VmClientEvent> {
        &mut self.event_rx
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.handle.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Close the connection.
    ///
    /// Pending requests are abandoned (their callers see
    /// [`Error::ChannelClosed`]), a Close frame is sent, and the background
    /// task exits. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .handle
            .cmd_tx
            .send(ClientCommand::Disconnect { done_tx })
            .await
            .is_ok()
        {
            // The task may already be gone; either way it is closed now.
            let _ = done_rx.await;
        }
        set_state(&self.handle.state, ConnectionState::Disconnected);
    }

    // ── VM introspection methods ──────────────────────────────────────────

    /// Call `getVM`: returns VM info with the list of running isolates.
    pub async fn get_vm(&self) -> Result<VmInfo> {
        get_vm(&self.handle).await
    }

    /// Call `getIsolate`: returns isolate details including its libraries.
    pub async fn get_isolate(&self, isolate_id: &str) -> Result<IsolateInfo> {
        get_isolate(&self.handle, isolate_id).await
    }

    /// Call `streamListen`: subscribe to a named VM Service stream.
    pub async fn stream_listen(&self, stream_id: &str) -> Result<()> {
        let params = serde_json::json!({ "streamId": stream_id });
        self.request("streamListen", Some(params)).await?;
        Ok(())
    }

    /// Discover the main isolate id (the first non-system isolate).
    pub async fn main_isolate_id(&self) -> Result<String> {
        main_isolate_id(&self.handle).await
    }
}

impl VmRpc for VmServiceClient {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.handle.request(method, params).await
    }
}

// ---------------------------------------------------------------------------
// Generic introspection helpers
// ---------------------------------------------------------------------------

/// Call `getVM` through any [`VmRpc`].
pub async fn get_vm<R: VmRpc>(rpc: &R) -> Result<VmInfo> {
    let result = rpc.request("getVM", None).await?;
    serde_json::from_value(result)
        .map_err(|e| Error::vm_service(format!("parse getVM response: {e}")))
}

/// Call `getIsolate` through any [`VmRpc`].
pub async fn get_isolate<R: VmRpc>(rpc: &R, isolate_id: &str) -> Result<IsolateInfo> {
    let params = serde_json::json!({ "isolateId": isolate_id });
    let result = rpc.request("getIsolate", Some(params)).await?;
    serde_json::from_value(result)
        .map_err(|e| Error::vm_service(format!("parse getIsolate response: {e}")))
}

/// Find the first non-system isolate via `getVM`.
pub async fn main_isolate_id<R: VmRpc>(rpc: &R) -> Result<String> {
    let vm = get_vm(rpc).await?;
    let isolate = vm
        .main_isolate()
        .ok_or_else(|| Error::vm_service("no non-system isolate found"))?;
    debug!(
        "VM Service: main isolate {} ({})",
        isolate.id,
        isolate.name.as_deref().unwrap_or("unnamed")
    );
    Ok(isolate.id.clone())
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// Entry point for the background WebSocket I/O task.
async fn run_client_task(
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<VmClientEvent>,
    state: SharedState,
) {
    let mut tracker = VmRequestTracker::new();
    let done_tx = run_io_loop(ws_stream, &mut cmd_rx, &event_tx, &mut tracker).await;

    set_state(&state, ConnectionState::Disconnected);
    let abandoned = tracker.clear();
    if abandoned > 0 {
        debug!("VM Service: abandoned {} pending request(s)", abandoned);
    }

    // Fail anything still queued behind the loop's exit.
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            ClientCommand::SendRequest { response_tx, .. } => {
                let _ = response_tx.send(Err(Error::ConnectionNotReady));
            }
            ClientCommand::Disconnect { done_tx } => {
                let _ = done_tx.send(());
            }
        }
    }

    if let Some(done_tx) = done_tx {
        let _ = done_tx.send(());
    }
    debug!("VM Service background task exiting");
}

/// Run the read/write select loop until the connection ends.
///
/// Returns the acknowledgement sender when the loop ended because of a
/// [`ClientCommand::Disconnect`].
async fn run_io_loop(
    ws_stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    event_tx: &mpsc::Sender<VmClientEvent>,
    tracker: &mut VmRequestTracker,
) -> Option<oneshot::Sender<()>> {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            // ── Incoming WebSocket message ───────────────────────────────
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_ws_text(text.as_str(), tracker, event_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("VM Service: received Close frame");
                        return None;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary
                    }
                    Some(Err(err)) => {
                        warn!("VM Service: WebSocket read error: {}", err);
                        return None;
                    }
                    None => {
                        debug!("VM Service: WebSocket stream ended");
                        return None;
                    }
                }
            }

            // ── Outgoing command from the public API ─────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::SendRequest { method, params, response_tx }) => {
                        handle_send_request(&method, params, response_tx, tracker, &mut ws_sink)
                            .await;
                    }
                    Some(ClientCommand::Disconnect { done_tx }) => {
                        tracker.clear();
                        send_close(&mut ws_sink).await;
                        return Some(done_tx);
                    }
                    None => {
                        debug!("VM Service: command channel closed, shutting down");
                        send_close(&mut ws_sink).await;
                        return None;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Route an incoming WebSocket text frame to the tracker or event channel.
///
/// Never fails. A malformed frame that names a pending id fails that
/// request with [`Error::Protocol`]; otherwise it is logged and dropped.
fn handle_ws_text(
    text: &str,
    tracker: &mut VmRequestTracker,
    event_tx: &mpsc::Sender<VmClientEvent>,
) {
    let unrouted = match parse_vm_message(text) {
        VmServiceMessage::Response(response) => {
            let Some(key) = id_key(&response.id) else {
                forward_event(event_tx, VmClientEvent::Unrecognized(response.id));
                return;
            };
            if response.error.is_some() {
                warn!("VM Service error for request {}: {:?}", key, response.error);
            }
            if tracker.complete(&key, response) {
                return;
            }
            debug!("VM Service: response for unknown request id {}", key);
            VmClientEvent::UnmatchedResponse { id: key }
        }
        VmServiceMessage::Event(event) => VmClientEvent::StreamEvent(event),
        VmServiceMessage::Unrecognized(value) => VmClientEvent::Unrecognized(value),
        VmServiceMessage::Malformed(reason) => {
            let preview: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
            let failed = candidate_response_ids(text).into_iter().find(|key| {
                tracker.fail(
                    key,
                    Error::protocol(format!("unparseable VM Service reply: {reason}")),
                )
            });
            match failed {
                Some(key) => warn!(
                    "VM Service: malformed reply to request {} ({}): {}",
                    key, reason, preview
                ),
                None => warn!("VM Service: dropping malformed frame ({}): {}", reason, preview),
            }
            return;
        }
    };
    forward_event(event_tx, unrouted);
}

fn forward_event(event_tx: &mpsc::Sender<VmClientEvent>, event: VmClientEvent) {
    if let Err(err) = event_tx.try_send(event) {
        trace!("VM Service: event channel full or closed, dropping event: {}", err);
    }
}

/// Register a pending request, serialize it, and write it to the sink.
///
/// The slot is registered before touching the wire so it exists if the
/// response races the send. If the write fails the slot is discarded and the
/// caller receives the error.
async fn handle_send_request(
    method: &str,
    params: Option<Value>,
    response_tx: oneshot::Sender<Result<Value>>,
    tracker: &mut VmRequestTracker,
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
) {
    let id = tracker.register(response_tx);
    let request = VmServiceRequest::new(id, method, params);

    let outcome = match serde_json::to_string(&request) {
        Ok(json) => {
            debug!("→ VM {}", json);
            // A failed write means the socket is gone.
            ws_sink
                .send(WsMessage::Text(json.into()))
                .await
                .map_err(|err| {
                    warn!("VM Service: failed to send {} request: {}", method, err);
                    Error::ChannelClosed
                })
        }
        Err(err) => Err(Error::protocol(format!(
            "Failed to serialize VM Service request: {err}"
        ))),
    };

    if let Err(e) = outcome {
        if let Some(response_tx) = tracker.discard(id) {
            let _ = response_tx.send(Err(e));
        }
    }
}

/// Send a WebSocket Close frame, ignoring any write errors.
async fn send_close(ws_sink: &mut SplitSink<WsStream, WsMessage>) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
