//! Test utilities for VM Service clients
//!
//! [`MockVmService`] is an in-process WebSocket server speaking just enough
//! JSON-RPC to drive [`VmServiceClient`](crate::vm_service::VmServiceClient)
//! and everything built on it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// `{ "id": <id>, "result": ... }`
    Result(Value),
    /// `{ "id": <id>, "error": ... }`
    Error(Value),
    /// No reply at all.
    Silent,
    /// An arbitrary text frame instead of a reply.
    Raw(String),
    /// Close the connection instead of replying.
    Close,
    /// Reply after a delay, letting later requests overtake this one.
    After(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn after(delay: Duration, reply: MockReply) -> Self {
        Self::After(delay, Box::new(reply))
    }

    /// A JSON-RPC error carrying `details` the way the VM Service reports
    /// service extension failures.
    pub fn extension_error(details: &str) -> Self {
        Self::Error(json!({
            "code": -32000,
            "message": "Server error",
            "data": { "details": details },
        }))
    }
}

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

type Handler = dyn Fn(&str, &Value) -> MockReply + Send + Sync;

/// In-process VM Service stand-in.
///
/// Connections are served one after another; frames queued with
/// [`push`](Self::push) go to the current connection.
pub struct MockVmService {
    addr: SocketAddr,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    push_tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl MockVmService {
    /// Bind to an ephemeral localhost port and start serving.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock VM Service");
        let addr = listener.local_addr().expect("mock VM Service address");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(handler),
            Arc::clone(&calls),
            push_rx,
        ));

        Self {
            addr,
            calls,
            push_tx,
            task,
        }
    }

    pub fn ws_uri(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Send an unsolicited frame to the connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.push_tx.send(frame.to_string());
    }
}

impl Drop for MockVmService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The `getVM` answer for a VM with one system and one UI isolate.
pub fn vm_with_main_isolate(isolate_id: &str) -> Value {
    json!({
        "type": "VM",
        "name": "vm",
        "isolates": [
            { "type": "@Isolate", "id": "isolates/0", "name": "vm-service", "isSystemIsolate": true },
            { "type": "@Isolate", "id": isolate_id, "name": "main", "isSystemIsolate": false },
        ],
    })
}

/// A summary tree of `count` nodes: one root with `count - 1` children, ids
/// `inspector-0..`.
pub fn summary_tree(count: usize) -> Value {
    let children: Vec<Value> = (1..count)
        .map(|i| {
            json!({
                "description": format!("Child{}", i),
                "valueId": format!("inspector-{}", i),
                "children": [],
            })
        })
        .collect();
    json!({
        "description": "MyApp",
        "valueId": "inspector-0",
        "children": children,
    })
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    mut push_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        serve_connection(stream, &handler, &calls, &mut push_rx).await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    handler: &Arc<Handler>,
    calls: &Arc<Mutex<Vec<RecordedCall>>>,
    push_rx: &mut mpsc::UnboundedReceiver<String>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    // Replies may be produced by delayed tasks, so all writes go through one queue.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_request(text.as_str(), handler, calls, &out_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            Some(text) = push_rx.recv() => {
                let _ = out_tx.send(WsMessage::Text(text.into()));
            }
        }
    }

    writer.abort();
}

fn handle_request(
    text: &str,
    handler: &Arc<Handler>,
    calls: &Arc<Mutex<Vec<RecordedCall>>>,
    out_tx: &mpsc::UnboundedSender<WsMessage>,
) {
    let Ok(request) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if let Ok(mut calls) = calls.lock() {
        calls.push(RecordedCall {
            method: method.clone(),
            params: params.clone(),
        });
    }

    let reply = handler(&method, &params);
    dispatch(reply, id, out_tx.clone());
}

fn dispatch(reply: MockReply, id: Value, out_tx: mpsc::UnboundedSender<WsMessage>) {
    let text = |frame: Value| WsMessage::Text(frame.to_string().into());
    match reply {
        MockReply::Result(result) => {
            let _ = out_tx.send(text(json!({ "jsonrpc": "2.0", "id": id, "result": result })));
        }
        MockReply::Error(error) => {
            let _ = out_tx.send(text(json!({ "jsonrpc": "2.0", "id": id, "error": error })));
        }
        MockReply::Silent => {}
        MockReply::Raw(raw) => {
            let _ = out_tx.send(WsMessage::Text(raw.into()));
        }
        MockReply::Close => {
            let _ = out_tx.send(WsMessage::Close(None));
        }
        MockReply::After(delay, inner) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                dispatch(*inner, id, out_tx);
            });
        }
    }
}
