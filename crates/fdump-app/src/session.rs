//! Dump session: one VM Service connection and the isolate it targets.
//!
//! A [`Session`] is created once per dump and handed to every pipeline step.
//! It owns the [`VmServiceClient`] (transport and correlator) and the main
//! isolate id, so nothing else holds connection state.

use std::time::Duration;

use serde_json::Value;

use fdump_core::prelude::*;
use fdump_daemon::vm_service::{
    main_isolate_id, reload_sources, VmClientEvent, VmRpc, VmServiceClient,
    DEFAULT_MAX_MESSAGE_BYTES, RELOAD_SOURCES_SERVICE,
};

/// Stream on which the Flutter tool announces its registered services.
const SERVICE_STREAM: &str = "Service";

pub struct Session {
    client: VmServiceClient,
    isolate_id: String,
    ws_uri: String,
    closed: bool,
}

impl Session {
    /// Connect to `ws_uri` and resolve the main isolate.
    ///
    /// The connection is closed again if isolate discovery fails.
    pub async fn connect(ws_uri: &str) -> Result<Self> {
        Self::connect_with_limit(ws_uri, DEFAULT_MAX_MESSAGE_BYTES).await
    }

    /// [`connect`](Self::connect) accepting replies up to `max_message_bytes`.
    pub async fn connect_with_limit(ws_uri: &str, max_message_bytes: usize) -> Result<Self> {
        let client = VmServiceClient::connect_with_limit(ws_uri, max_message_bytes).await?;

        let isolate_id = match main_isolate_id(&client).await {
            Ok(id) => id,
            Err(e) => {
                client.disconnect().await;
                return Err(e);
            }
        };
        info!("Using isolate {}", isolate_id);

        Ok(Self {
            client,
            isolate_id,
            ws_uri: ws_uri.to_string(),
            closed: false,
        })
    }

    pub fn isolate_id(&self) -> &str {
        &self.isolate_id
    }

    pub fn ws_uri(&self) -> &str {
        &self.ws_uri
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.client.is_connected()
    }

    /// Find the namespaced `reloadSources` method registered by the Flutter
    /// tool (e.g. `s0.reloadSources`).
    ///
    /// Subscribes to the `Service` stream, whose current registrations are
    /// replayed on subscription, and waits up to `wait` for the announcement.
    pub async fn find_reload_method(&mut self, wait: Duration) -> Option<String> {
        if let Err(e) = self.client.stream_listen(SERVICE_STREAM).await {
            // Already subscribed is fine; anything else means no registrations.
            debug!("streamListen({}) failed: {}", SERVICE_STREAM, e);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let event =
                match tokio::time::timeout_at(deadline, self.client.event_receiver().recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) | Err(_) => return None,
                };

            let VmClientEvent::StreamEvent(event) = event else {
                continue;
            };
            let stream_event = event.params.event;
            if stream_event.kind == "ServiceRegistered"
                && stream_event.service.as_deref() == Some(RELOAD_SOURCES_SERVICE)
            {
                if let Some(method) = stream_event.method {
                    debug!("Found reload service {}", method);
                    return Some(method);
                }
            }
        }
    }

    /// Hot reload through the Flutter tool's `reloadSources` service.
    ///
    /// Returns `false` when no such service is registered (e.g. the app was
    /// not started by `flutter run`).
    pub async fn hot_reload(&mut self, wait: Duration) -> Result<bool> {
        let Some(method) = self.find_reload_method(wait).await else {
            warn!("No reloadSources service registered; skipping hot reload");
            return Ok(false);
        };
        let isolate_id = self.isolate_id.clone();
        reload_sources(&self.client, &method, &isolate_id).await?;
        info!("Hot reload requested");
        Ok(true)
    }

    /// Close the connection. Pending calls are abandoned. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.client.disconnect().await;
        debug!("Session closed");
    }
}

impl VmRpc for Session {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.client.request(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdump_daemon::test_utils::{vm_with_main_isolate, MockReply, MockVmService};
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_resolves_main_isolate() {
        let mock = MockVmService::start(|method, _| match method {
            "getVM" => MockReply::Result(vm_with_main_isolate("isolates/7")),
            _ => MockReply::Result(json!({})),
        })
        .await;

        let mut session = Session::connect(&mock.ws_uri()).await.unwrap();
        assert_eq!(session.isolate_id(), "isolates/7");
        assert!(session.is_connected());

        session.close().await;
        session.close().await;
        assert!(!session.is_connected());
        assert!(matches!(
            session.request("getVM", None).await,
            Err(Error::ConnectionNotReady)
        ));
    }

    #[tokio::test]
    async fn test_connect_fails_without_user_isolate() {
        let mock = MockVmService::start(|_, _| {
            MockReply::Result(json!({
                "type": "VM",
                "isolates": [{ "id": "isolates/0", "isSystemIsolate": true }]
            }))
        })
        .await;

        let result = Session::connect(&mock.ws_uri()).await;
        assert!(matches!(result, Err(Error::VmService(_))));
    }

    #[tokio::test]
    async fn test_hot_reload_uses_registered_method() {
        let mock = MockVmService::start(|method, _| match method {
            "getVM" => MockReply::Result(vm_with_main_isolate("isolates/1")),
            _ => MockReply::Result(json!({ "type": "Success" })),
        })
        .await;
        let mut session = Session::connect(&mock.ws_uri()).await.unwrap();

        let push = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            mock.push(json!({
                "jsonrpc": "2.0",
                "method": "streamNotify",
                "params": {
                    "streamId": "Service",
                    "event": {
                        "kind": "ServiceRegistered",
                        "service": "reloadSources",
                        "method": "s0.reloadSources",
                        "alias": "Flutter Tools"
                    }
                }
            }));
        };
        let (reloaded, _) = tokio::join!(session.hot_reload(Duration::from_secs(2)), push);

        assert!(reloaded.unwrap());
        assert_eq!(mock.call_count("streamListen"), 1);
        assert_eq!(mock.call_count("s0.reloadSources"), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_hot_reload_without_service_is_skipped() {
        let mock = MockVmService::start(|method, _| match method {
            "getVM" => MockReply::Result(vm_with_main_isolate("isolates/1")),
            _ => MockReply::Result(json!({ "type": "Success" })),
        })
        .await;
        let mut session = Session::connect(&mock.ws_uri()).await.unwrap();

        let reloaded = session.hot_reload(Duration::from_millis(100)).await.unwrap();
        assert!(!reloaded);
        session.close().await;
    }
}
