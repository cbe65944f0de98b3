//! JSON-RPC protocol handling for `flutter run --machine`

use serde::Deserialize;

use fdump_core::DaemonMessage;

/// Strip the outer brackets from a daemon message
///
/// The Flutter daemon wraps all messages in `[...]` for resilience.
/// Returns the inner content if brackets are present.
pub(crate) fn strip_brackets(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        Some(&trimmed[1..trimmed.len() - 1])
    } else {
        None
    }
}

/// A raw daemon message (before parsing into typed events)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMessage {
    /// An event from the daemon (unsolicited)
    Event {
        event: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// A response to a request we sent
    Response {
        id: serde_json::Value,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
}

/// Parses a JSON-RPC message from Flutter's `--machine` stdout.
///
/// Handles both bracketed lines (`[{...}]`) and raw JSON objects. Build output
/// and other non-JSON lines yield `None`.
pub fn parse_daemon_message(line: &str) -> Option<DaemonMessage> {
    let json = strip_brackets(line).unwrap_or_else(|| line.trim());
    if json.is_empty() {
        return None;
    }

    match serde_json::from_str::<RawMessage>(json).ok()? {
        RawMessage::Event { event, params } => Some(parse_event(&event, params)),
        RawMessage::Response { id, result, error } => {
            Some(DaemonMessage::Response { id, result, error })
        }
    }
}

/// Parse an event by name and parameters
fn parse_event(event: &str, params: serde_json::Value) -> DaemonMessage {
    match event {
        "daemon.logMessage" => serde_json::from_value(params.clone())
            .map(DaemonMessage::DaemonLogMessage)
            .unwrap_or_else(|_| unknown_event(event, params)),
        "app.start" => serde_json::from_value(params.clone())
            .map(DaemonMessage::AppStart)
            .unwrap_or_else(|_| unknown_event(event, params)),
        "app.started" => match params.get("appId").and_then(|v| v.as_str()) {
            Some(app_id) => DaemonMessage::AppStarted {
                app_id: app_id.to_string(),
            },
            None => unknown_event(event, params),
        },
        "app.stop" => serde_json::from_value(params.clone())
            .map(DaemonMessage::AppStop)
            .unwrap_or_else(|_| unknown_event(event, params)),
        "app.log" => serde_json::from_value(params.clone())
            .map(DaemonMessage::AppLog)
            .unwrap_or_else(|_| unknown_event(event, params)),
        "app.debugPort" => serde_json::from_value(params.clone())
            .map(DaemonMessage::AppDebugPort)
            .unwrap_or_else(|_| unknown_event(event, params)),
        _ => unknown_event(event, params),
    }
}

fn unknown_event(event: &str, params: serde_json::Value) -> DaemonMessage {
    DaemonMessage::UnknownEvent {
        event: event.to_string(),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("[{\"a\":1}]"), Some("{\"a\":1}"));
        assert_eq!(strip_brackets("  [x]  "), Some("x"));
        assert_eq!(strip_brackets("no brackets"), None);
        assert_eq!(strip_brackets("["), None);
    }

    #[test]
    fn test_parse_debug_port() {
        let line = r#"[{"event":"app.debugPort","params":{"appId":"a1","port":8181,"wsUri":"ws://127.0.0.1:8181/abc=/ws","baseUri":"file:///"}}]"#;
        match parse_daemon_message(line) {
            Some(DaemonMessage::AppDebugPort(port)) => {
                assert_eq!(port.app_id, "a1");
                assert_eq!(port.ws_uri.as_deref(), Some("ws://127.0.0.1:8181/abc=/ws"));
            }
            other => panic!("expected AppDebugPort, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_debug_port_without_ws_uri_is_still_typed() {
        let line = r#"[{"event":"app.debugPort","params":{"appId":"a1","port":8181}}]"#;
        match parse_daemon_message(line) {
            Some(DaemonMessage::AppDebugPort(port)) => assert!(port.ws_uri.is_none()),
            other => panic!("expected AppDebugPort, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unbracketed_event() {
        let line = r#"{"event":"app.started","params":{"appId":"a1"}}"#;
        assert!(matches!(
            parse_daemon_message(line),
            Some(DaemonMessage::AppStarted { .. })
        ));
    }

    #[test]
    fn test_parse_response() {
        let line = r#"[{"id":1,"result":{"code":0}}]"#;
        match parse_daemon_message(line) {
            Some(DaemonMessage::Response { id, result, error }) => {
                assert_eq!(id, serde_json::json!(1));
                assert!(result.is_some());
                assert!(error.is_none());
            }
            other => panic!("expected Response, got {:?}", other),
        }
    }

    #[test]
    fn test_non_json_lines_are_ignored() {
        assert!(parse_daemon_message("Launching lib/main.dart on macOS in debug mode...").is_none());
        assert!(parse_daemon_message("").is_none());
        assert!(parse_daemon_message("[]").is_none());
    }

    #[test]
    fn test_unknown_event_preserved() {
        let line = r#"[{"event":"device.added","params":{"id":"macos"}}]"#;
        match parse_daemon_message(line) {
            Some(DaemonMessage::UnknownEvent { event, params }) => {
                assert_eq!(event, "device.added");
                assert_eq!(params["id"], "macos");
            }
            other => panic!("expected UnknownEvent, got {:?}", other),
        }
    }
}
