//! Shared fixtures: a throwaway Flutter project, fast settings, and a VM
//! Service handler that behaves like a small running app.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use fdump_app::Settings;
use fdump_daemon::test_utils::{summary_tree, vm_with_main_isolate, MockReply};

pub const ISOLATE_ID: &str = "isolates/4242";
pub const CRAWLER_LIBRARY_ID: &str = "libraries/7";
pub const ORIGINAL_MAIN: &str =
    "import 'package:flutter/material.dart';\n\nvoid main() => runApp(const MyApp());\n";

/// Settings with every delay removed.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.connection.service_wait_ms = 200;
    settings.inspector.settle_delay_ms = 0;
    settings.inspector.ready_interval_ms = 0;
    settings.inspector.node_delay_ms = 0;
    settings.crawler.settle_delay_ms = 0;
    settings.crawler.hot_reload_delay_ms = 0;
    settings
}

/// A project with `lib/main.dart`, a crawler source and one image asset.
pub fn flutter_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("lib")).unwrap();
    std::fs::create_dir_all(root.join("tool")).unwrap();
    std::fs::create_dir_all(root.join("assets")).unwrap();
    std::fs::write(root.join("pubspec.yaml"), "name: demo\n").unwrap();
    std::fs::write(root.join("lib/main.dart"), ORIGINAL_MAIN).unwrap();
    std::fs::write(
        root.join("tool/crawler.dart"),
        "String figmaExtractorEntryPoint() => '{}';\n",
    )
    .unwrap();
    std::fs::write(root.join("assets/logo.png"), b"PNG").unwrap();
    dir
}

pub fn crawler_path() -> PathBuf {
    PathBuf::from("tool/crawler.dart")
}

/// The crawler's layout JSON: a root with a text child and an image child.
pub fn figma_layout() -> Value {
    json!({
        "type": "Scaffold",
        "children": [
            { "type": "Text", "properties": { "text": "Hello" }, "children": [] },
            {
                "type": "Image",
                "properties": { "imagePath": "AssetImage(name: \"assets/logo.png\")" },
                "children": []
            }
        ]
    })
}

/// What `evaluate` answers: a string cut off after `visible` chars.
pub fn truncated_instance(full: &str, visible: usize) -> Value {
    let prefix: String = full.chars().take(visible).collect();
    json!({
        "type": "@Instance",
        "kind": "String",
        "id": "objects/1",
        "valueAsString": prefix,
        "valueAsStringIsTruncated": true,
    })
}

/// A handler answering like a running app whose crawler evaluates to
/// `crawler_output`.
///
/// The summary tree call fails with the not-ready error `not_ready_calls`
/// times before succeeding.
pub fn app_handler(
    crawler_output: String,
    node_count: usize,
    not_ready_calls: usize,
) -> impl Fn(&str, &Value) -> MockReply + Send + Sync + 'static {
    let tree_calls = Arc::new(AtomicUsize::new(0));

    move |method: &str, params: &Value| match method {
        "getVM" => MockReply::Result(vm_with_main_isolate(ISOLATE_ID)),
        "getIsolate" => MockReply::Result(json!({
            "type": "Isolate",
            "id": ISOLATE_ID,
            "libraries": [
                { "type": "@Library", "id": "libraries/1", "uri": "package:demo/main.dart" },
                { "type": "@Library", "id": CRAWLER_LIBRARY_ID, "uri": "package:demo/figma_temp_crawler.dart" },
            ],
        })),
        "streamListen" => MockReply::Result(json!({ "type": "Success" })),
        "s0.reloadSources" => MockReply::Result(json!({ "type": "ReloadReport", "success": true })),
        "evaluate" => MockReply::Result(truncated_instance(&crawler_output, 8)),
        "getObject" => MockReply::Result(json!({
            "type": "Instance",
            "kind": "String",
            "id": "objects/1",
            "valueAsString": crawler_output,
        })),
        "ext.flutter.inspector.setSelectionById" => MockReply::Result(json!({ "result": true })),
        "ext.flutter.inspector.getSelectedWidget" => MockReply::Result(json!({ "result": null })),
        "ext.flutter.inspector.getRootWidgetSummaryTree" => {
            if tree_calls.fetch_add(1, Ordering::SeqCst) < not_ready_calls {
                MockReply::extension_error("Null check operator used on a null value")
            } else {
                MockReply::Result(summary_tree(node_count))
            }
        }
        "ext.flutter.inspector.getLayoutExplorerNode" => MockReply::Result(json!({
            "valueId": params["id"],
            "size": { "width": "100.0", "height": "40.0" },
        })),
        "ext.flutter.inspector.getDetailsSubtree" => MockReply::Result(json!({
            "valueId": params["arg"],
            "properties": [],
        })),
        _ => MockReply::Error(json!({ "code": -32601, "message": "Method not found" })),
    }
}

/// A `ServiceRegistered` notification for the Flutter tool's hot reload.
pub fn reload_service_registered() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "streamNotify",
        "params": {
            "streamId": "Service",
            "event": {
                "type": "Event",
                "kind": "ServiceRegistered",
                "service": "reloadSources",
                "method": "s0.reloadSources",
                "alias": "Flutter Tools",
            },
        },
    })
}

pub fn read_json(path: PathBuf) -> Value {
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read {}: {}", path.display(), e));
    fdump_core::json::parse_value(&text).unwrap()
}
