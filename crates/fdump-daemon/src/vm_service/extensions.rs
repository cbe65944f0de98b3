//! Flutter widget-inspector service extension calls.
//!
//! All calls follow the same pattern:
//! - Method name: `ext.flutter.inspector.<name>`
//! - Required param: `isolateId` (the main UI isolate ID)
//!
//! The parameter names differ between extensions (`objectGroup` vs
//! `groupName`, `arg` vs `id`) and most values are strings, except the two
//! summary-tree flags which are JSON booleans. These shapes are what the
//! Flutter framework accepts and must be reproduced exactly.

use serde_json::{json, Value};

use fdump_core::prelude::*;
use fdump_core::DiagnosticsNode;

use super::client::VmRpc;

// ---------------------------------------------------------------------------
// Extension method name constants
// ---------------------------------------------------------------------------

/// Constants for Flutter service extension method names.
pub mod ext {
    /// Select a widget by inspector id; `"0"` primes the inspector.
    pub const SET_SELECTION_BY_ID: &str = "ext.flutter.inspector.setSelectionById";

    /// Get the currently selected widget in the inspector.
    pub const GET_SELECTED_WIDGET: &str = "ext.flutter.inspector.getSelectedWidget";

    /// Get the root widget summary tree (collapsed subtrees).
    pub const GET_ROOT_WIDGET_SUMMARY_TREE: &str = "ext.flutter.inspector.getRootWidgetSummaryTree";

    /// Get the layout explorer node data for a widget.
    pub const GET_LAYOUT_EXPLORER_NODE: &str = "ext.flutter.inspector.getLayoutExplorerNode";

    /// Get the details subtree for a specific node.
    pub const GET_DETAILS_SUBTREE: &str = "ext.flutter.inspector.getDetailsSubtree";
}

/// Name under which the Flutter tool registers its hot reload service.
pub const RELOAD_SOURCES_SERVICE: &str = "reloadSources";

/// `subtreeDepth` sent with `getLayoutExplorerNode`.
const LAYOUT_SUBTREE_DEPTH: &str = "1";

/// `subtreeDepth` sent with `getDetailsSubtree`.
const DETAILS_SUBTREE_DEPTH: &str = "2";

// ---------------------------------------------------------------------------
// Inspector calls
// ---------------------------------------------------------------------------

/// `setSelectionById` with id `"0"`.
///
/// Touching the selection forces the inspector to initialize its object
/// group bookkeeping. Callers treat failures as non-fatal.
pub async fn set_selection_by_id<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    object_group: &str,
) -> Result<Value> {
    let params = json!({
        "id": "0",
        "objectGroup": object_group,
        "isolateId": isolate_id,
    });
    rpc.request(ext::SET_SELECTION_BY_ID, Some(params)).await
}

/// `getSelectedWidget` for `object_group`.
pub async fn get_selected_widget<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    object_group: &str,
) -> Result<Value> {
    let params = json!({
        "objectGroup": object_group,
        "isolateId": isolate_id,
    });
    rpc.request(ext::GET_SELECTED_WIDGET, Some(params)).await
}

/// Fetch the root widget summary tree.
///
/// The result is returned as-is (it may carry an extra `result` wrapper on
/// some Flutter versions); [`DiagnosticsNode`] traversal handles both.
///
/// Fails with the "Null check operator" remote error while the first frame
/// has not been built yet; see the app crate's readiness poller.
pub async fn get_root_widget_summary_tree<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    object_group: &str,
) -> Result<DiagnosticsNode> {
    let params = json!({
        "objectGroup": object_group,
        "isSummaryTree": true,
        "withPreviews": true,
        "isolateId": isolate_id,
    });
    let value = rpc
        .request(ext::GET_ROOT_WIDGET_SUMMARY_TREE, Some(params))
        .await?;
    Ok(DiagnosticsNode::new(value))
}

/// Fetch layout explorer data for one node.
///
/// NOTE: this extension uses `id` and `groupName`, not `arg` and
/// `objectGroup` like the other inspector extensions.
pub async fn get_layout_explorer_node<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    group_name: &str,
    value_id: &str,
) -> Result<Value> {
    let params = json!({
        "id": value_id,
        "groupName": group_name,
        "subtreeDepth": LAYOUT_SUBTREE_DEPTH,
        "isolateId": isolate_id,
    });
    rpc.request(ext::GET_LAYOUT_EXPLORER_NODE, Some(params)).await
}

/// Fetch the details subtree for one node.
pub async fn get_details_subtree<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    object_group: &str,
    value_id: &str,
) -> Result<Value> {
    let params = json!({
        "objectGroup": object_group,
        "arg": value_id,
        "subtreeDepth": DETAILS_SUBTREE_DEPTH,
        "isolateId": isolate_id,
    });
    rpc.request(ext::GET_DETAILS_SUBTREE, Some(params)).await
}

// ---------------------------------------------------------------------------
// Registered services
// ---------------------------------------------------------------------------

/// Hot reload through the `reloadSources` service registered by the Flutter
/// tool. `method` is the namespaced name announced in the `ServiceRegistered`
/// event (e.g. `"s0.reloadSources"`).
pub async fn reload_sources<R: VmRpc>(rpc: &R, method: &str, isolate_id: &str) -> Result<Value> {
    debug!("Requesting hot reload via {}", method);
    let params = json!({ "isolateId": isolate_id });
    rpc.request(method, Some(params)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls and answers every one with `{}`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl VmRpc for Recorder {
        async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            Ok(json!({}))
        }
    }

    impl Recorder {
        fn last(&self) -> (String, Value) {
            let calls = self.calls.lock().unwrap();
            let (method, params) = calls.last().cloned().unwrap();
            (method, params.unwrap())
        }
    }

    #[tokio::test]
    async fn test_summary_tree_uses_boolean_flags() {
        let rpc = Recorder::default();
        get_root_widget_summary_tree(&rpc, "isolates/1", "grp").await.unwrap();
        let (method, params) = rpc.last();
        assert_eq!(method, "ext.flutter.inspector.getRootWidgetSummaryTree");
        assert_eq!(
            params,
            json!({
                "objectGroup": "grp",
                "isSummaryTree": true,
                "withPreviews": true,
                "isolateId": "isolates/1"
            })
        );
    }

    #[tokio::test]
    async fn test_layout_explorer_node_params() {
        let rpc = Recorder::default();
        get_layout_explorer_node(&rpc, "isolates/1", "grp", "inspector-7")
            .await
            .unwrap();
        let (method, params) = rpc.last();
        assert_eq!(method, "ext.flutter.inspector.getLayoutExplorerNode");
        assert_eq!(
            params,
            json!({
                "id": "inspector-7",
                "groupName": "grp",
                "subtreeDepth": "1",
                "isolateId": "isolates/1"
            })
        );
    }

    #[tokio::test]
    async fn test_details_subtree_params() {
        let rpc = Recorder::default();
        get_details_subtree(&rpc, "isolates/1", "grp", "inspector-7")
            .await
            .unwrap();
        let (method, params) = rpc.last();
        assert_eq!(method, "ext.flutter.inspector.getDetailsSubtree");
        assert_eq!(
            params,
            json!({
                "objectGroup": "grp",
                "arg": "inspector-7",
                "subtreeDepth": "2",
                "isolateId": "isolates/1"
            })
        );
    }

    #[tokio::test]
    async fn test_priming_calls_params() {
        let rpc = Recorder::default();
        set_selection_by_id(&rpc, "isolates/1", "grp").await.unwrap();
        assert_eq!(
            rpc.last().1,
            json!({ "id": "0", "objectGroup": "grp", "isolateId": "isolates/1" })
        );

        get_selected_widget(&rpc, "isolates/1", "grp").await.unwrap();
        assert_eq!(
            rpc.last(),
            (
                "ext.flutter.inspector.getSelectedWidget".to_string(),
                json!({ "objectGroup": "grp", "isolateId": "isolates/1" })
            )
        );
    }

    #[tokio::test]
    async fn test_reload_sources_uses_registered_method() {
        let rpc = Recorder::default();
        reload_sources(&rpc, "s0.reloadSources", "isolates/1")
            .await
            .unwrap();
        assert_eq!(
            rpc.last(),
            (
                "s0.reloadSources".to_string(),
                json!({ "isolateId": "isolates/1" })
            )
        );
    }
}
