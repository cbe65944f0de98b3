//! # Diagnostics Tree
//!
//! Flutter's diagnostic/widget tree as returned by the VM Service inspector
//! extensions (`ext.flutter.inspector.*`) or by an injected crawler.
//!
//! The shape of these payloads varies with the node kind and the Flutter
//! version: node references show up under `children`, `properties`,
//! `renderObject`, `parentRenderElement` and friends. Rather than pinning a
//! struct to one shape, [`DiagnosticsNode`] wraps the JSON value tree and
//! walks it generically. Only a handful of field names carry meaning here:
//!
//! - `valueId`: inspector object reference, used as `id`/`arg` in follow-up calls
//! - `children`: ordered child nodes
//! - `type` / `properties`: used by asset embedding (`type == "Image"`)

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field holding the inspector object reference of a node.
pub const VALUE_ID_FIELD: &str = "valueId";

/// Field holding the ordered child nodes.
pub const CHILDREN_FIELD: &str = "children";

// ============================================================================
// DiagnosticsNode
// ============================================================================

/// A node in Flutter's diagnostic tree.
///
/// Serializes transparently as the underlying JSON, so writing a node to disk
/// and reading it back yields the same tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticsNode(Value);

impl DiagnosticsNode {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// This node's own `valueId`, if it is a string.
    pub fn value_id(&self) -> Option<&str> {
        self.0.get(VALUE_ID_FIELD).and_then(Value::as_str)
    }

    /// Direct children, or an empty slice when absent or not an array.
    pub fn children(&self) -> &[Value] {
        self.0
            .get(CHILDREN_FIELD)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Collect every `valueId` reachable from this node.
    ///
    /// Descends into every object and array, not only `children`, because
    /// references nest under different field names depending on node kind.
    /// Ids are deduplicated and returned in first-seen (pre-order) order.
    ///
    /// The walk uses an explicit stack: an owned value tree cannot contain
    /// cycles, and deep trees must not exhaust the call stack.
    pub fn collect_value_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut stack: Vec<&Value> = vec![&self.0];

        while let Some(value) = stack.pop() {
            match value {
                Value::Object(map) => {
                    if let Some(Value::String(id)) = map.get(VALUE_ID_FIELD) {
                        if seen.insert(id.as_str()) {
                            ids.push(id.clone());
                        }
                    }
                    // Reverse so that the first field is visited first.
                    let nested: Vec<&Value> = map.values().filter(|v| is_container(v)).collect();
                    stack.extend(nested.into_iter().rev());
                }
                Value::Array(items) => {
                    stack.extend(items.iter().filter(|v| is_container(v)).rev());
                }
                _ => {}
            }
        }

        ids
    }

    /// Count nodes reachable through `children` (including self).
    ///
    /// Returns 0 when the root is not an object.
    pub fn node_count(&self) -> usize {
        if !self.0.is_object() {
            return 0;
        }
        let mut count = 0;
        let mut stack: Vec<&Value> = vec![&self.0];
        while let Some(node) = stack.pop() {
            count += 1;
            if let Some(children) = node.get(CHILDREN_FIELD).and_then(Value::as_array) {
                stack.extend(children.iter().filter(|c| c.is_object()));
            }
        }
        count
    }
}

impl From<Value> for DiagnosticsNode {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}
