//! Tree discovery and per-node detail fetch
//!
//! Every `valueId` in the summary tree is an inspector reference. For each
//! one the crawl fetches layout explorer data and a details subtree, one node
//! at a time. Remote failures only drop that entry; losing the connection
//! ends the crawl with whatever was gathered.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use fdump_core::prelude::*;
use fdump_core::DiagnosticsNode;
use fdump_daemon::vm_service::{get_details_subtree, get_layout_explorer_node, VmRpc};

/// Result of a detail crawl.
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// Every id discovered in the tree, first-seen order.
    pub node_ids: Vec<String>,
    pub layout_by_id: BTreeMap<String, Value>,
    pub details_by_id: BTreeMap<String, Value>,
    /// Set when a connection failure stopped the crawl early.
    pub interrupted: Option<Error>,
}

impl CrawlReport {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    /// Ids for which at least one fetch failed or never ran.
    pub fn missing_ids(&self) -> Vec<&str> {
        self.node_ids
            .iter()
            .filter(|id| !self.layout_by_id.contains_key(*id) || !self.details_by_id.contains_key(*id))
            .map(String::as_str)
            .collect()
    }
}

/// Settings for [`discover_and_fetch`].
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub object_group: String,
    /// Pause between nodes.
    pub node_delay: Duration,
}

/// Collect every `valueId` in `root` and fetch layout and details for each.
///
/// Never fails as a whole: check [`CrawlReport::interrupted`].
pub async fn discover_and_fetch<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    root: &DiagnosticsNode,
    options: &CrawlOptions,
) -> CrawlReport {
    let node_ids = root.collect_value_ids();
    info!("Discovered {} inspector node ids", node_ids.len());

    let mut report = CrawlReport {
        node_ids,
        ..Default::default()
    };

    for (index, id) in report.node_ids.iter().enumerate() {
        if index > 0 && !options.node_delay.is_zero() {
            tokio::time::sleep(options.node_delay).await;
        }
        debug!("Fetching details for {} ({}/{})", id, index + 1, report.node_ids.len());

        match get_layout_explorer_node(rpc, isolate_id, &options.object_group, id).await {
            Ok(layout) => {
                report.layout_by_id.insert(id.clone(), layout);
            }
            Err(e) if e.is_connection_error() => {
                report.interrupted = Some(e);
                break;
            }
            Err(e) => warn!("getLayoutExplorerNode({}) failed: {}", id, e),
        }

        match get_details_subtree(rpc, isolate_id, &options.object_group, id).await {
            Ok(details) => {
                report.details_by_id.insert(id.clone(), details);
            }
            Err(e) if e.is_connection_error() => {
                report.interrupted = Some(e);
                break;
            }
            Err(e) => warn!("getDetailsSubtree({}) failed: {}", id, e),
        }
    }

    match &report.interrupted {
        Some(e) => warn!(
            "Detail crawl interrupted after {} layout / {} details entries: {}",
            report.layout_by_id.len(),
            report.details_by_id.len(),
            e
        ),
        None => info!(
            "Detail crawl finished: {} layout / {} details entries",
            report.layout_by_id.len(),
            report.details_by_id.len()
        ),
    }

    report
}
