//! Inspector pipeline: summary tree, per-node details, merged design document.

use chrono::Local;
use serde_json::json;

use fdump_core::prelude::*;
use fdump_core::DiagnosticsNode;
use fdump_daemon::vm_service::{get_root_widget_summary_tree, get_selected_widget, set_selection_by_id};

use crate::artifacts::{files, DumpDir};
use crate::config::Settings;
use crate::crawl::{discover_and_fetch, CrawlOptions, CrawlReport};
use crate::poller::wait_for_ready;
use crate::session::Session;

/// Touch the inspector selection so its object group bookkeeping exists.
/// Failures are expected on some Flutter versions and ignored.
async fn prime_inspector(session: &Session, object_group: &str) {
    let isolate_id = session.isolate_id();
    if let Err(e) = set_selection_by_id(session, isolate_id, object_group).await {
        debug!("setSelectionById(0) failed (ignored): {}", e);
    }
    if let Err(e) = get_selected_widget(session, isolate_id, object_group).await {
        debug!("getSelectedWidget failed (ignored): {}", e);
    }
}

/// Fetch the summary tree once the app is ready and crawl every node.
///
/// `summary_tree.json` is written before discovery starts, and both per-id
/// maps are written even when the crawl was interrupted; the interruption is
/// returned as the error afterwards.
pub async fn fetch_tree_and_details(
    session: &Session,
    settings: &Settings,
    dir: &mut DumpDir,
) -> Result<(DiagnosticsNode, CrawlReport)> {
    let inspector = &settings.inspector;
    let isolate_id = session.isolate_id();

    prime_inspector(session, &inspector.object_group).await;
    tokio::time::sleep(inspector.settle_delay()).await;

    let tree = wait_for_ready(
        || get_root_widget_summary_tree(session, isolate_id, &inspector.object_group),
        inspector.ready_max_attempts,
        inspector.ready_interval(),
    )
    .await?;
    dir.write_json(files::SUMMARY_TREE, &tree)?;

    let options = CrawlOptions {
        object_group: inspector.object_group.clone(),
        node_delay: inspector.node_delay(),
    };
    let mut report = discover_and_fetch(session, isolate_id, &tree, &options).await;

    dir.write_json(files::LAYOUT_BY_ID, &report.layout_by_id)?;
    dir.write_json(files::DETAILS_BY_ID, &report.details_by_id)?;

    if let Some(e) = report.interrupted.take() {
        return Err(e);
    }
    Ok((tree, report))
}

/// Run the inspector dump. Returns the number of crawled nodes.
pub async fn run(session: &Session, settings: &Settings, dir: &mut DumpDir) -> Result<usize> {
    let (tree, report) = fetch_tree_and_details(session, settings, dir).await?;

    let missing = report.missing_ids();
    if !missing.is_empty() {
        warn!("{} node(s) have incomplete details", missing.len());
    }

    let document = json!({
        "generatedAt": Local::now().to_rfc3339(),
        "isolateId": session.isolate_id(),
        "nodeCount": report.node_ids.len(),
        "summaryTree": tree,
        "layoutById": report.layout_by_id,
        "detailsById": report.details_by_id,
    });
    dir.write_json(files::FULL_DESIGN, &document)?;

    Ok(report.node_ids.len())
}
