//! Figma pipeline: evaluate the injected crawler and post-process its JSON.

use std::path::Path;

use chrono::Local;
use serde_json::Value;

use fdump_core::json::parse_value;
use fdump_core::prelude::*;
use fdump_core::DiagnosticsNode;
use fdump_daemon::vm_service::{evaluate, get_isolate, resolve_string, LibraryRef};

use super::inspector::fetch_tree_and_details;
use crate::artifacts::{error_offset, files, parse_error_report, success_report, DumpDir};
use crate::assets::embed;
use crate::config::Settings;
use crate::inject::CRAWLER_FILE_NAME;
use crate::session::Session;

/// Library URIs logged when the crawler library is not found.
const LIBRARY_LISTING_LIMIT: usize = 10;

/// Pick the crawler library: an exact file match first, then any URI
/// containing `hint`.
pub fn find_crawler_library<'a>(libraries: &'a [LibraryRef], hint: &str) -> Option<&'a LibraryRef> {
    libraries
        .iter()
        .find(|lib| lib.uri.ends_with(CRAWLER_FILE_NAME))
        .or_else(|| libraries.iter().find(|lib| lib.uri.contains(hint)))
}

fn log_available_libraries(libraries: &[LibraryRef]) {
    info!("Available libraries:");
    for lib in libraries.iter().take(LIBRARY_LISTING_LIMIT) {
        info!("  - {}", lib.uri);
    }
    if libraries.len() > LIBRARY_LISTING_LIMIT {
        info!("  ... and {} more", libraries.len() - LIBRARY_LISTING_LIMIT);
    }
}

/// Evaluate the crawler entry point, in its library when known.
async fn evaluate_entry_point(session: &Session, settings: &Settings) -> Result<Value> {
    let isolate_id = session.isolate_id();
    let crawler = &settings.crawler;

    let isolate = get_isolate(session, isolate_id).await?;
    let library = find_crawler_library(&isolate.libraries, &crawler.library_hint);
    match library {
        Some(lib) => info!("Found crawler library {} ({})", lib.uri, lib.id),
        None => {
            warn!(
                "Crawler library matching '{}' not found; evaluating in the root library",
                crawler.library_hint
            );
            log_available_libraries(&isolate.libraries);
        }
    }

    tokio::time::sleep(crawler.settle_delay()).await;

    info!("Evaluating {}", crawler.entry_expression);
    if let Some(lib) = library {
        match evaluate(session, isolate_id, Some(&lib.id), &crawler.entry_expression).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => warn!("Evaluation in {} failed, retrying without target: {}", lib.uri, e),
        }
    }

    evaluate(session, isolate_id, None, &crawler.entry_expression)
        .await
        .map_err(|e| {
            error!(
                "Could not evaluate {}; is the crawler compiled into the app? {}",
                crawler.entry_expression, e
            );
            e
        })
}

/// Parse the crawler payload, writing `error_log.txt` on failure.
fn parse_payload(raw: &str, dir: &mut DumpDir) -> Result<Value> {
    match parse_value(raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            let message = e.to_string();
            let offset = error_offset(raw, e.line(), e.column());
            let log = dir.write_text(files::ERROR_LOG, &parse_error_report(raw, &message, offset))?;
            error!(
                "Crawler output is not valid JSON ({} chars), details in {}",
                raw.chars().count(),
                log.display()
            );
            Err(Error::ParseFailure { message, offset })
        }
    }
}

/// Turn a crawler-side `{ "error": ... }` payload into an error.
pub fn crawler_error(payload: &Value) -> Option<Error> {
    let error = payload.get("error").filter(|v| !v.is_null())?;

    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut message = text(error);
    for (key, label) in [("debug", "debug"), ("hint", "hint")] {
        if let Some(value) = payload.get(key).filter(|v| !v.is_null()) {
            message.push_str(&format!("\n{}: {}", label, text(value)));
        }
    }
    if let Some(stack) = payload.get("stackTrace").filter(|v| !v.is_null()) {
        message.push_str(&format!("\n\nstack trace:\n{}", text(stack)));
    }

    Some(Error::CrawlerReported { message })
}

/// Run the figma dump. Returns the node count of the crawler tree.
pub async fn run(
    session: &Session,
    settings: &Settings,
    project_root: &Path,
    dir: &mut DumpDir,
) -> Result<usize> {
    let result = evaluate_entry_point(session, settings).await?;
    let resolved = resolve_string(session, session.isolate_id(), &result).await?;
    if !resolved.complete {
        warn!("Crawler output may be truncated; parsing best-effort value");
    }
    let raw = resolved.value;
    info!("Crawler output: {} chars", raw.chars().count());

    // Persisted before parsing so a bad payload can still be inspected.
    dir.write_text(files::FIGMA_LAYOUT_RAW, &raw)?;

    let mut payload = parse_payload(&raw, dir)?;
    if let Some(e) = crawler_error(&payload) {
        return Err(e);
    }

    let images = embed(&mut payload, project_root, settings.assets.max_bytes);
    let layout = DiagnosticsNode::new(payload);
    dir.write_json(files::FIGMA_LAYOUT, &layout)?;

    if settings.crawler.fetch_details {
        fetch_tree_and_details(session, settings, dir).await?;
    }

    let node_count = layout.node_count();
    let mut listed = dir.written().to_vec();
    listed.push(dir.path().join(files::SUCCESS_LOG));
    dir.write_text(
        files::SUCCESS_LOG,
        &success_report(Local::now(), raw.chars().count(), node_count, &images, &listed),
    )?;

    info!("Crawler tree has {} nodes", node_count);
    Ok(node_count)
}
