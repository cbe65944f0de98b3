//! Figma mode: inject, attach, hot reload, evaluate, reconstruct, embed.

use serde_json::json;

use fdump_app::artifacts::files;
use fdump_app::inject::CRAWLER_FILE_NAME;
use fdump_app::{run_dump, DumpMode, DumpRequest, Target};
use fdump_core::Error;
use fdump_daemon::test_utils::MockVmService;

use super::support::*;

fn figma_request(project: &tempfile::TempDir, mock: &MockVmService) -> DumpRequest {
    DumpRequest {
        project_path: project.path().to_path_buf(),
        mode: DumpMode::Figma,
        target: Target::Attach {
            ws_uri: mock.ws_uri(),
        },
        output_dir: None,
    }
}

fn assert_sources_restored(project: &tempfile::TempDir) {
    assert_eq!(
        std::fs::read_to_string(project.path().join("lib/main.dart")).unwrap(),
        ORIGINAL_MAIN
    );
    assert!(!project.path().join("lib").join(CRAWLER_FILE_NAME).exists());
}

#[tokio::test]
async fn test_figma_dump_with_truncated_result_and_details() {
    let project = flutter_project();
    let layout = figma_layout().to_string();
    let mock = MockVmService::start(app_handler(layout.clone(), 5, 2)).await;
    mock.push(reload_service_registered());

    let mut settings = fast_settings();
    settings.crawler.source = Some(crawler_path());
    settings.crawler.fetch_details = true;

    let outcome = run_dump(&figma_request(&project, &mock), &settings)
        .await
        .unwrap();

    let out = project.path().join("flutter_figma_dump");
    assert_eq!(outcome.output_dir, out);
    assert_eq!(outcome.node_count, 3);

    // One evaluate in the crawler library, one follow-up for the full string.
    assert_eq!(mock.call_count("evaluate"), 1);
    assert_eq!(mock.call_count("getObject"), 1);
    let evaluate = mock
        .calls()
        .into_iter()
        .find(|c| c.method == "evaluate")
        .unwrap();
    assert_eq!(evaluate.params["targetId"], CRAWLER_LIBRARY_ID);
    assert_eq!(evaluate.params["expression"], "figmaExtractorEntryPoint()");

    // Attached targets are hot reloaded after injection.
    assert_eq!(mock.call_count("s0.reloadSources"), 1);

    let raw = std::fs::read_to_string(out.join(files::FIGMA_LAYOUT_RAW)).unwrap();
    assert_eq!(raw, layout);

    let parsed = read_json(out.join(files::FIGMA_LAYOUT));
    assert_eq!(parsed["children"][1]["properties"]["imageBase64"], "UE5H");

    // Two not-ready answers, then the tree.
    assert_eq!(
        mock.call_count("ext.flutter.inspector.getRootWidgetSummaryTree"),
        3
    );
    let layout_by_id = read_json(out.join(files::LAYOUT_BY_ID));
    let details_by_id = read_json(out.join(files::DETAILS_BY_ID));
    assert_eq!(layout_by_id.as_object().unwrap().len(), 5);
    assert_eq!(details_by_id.as_object().unwrap().len(), 5);
    assert_eq!(details_by_id["inspector-3"]["valueId"], "inspector-3");

    let success = std::fs::read_to_string(out.join(files::SUCCESS_LOG)).unwrap();
    assert!(success.contains("Node count: 3"));
    assert!(success.contains("Images: 1 embedded, 0 with errors"));
    assert!(outcome.files.contains(&out.join(files::SUCCESS_LOG)));

    assert_sources_restored(&project);
}

#[tokio::test]
async fn test_unparsable_payload_keeps_raw_artifact() {
    let project = flutter_project();
    let broken = r#"{"type": "Scaffold", "children": [{"type": "Text""#.to_string();
    let mock = MockVmService::start(app_handler(broken.clone(), 5, 0)).await;

    let mut settings = fast_settings();
    settings.crawler.source = Some(crawler_path());

    let err = run_dump(&figma_request(&project, &mock), &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ParseFailure { .. }));

    let out = project.path().join("flutter_figma_dump");
    let raw = std::fs::read_to_string(out.join(files::FIGMA_LAYOUT_RAW)).unwrap();
    assert!(!raw.is_empty());
    assert_eq!(raw, broken);

    let log = std::fs::read_to_string(out.join(files::ERROR_LOG)).unwrap();
    assert!(log.contains("JSON parse error"));
    assert!(!out.join(files::FIGMA_LAYOUT).exists());

    assert_sources_restored(&project);
}

#[tokio::test]
async fn test_crawler_reported_error_fails_dump() {
    let project = flutter_project();
    let payload = json!({
        "error": "No render tree",
        "hint": "Wait for the first frame",
    })
    .to_string();
    let mock = MockVmService::start(app_handler(payload, 5, 0)).await;

    let mut settings = fast_settings();
    settings.crawler.source = Some(crawler_path());

    let err = run_dump(&figma_request(&project, &mock), &settings)
        .await
        .unwrap_err();
    match err {
        Error::CrawlerReported { message } => {
            assert!(message.contains("No render tree"));
            assert!(message.contains("hint: Wait for the first frame"));
        }
        other => panic!("expected CrawlerReported, got {:?}", other),
    }

    assert_sources_restored(&project);
}

#[tokio::test]
async fn test_missing_reload_service_is_not_fatal() {
    let project = flutter_project();
    let mock = MockVmService::start(app_handler(figma_layout().to_string(), 5, 0)).await;

    let mut settings = fast_settings();
    settings.crawler.source = Some(crawler_path());

    let outcome = run_dump(&figma_request(&project, &mock), &settings)
        .await
        .unwrap();
    assert_eq!(outcome.node_count, 3);
    assert_eq!(mock.call_count("streamListen"), 1);
    assert_eq!(mock.call_count("s0.reloadSources"), 0);

    // Without --details the inspector is never touched.
    assert_eq!(
        mock.call_count("ext.flutter.inspector.getRootWidgetSummaryTree"),
        0
    );
    assert_sources_restored(&project);
}
