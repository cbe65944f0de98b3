//! Inspector mode: poll for readiness, crawl every node, merge.

use fdump_app::artifacts::files;
use fdump_app::inject::CRAWLER_FILE_NAME;
use fdump_app::{run_dump, DumpMode, DumpRequest, Target};
use fdump_core::Error;
use fdump_daemon::test_utils::{MockReply, MockVmService};

use super::support::*;

#[tokio::test]
async fn test_inspector_dump_crawls_every_node() {
    let project = flutter_project();
    let mock = MockVmService::start(app_handler(String::new(), 5, 1)).await;

    let request = DumpRequest {
        project_path: project.path().to_path_buf(),
        mode: DumpMode::Inspector,
        target: Target::Attach {
            ws_uri: mock.ws_uri(),
        },
        output_dir: Some("custom_out".into()),
    };

    let outcome = run_dump(&request, &fast_settings()).await.unwrap();
    let out = project.path().join("custom_out");
    assert_eq!(outcome.output_dir, out);
    assert_eq!(outcome.node_count, 5);

    assert_eq!(
        mock.call_count("ext.flutter.inspector.getLayoutExplorerNode"),
        5
    );
    assert_eq!(mock.call_count("ext.flutter.inspector.getDetailsSubtree"), 5);
    assert_eq!(mock.call_count("ext.flutter.inspector.setSelectionById"), 1);

    let design = read_json(out.join(files::FULL_DESIGN));
    assert_eq!(design["isolateId"], ISOLATE_ID);
    assert_eq!(design["nodeCount"], 5);
    assert_eq!(design["summaryTree"]["valueId"], "inspector-0");
    assert_eq!(design["layoutById"].as_object().unwrap().len(), 5);
    assert_eq!(design["detailsById"].as_object().unwrap().len(), 5);
    assert!(out.join(files::SUMMARY_TREE).exists());

    // No injection and no reload outside figma mode.
    assert_eq!(mock.call_count("streamListen"), 0);
    assert_eq!(mock.call_count("evaluate"), 0);
    assert_eq!(
        std::fs::read_to_string(project.path().join("lib/main.dart")).unwrap(),
        ORIGINAL_MAIN
    );
    assert!(!project.path().join("lib").join(CRAWLER_FILE_NAME).exists());
}

#[tokio::test]
async fn test_app_that_never_becomes_ready_times_out() {
    let project = flutter_project();
    let mock = MockVmService::start(app_handler(String::new(), 5, usize::MAX)).await;

    let mut settings = fast_settings();
    settings.inspector.ready_max_attempts = 3;

    let request = DumpRequest {
        project_path: project.path().to_path_buf(),
        mode: DumpMode::Inspector,
        target: Target::Attach {
            ws_uri: mock.ws_uri(),
        },
        output_dir: None,
    };

    let err = run_dump(&request, &settings).await.unwrap_err();
    assert!(matches!(err, Error::StabilizationTimeout { attempts: 3 }));
    assert_eq!(
        mock.call_count("ext.flutter.inspector.getRootWidgetSummaryTree"),
        3
    );
    assert!(!project
        .path()
        .join("flutter_inspector_dump")
        .join(files::SUMMARY_TREE)
        .exists());
}

#[tokio::test]
async fn test_lost_connection_keeps_partial_maps() {
    let project = flutter_project();
    let app = app_handler(String::new(), 5, 0);
    let mock = MockVmService::start(move |method, params| {
        if method == "ext.flutter.inspector.getDetailsSubtree" && params["arg"] == "inspector-2" {
            MockReply::Close
        } else {
            app(method, params)
        }
    })
    .await;

    let request = DumpRequest {
        project_path: project.path().to_path_buf(),
        mode: DumpMode::Inspector,
        target: Target::Attach {
            ws_uri: mock.ws_uri(),
        },
        output_dir: None,
    };

    let err = run_dump(&request, &fast_settings()).await.unwrap_err();
    assert!(matches!(err, Error::ChannelClosed), "got {:?}", err);

    let out = project.path().join("flutter_inspector_dump");
    let layout = read_json(out.join(files::LAYOUT_BY_ID));
    let details = read_json(out.join(files::DETAILS_BY_ID));
    let layout = layout.as_object().unwrap();
    let details = details.as_object().unwrap();

    assert_eq!(layout.len(), 3);
    assert!(layout.contains_key("inspector-2"));
    assert_eq!(details.len(), 2);
    assert!(details.contains_key("inspector-1"));
    assert!(!details.contains_key("inspector-2"));

    assert!(out.join(files::SUMMARY_TREE).exists());
    assert!(!out.join(files::FULL_DESIGN).exists());
}
