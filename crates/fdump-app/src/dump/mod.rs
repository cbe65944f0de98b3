//! Dump orchestration
//!
//! [`run_dump`] wires the pieces together for one extraction:
//!
//! 1. figma mode: inject the crawler source (before launching, so it is compiled in)
//! 2. launch `flutter run --machine`, or attach to a given VM Service URI
//! 3. connect a [`Session`]
//! 4. figma mode + attach: hot reload so the injected source is picked up
//! 5. run the [`inspector`] or [`figma`] pipeline into the output directory
//! 6. tear everything down again, whatever happened
//!
//! Teardown also runs through `Drop` if the returned future is cancelled:
//! [`InjectionGuard`] restores sources and `FlutterProcess` kills the child.

pub mod figma;
pub mod inspector;

use std::path::{Path, PathBuf};

use fdump_core::prelude::*;
use fdump_daemon::{launch, FlutterCommand, LaunchedApp};

use crate::artifacts::DumpDir;
use crate::config::{DumpMode, Settings};
use crate::inject::{inject, InjectionGuard};
use crate::session::Session;

/// Where the VM Service comes from.
#[derive(Debug, Clone)]
pub enum Target {
    /// Start the app with `flutter run --machine`.
    Launch(FlutterCommand),
    /// Use an already running app.
    Attach { ws_uri: String },
}

/// One dump invocation.
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub project_path: PathBuf,
    pub mode: DumpMode,
    pub target: Target,
    /// Overrides the mode's default output directory.
    pub output_dir: Option<PathBuf>,
}

impl DumpRequest {
    /// Resolved output directory; relative paths are taken from the project.
    pub fn output_dir(&self, settings: &Settings) -> PathBuf {
        match &self.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_path.join(dir),
            None => self
                .project_path
                .join(settings.output.dir_for(self.mode)),
        }
    }
}

/// What a successful dump produced.
#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub mode: DumpMode,
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub node_count: usize,
}

/// Everything that must be released at the end of a dump.
#[derive(Default)]
struct Resources {
    injection: Option<InjectionGuard>,
    app: Option<LaunchedApp>,
    session: Option<Session>,
}

impl Resources {
    /// Close the connection, restore sources, stop the app. Idempotent.
    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        if let Some(mut guard) = self.injection.take() {
            if let Err(e) = guard.cleanup() {
                error!("Failed to restore injected sources: {}", e);
            }
        }
        if let Some(mut app) = self.app.take() {
            app.stop().await;
        }
    }
}

/// Read the crawler source named by the settings, relative to the project.
fn read_crawler_source(project_path: &Path, settings: &Settings) -> Result<String> {
    let Some(source) = settings.crawler.source.as_ref() else {
        return Err(Error::config(
            "figma mode needs a crawler source (--crawler or [crawler].source)",
        ));
    };
    let path = if source.is_absolute() {
        source.clone()
    } else {
        project_path.join(source)
    };
    std::fs::read_to_string(&path)
        .map_err(|e| Error::config(format!("cannot read crawler {}: {}", path.display(), e)))
}

/// Run one dump from start to teardown.
pub async fn run_dump(request: &DumpRequest, settings: &Settings) -> Result<DumpOutcome> {
    info!(
        "Starting {} dump of {}",
        request.mode,
        request.project_path.display()
    );

    let mut resources = Resources::default();
    let result = run_with(request, settings, &mut resources).await;
    resources.teardown().await;

    match &result {
        Ok(outcome) => info!(
            "Dump finished: {} nodes, {} files in {}",
            outcome.node_count,
            outcome.files.len(),
            outcome.output_dir.display()
        ),
        Err(e) => error!("Dump failed: {}", e),
    }
    result
}

async fn run_with(
    request: &DumpRequest,
    settings: &Settings,
    resources: &mut Resources,
) -> Result<DumpOutcome> {
    let project_path = request.project_path.as_path();

    if request.mode == DumpMode::Figma {
        let source = read_crawler_source(project_path, settings)?;
        resources.injection = Some(inject(project_path, &source)?);
    }

    let ws_uri = match &request.target {
        Target::Launch(command) => {
            let app = launch(
                command,
                project_path,
                settings.connection.debug_port_timeout(),
            )
            .await?;
            let ws_uri = app.ws_uri.clone();
            resources.app = Some(app);
            ws_uri
        }
        Target::Attach { ws_uri } => ws_uri.clone(),
    };

    let session = resources.session.insert(
        Session::connect_with_limit(&ws_uri, settings.connection.max_message_bytes()).await?,
    );

    if request.mode == DumpMode::Figma && matches!(request.target, Target::Attach { .. }) {
        match session.hot_reload(settings.connection.service_wait()).await {
            Ok(true) => tokio::time::sleep(settings.crawler.hot_reload_delay()).await,
            Ok(false) => {}
            Err(e) => warn!("Hot reload failed (continuing): {}", e),
        }
    }

    let output_dir = request.output_dir(settings);
    let mut dir = DumpDir::create(&output_dir)?;

    let outcome = match request.mode {
        DumpMode::Inspector => inspector::run(session, settings, &mut dir).await,
        DumpMode::Figma => figma::run(session, settings, project_path, &mut dir).await,
    };

    if outcome.is_err() && !dir.written().is_empty() {
        info!(
            "Partial results kept in {}: {} file(s)",
            dir.path().display(),
            dir.written().len()
        );
    }

    Ok(DumpOutcome {
        mode: request.mode,
        output_dir,
        files: dir.written().to_vec(),
        node_count: outcome?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(output_dir: Option<PathBuf>) -> DumpRequest {
        DumpRequest {
            project_path: PathBuf::from("/work/app"),
            mode: DumpMode::Figma,
            target: Target::Attach {
                ws_uri: "ws://127.0.0.1:1/ws".to_string(),
            },
            output_dir,
        }
    }

    #[test]
    fn test_output_dir_resolution() {
        let settings = Settings::default();
        assert_eq!(
            request(None).output_dir(&settings),
            PathBuf::from("/work/app/flutter_figma_dump")
        );
        assert_eq!(
            request(Some(PathBuf::from("out"))).output_dir(&settings),
            PathBuf::from("/work/app/out")
        );
    }

    #[test]
    fn test_figma_mode_requires_crawler_source() {
        let err = read_crawler_source(Path::new("/work/app"), &Settings::default()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_failed_connect_restores_injected_sources() {
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("lib")).unwrap();
        std::fs::write(project.path().join("lib/main.dart"), "void main() {}\n").unwrap();
        std::fs::write(project.path().join("crawler.dart"), "// crawler\n").unwrap();

        let mut settings = Settings::default();
        settings.crawler.source = Some(PathBuf::from("crawler.dart"));

        let request = DumpRequest {
            project_path: project.path().to_path_buf(),
            mode: DumpMode::Figma,
            target: Target::Attach {
                ws_uri: "ws://127.0.0.1:9/ws".to_string(),
            },
            output_dir: None,
        };

        let err = run_dump(&request, &settings).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(
            std::fs::read_to_string(project.path().join("lib/main.dart")).unwrap(),
            "void main() {}\n"
        );
        assert!(!project.path().join("lib/figma_temp_crawler.dart").exists());
    }
}
