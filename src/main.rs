//! flutter-dump - Dump live Flutter UI layout through the Dart VM Service
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use url::Url;

use fdump_app::config::{init_config_dir, load_settings};
use fdump_app::{run_dump, DumpMode, DumpRequest, Target};
use fdump_core::prelude::{error, info};
use fdump_daemon::FlutterCommand;

/// flutter-dump - Dump live Flutter UI layout through the Dart VM Service
#[derive(Parser, Debug)]
#[command(name = "fdump")]
#[command(about = "Dump live Flutter UI layout through the Dart VM Service", long_about = None)]
struct Args {
    /// Path to Flutter project
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// What to extract
    #[arg(long, value_enum, default_value_t = ModeArg::Inspector)]
    mode: ModeArg,

    /// Attach to a running app's VM Service instead of launching one
    #[arg(long, value_name = "WS_URI")]
    uri: Option<String>,

    /// Crawler source injected in figma mode
    #[arg(long, value_name = "FILE")]
    crawler: Option<PathBuf>,

    /// Output directory (default depends on the mode)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Also crawl inspector details in figma mode
    #[arg(long)]
    details: bool,

    /// Write a default .fdump/config.toml and exit
    #[arg(long)]
    init: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Inspector,
    Figma,
}

impl From<ModeArg> for DumpMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Inspector => DumpMode::Inspector,
            ModeArg::Figma => DumpMode::Figma,
        }
    }
}

/// Turn what `flutter run` prints (`http://host:port/token=/`) into the
/// WebSocket endpoint (`ws://host:port/token=/ws`).
fn normalize_ws_uri(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw).map_err(|e| eyre!("invalid VM Service URI '{}': {}", raw, e))?;

    match url.scheme() {
        "http" | "ws" => {}
        // The client is built without TLS; the VM Service serves plain WebSocket.
        "https" | "wss" => {
            return Err(eyre!(
                "secure VM Service URIs are not supported, use the ws:// or http:// address: {}",
                raw
            ))
        }
        other => return Err(eyre!("unsupported VM Service URI scheme '{}'", other)),
    }
    url.set_scheme("ws")
        .map_err(|_| eyre!("cannot use scheme 'ws' for {}", raw))?;

    if !url.path().ends_with("/ws") {
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    Ok(url.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let args = Args::parse();

    let log_dir = fdump_core::logging::init(args.verbose)?;

    let cwd = std::env::current_dir()?;
    let base_path = args.path.unwrap_or_else(|| cwd.clone());
    let project_path = dunce::canonicalize(&base_path)
        .map_err(|e| eyre!("cannot open project {}: {}", base_path.display(), e))?;

    if args.init {
        let dir = init_config_dir(&project_path)?;
        eprintln!("Config written to {}", dir.join("config.toml").display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut settings = load_settings(&project_path);
    // Paths given on the command line are relative to the working directory.
    if let Some(crawler) = args.crawler {
        let crawler = dunce::canonicalize(&crawler)
            .map_err(|e| eyre!("cannot open crawler {}: {}", crawler.display(), e))?;
        settings.crawler.source = Some(crawler);
    }
    if args.details {
        settings.crawler.fetch_details = true;
    }

    let target = match args.uri.as_deref() {
        Some(raw) => Target::Attach {
            ws_uri: normalize_ws_uri(raw)?,
        },
        None => Target::Launch(FlutterCommand::resolve()),
    };

    let request = DumpRequest {
        project_path,
        mode: args.mode.into(),
        target,
        output_dir: args.out.map(|out| cwd.join(out)),
    };

    info!("Project: {}", request.project_path.display());

    // Dropping the dump future on Ctrl+C still restores sources and kills
    // the launched app through the guards it owns.
    let result = tokio::select! {
        result = run_dump(&request, &settings) => result,
        _ = tokio::signal::ctrl_c() => {
            error!("Interrupted");
            eprintln!("Interrupted.");
            eprintln!("Logs: {}", log_dir.display());
            return Ok(ExitCode::FAILURE);
        }
    };

    match result {
        Ok(outcome) => {
            eprintln!(
                "Dumped {} nodes to {}",
                outcome.node_count,
                outcome.output_dir.display()
            );
            for file in &outcome.files {
                eprintln!("  {}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Logs: {}", log_dir.display());
            Ok(ExitCode::FAILURE)
        }
    }
}
