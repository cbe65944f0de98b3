//! Flutter process management
//!
//! Launches `flutter run --machine`, waits for the `app.debugPort` event that
//! carries the VM Service WebSocket URI, and stops the app again at session end.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use super::protocol::parse_daemon_message;
use fdump_core::events::{DaemonEvent, DaemonMessage};
use fdump_core::prelude::*;

/// Capacity of the stdout/stderr/exit event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown()` waits after `app.stop` before killing the process.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request id used for the single `app.stop` we ever send.
const STOP_REQUEST_ID: u64 = 1;

// ─────────────────────────────────────────────────────────
// Flutter executable resolution
// ─────────────────────────────────────────────────────────

/// The executable (plus any leading arguments) used to run `flutter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlutterCommand {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl FlutterCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before `run --machine` (e.g. a script path when the
    /// program is a shell).
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Locate the Flutter executable.
    ///
    /// Resolution order:
    /// 1. `$FLUTTER_ROOT/bin/flutter`
    /// 2. `$FLUTTER_HOME/bin/flutter`
    /// 3. `flutter` found on `PATH`
    /// 4. the bare name `flutter`, left for the OS to resolve
    ///
    /// On Windows the SDK script is `flutter.bat`.
    pub fn resolve() -> Self {
        for var in ["FLUTTER_ROOT", "FLUTTER_HOME"] {
            let Some(root) = std::env::var_os(var).filter(|v| !v.is_empty()) else {
                continue;
            };
            let candidate = PathBuf::from(root).join("bin").join(flutter_script_name());
            if candidate.is_file() {
                debug!("Using Flutter from {}: {}", var, candidate.display());
                return Self::new(dunce::simplified(&candidate).to_path_buf());
            }
            warn!(
                "{} is set but {} does not exist; falling back to PATH",
                var,
                candidate.display()
            );
        }

        match which::which(flutter_script_name()) {
            Ok(path) => {
                debug!("Using Flutter from PATH: {}", path.display());
                Self::new(path)
            }
            Err(_) => Self::new(flutter_script_name()),
        }
    }
}

fn flutter_script_name() -> &'static str {
    if cfg!(windows) {
        "flutter.bat"
    } else {
        "flutter"
    }
}

// ─────────────────────────────────────────────────────────
// FlutterProcess
// ─────────────────────────────────────────────────────────

/// Manages a Flutter child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background task that
/// calls `child.wait()` and emits `DaemonEvent::Exited` with the real exit code.
/// `FlutterProcess` keeps a kill channel, an atomic exit flag for synchronous
/// checks, and a [`Notify`] that `shutdown()` awaits for a graceful exit.
pub struct FlutterProcess {
    /// Sender for stdin commands
    stdin_tx: mpsc::Sender<String>,
    /// Process ID for logging
    pid: Option<u32>,
    /// Tells the wait task to force-kill the process. Consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
}

impl FlutterProcess {
    /// Spawn `flutter run --machine` in `project_path`.
    ///
    /// Stdout/stderr lines and the final exit are delivered to `event_tx`.
    pub fn spawn(
        command: &FlutterCommand,
        project_path: &Path,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Result<Self> {
        let pubspec = project_path.join("pubspec.yaml");
        if !pubspec.exists() {
            return Err(Error::NoProject {
                path: project_path.to_path_buf(),
            });
        }

        let mut args = command.leading_args.clone();
        args.extend(["run".to_string(), "--machine".to_string()]);

        info!(
            "Spawning Flutter: {} {}",
            command.program.display(),
            args.join(" ")
        );

        let child = Command::new(&command.program)
            .args(&args)
            .current_dir(project_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::FlutterNotFound
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        Self::from_child(child, event_tx)
    }

    /// Wire the stdio tasks and the wait task around a freshly spawned child.
    fn from_child(mut child: Child, event_tx: mpsc::Sender<DaemonEvent>) -> Result<Self> {
        let pid = child.id();
        info!("Flutter process started with PID: {:?}", pid);

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::ProcessSpawn {
                reason: "child stdio was not captured".to_string(),
            });
        };

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(8);
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx));
        tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));
        tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            stdin_tx,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `DaemonEvent::Exited`.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<DaemonEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Flutter process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for Flutter process: {}", e);
                        None
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing Flutter process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill Flutter process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Flag first so has_exited() is true before the event is observed.
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        let _ = event_tx.send(DaemonEvent::Exited { code }).await;
    }

    async fn stdout_reader(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<DaemonEvent>) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stdout: {}", line);
            if tx.send(DaemonEvent::Stdout(line)).await.is_err() {
                debug!("stdout channel closed");
                break;
            }
        }

        debug!("stdout reader finished");
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<DaemonEvent>) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stderr: {}", line);
            if tx.send(DaemonEvent::Stderr(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("stderr reader finished");
    }

    async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(command) = rx.recv().await {
            debug!("Sending to daemon: {}", command);

            if let Err(e) = stdin.write_all(command.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        debug!("stdin writer finished");
    }

    /// Send a JSON-RPC command (wrapped in brackets as the daemon expects)
    pub async fn send_json(&self, json: &str) -> Result<()> {
        self.stdin_tx
            .send(format!("[{}]", json))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Stop the app and make sure the process is gone.
    ///
    /// 1. Return early if the process already exited
    /// 2. Send `app.stop` when the app id is known
    /// 3. Wait up to 2s for a graceful exit
    /// 4. Force-kill otherwise
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&mut self, app_id: Option<&str>) {
        if self.has_exited() {
            debug!("Flutter process already exited, skipping shutdown");
            return;
        }

        info!("Stopping Flutter process");

        if let Some(app_id) = app_id {
            let stop = serde_json::json!({
                "id": STOP_REQUEST_ID,
                "method": "app.stop",
                "params": { "appId": app_id },
            });
            if let Err(e) = self.send_json(&stop.to_string()).await {
                warn!("Failed to send app.stop (continuing): {}", e);
            }
        }

        // Create the future before the last check so a notification can't slip through.
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        if self.has_exited() {
            info!("Flutter process exited gracefully");
            return;
        }

        match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, notified).await {
            Ok(()) => info!("Flutter process exited gracefully"),
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill();
            }
        }
    }

    fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Non-blocking check backed by the flag the wait task sets.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for FlutterProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("FlutterProcess dropped while process may still be running");
            self.force_kill();
        }
    }
}

// ─────────────────────────────────────────────────────────
// Launch: spawn + wait for the debug port
// ─────────────────────────────────────────────────────────

/// A running app whose VM Service URI is known.
pub struct LaunchedApp {
    pub process: FlutterProcess,
    pub ws_uri: String,
    pub app_id: String,
}

impl LaunchedApp {
    /// `app.stop`, then kill if needed.
    pub async fn stop(&mut self) {
        let app_id = self.app_id.clone();
        self.process.shutdown(Some(&app_id)).await;
    }
}

/// Spawn `flutter run --machine` and wait for its VM Service URI.
///
/// Output after the debug port is reported keeps being drained and logged in
/// the background so the child never blocks on a full pipe.
pub async fn launch(
    command: &FlutterCommand,
    project_path: &Path,
    debug_port_timeout: Duration,
) -> Result<LaunchedApp> {
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut process = FlutterProcess::spawn(command, project_path, event_tx)?;

    match wait_for_debug_port(&mut event_rx, debug_port_timeout).await {
        Ok((app_id, ws_uri)) => {
            info!("VM Service available at {}", ws_uri);
            tokio::spawn(drain_events(event_rx));
            Ok(LaunchedApp {
                process,
                ws_uri,
                app_id,
            })
        }
        Err(e) => {
            process.shutdown(None).await;
            Err(e)
        }
    }
}

/// Consume daemon events until the first `app.debugPort`, returning
/// `(app_id, ws_uri)`.
///
/// # Errors
///
/// - [`Error::DebugPortTimeout`] when nothing arrives within `timeout`
/// - [`Error::Protocol`] when the event has no `wsUri` or the app stops first
/// - [`Error::ProcessSpawn`] when the process exits first
pub async fn wait_for_debug_port(
    event_rx: &mut mpsc::Receiver<DaemonEvent>,
    timeout: Duration,
) -> Result<(String, String)> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let event = match tokio::time::timeout_at(deadline, event_rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(Error::ProcessSpawn {
                    reason: "flutter output closed before a debug port was reported".to_string(),
                })
            }
            Err(_) => {
                return Err(Error::DebugPortTimeout {
                    secs: timeout.as_secs(),
                })
            }
        };

        match event {
            DaemonEvent::Stdout(line) => match parse_daemon_message(&line) {
                Some(DaemonMessage::AppDebugPort(port)) => {
                    return match port.ws_uri {
                        Some(ws_uri) => Ok((port.app_id, ws_uri)),
                        None => Err(Error::protocol("app.debugPort event has no wsUri")),
                    };
                }
                Some(DaemonMessage::AppStop(stop)) => {
                    return Err(Error::protocol(format!(
                        "App stopped before reporting a debug port: {}",
                        stop.error.unwrap_or_else(|| "no error given".to_string())
                    )));
                }
                Some(message) => debug!("{}", message.summary()),
                None => debug!("flutter: {}", line),
            },
            DaemonEvent::Stderr(line) => warn!("flutter stderr: {}", line),
            DaemonEvent::Exited { code } => {
                return Err(Error::ProcessSpawn {
                    reason: format!(
                        "flutter run exited with code {:?} before reporting a debug port",
                        code
                    ),
                });
            }
        }
    }
}

/// Log the remaining output of a running app.
async fn drain_events(mut event_rx: mpsc::Receiver<DaemonEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            DaemonEvent::Stdout(line) => match parse_daemon_message(&line) {
                Some(message) => debug!("{}", message.summary()),
                None => trace!("flutter: {}", line),
            },
            DaemonEvent::Stderr(line) => warn!("flutter stderr: {}", line),
            DaemonEvent::Exited { code } => {
                info!("Flutter process exited with code {:?}", code);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn flutter_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pubspec.yaml"), "name: demo\n").unwrap();
        dir
    }

    /// A fake `flutter` implemented as a shell script run through `sh`.
    fn fake_flutter(dir: &Path, body: &str) -> FlutterCommand {
        let script = dir.join("fake_flutter.sh");
        std::fs::write(&script, body).unwrap();
        FlutterCommand::new("sh").with_leading_args(vec![script.display().to_string()])
    }

    fn spawn_sh(script: &str, event_tx: mpsc::Sender<DaemonEvent>) -> FlutterProcess {
        let child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("sh must be available in test environment");
        FlutterProcess::from_child(child, event_tx).unwrap()
    }

    async fn next_exit_code(rx: &mut mpsc::Receiver<DaemonEvent>) -> Option<Option<i32>> {
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(DaemonEvent::Exited { code })) => return Some(code),
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(_) => continue,
            }
        }
        None
    }

    #[tokio::test]
    async fn test_spawn_no_project() {
        let (tx, _rx) = mpsc::channel(16);
        let result = FlutterProcess::spawn(
            &FlutterCommand::new("flutter"),
            Path::new("/nonexistent/path"),
            tx,
        );
        assert!(matches!(result, Err(Error::NoProject { .. })));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_is_flutter_not_found() {
        let project = flutter_project();
        let (tx, _rx) = mpsc::channel(16);
        let result = FlutterProcess::spawn(
            &FlutterCommand::new("/definitely/not/here/flutter"),
            project.path(),
            tx,
        );
        assert!(matches!(result, Err(Error::FlutterNotFound)));
    }

    #[tokio::test]
    async fn test_exit_code_captured() {
        let (tx, mut rx) = mpsc::channel(16);
        let process = spawn_sh("exit 42", tx);

        assert_eq!(next_exit_code(&mut rx).await, Some(Some(42)));
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_shutdown_kills_long_running_process() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = spawn_sh("sleep 60", tx);
        assert!(!process.has_exited());

        process.shutdown(None).await;

        assert!(next_exit_code(&mut rx).await.is_some());
        assert!(process.has_exited());

        // second call is a no-op
        process.shutdown(None).await;
    }

    #[tokio::test]
    async fn test_wait_for_debug_port_skips_build_output() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(DaemonEvent::Stdout("Launching lib/main.dart...".into()))
            .await
            .unwrap();
        tx.send(DaemonEvent::Stderr("some warning".into()))
            .await
            .unwrap();
        tx.send(DaemonEvent::Stdout(
            r#"[{"event":"app.start","params":{"appId":"a1","deviceId":"macos"}}]"#.into(),
        ))
        .await
        .unwrap();
        tx.send(DaemonEvent::Stdout(
            r#"[{"event":"app.debugPort","params":{"appId":"a1","port":8181,"wsUri":"ws://127.0.0.1:8181/k=/ws"}}]"#.into(),
        ))
        .await
        .unwrap();

        let (app_id, ws_uri) = wait_for_debug_port(&mut rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(app_id, "a1");
        assert_eq!(ws_uri, "ws://127.0.0.1:8181/k=/ws");
    }

    #[tokio::test]
    async fn test_wait_for_debug_port_without_ws_uri_is_protocol_error() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(DaemonEvent::Stdout(
            r#"[{"event":"app.debugPort","params":{"appId":"a1","port":8181}}]"#.into(),
        ))
        .await
        .unwrap();

        let err = wait_for_debug_port(&mut rx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_debug_port_times_out() {
        let (_tx, mut rx) = mpsc::channel::<DaemonEvent>(16);
        let err = wait_for_debug_port(&mut rx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DebugPortTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_debug_port_reports_early_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(DaemonEvent::Exited { code: Some(1) }).await.unwrap();

        let err = wait_for_debug_port(&mut rx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn { .. }));
    }

    #[tokio::test]
    async fn test_launch_with_fake_flutter() {
        let project = flutter_project();
        let command = fake_flutter(
            project.path(),
            r#"echo 'Launching lib/main.dart on Linux in debug mode...'
echo '[{"event":"app.start","params":{"appId":"app-1","deviceId":"linux"}}]'
echo '[{"event":"app.debugPort","params":{"appId":"app-1","port":4242,"wsUri":"ws://127.0.0.1:4242/t=/ws"}}]'
read line
exit 0
"#,
        );

        let mut app = launch(&command, project.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(app.ws_uri, "ws://127.0.0.1:4242/t=/ws");
        assert_eq!(app.app_id, "app-1");

        // app.stop on stdin lets the script finish on its own
        app.stop().await;
        assert!(app.process.has_exited());
    }

    #[tokio::test]
    async fn test_launch_fails_when_script_exits_early() {
        let project = flutter_project();
        let command = fake_flutter(project.path(), "echo 'build failed' >&2\nexit 1\n");

        let result = launch(&command, project.path(), Duration::from_secs(10)).await;
        assert!(matches!(result, Err(Error::ProcessSpawn { .. })));
    }

    #[test]
    #[serial]
    fn test_resolve_prefers_flutter_root() {
        let sdk = tempfile::tempdir().unwrap();
        let bin = sdk.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join(flutter_script_name());
        std::fs::write(&script, "").unwrap();

        let old_root = std::env::var_os("FLUTTER_ROOT");
        std::env::set_var("FLUTTER_ROOT", sdk.path());
        let resolved = FlutterCommand::resolve();
        match old_root {
            Some(v) => std::env::set_var("FLUTTER_ROOT", v),
            None => std::env::remove_var("FLUTTER_ROOT"),
        }

        assert_eq!(resolved.program(), script.as_path());
    }

    #[test]
    #[serial]
    fn test_resolve_falls_back_when_sdk_missing() {
        let old_root = std::env::var_os("FLUTTER_ROOT");
        let old_home = std::env::var_os("FLUTTER_HOME");
        std::env::set_var("FLUTTER_ROOT", "/definitely/not/an/sdk");
        std::env::remove_var("FLUTTER_HOME");

        let resolved = FlutterCommand::resolve();

        match old_root {
            Some(v) => std::env::set_var("FLUTTER_ROOT", v),
            None => std::env::remove_var("FLUTTER_ROOT"),
        }
        if let Some(v) = old_home {
            std::env::set_var("FLUTTER_HOME", v);
        }

        assert!(!resolved
            .program()
            .starts_with("/definitely/not/an/sdk"));
        assert!(resolved.program().ends_with(flutter_script_name()));
    }
}
