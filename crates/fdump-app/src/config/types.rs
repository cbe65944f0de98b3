//! Configuration types for flutter-dump
//!
//! Defines:
//! - `Settings` - Project settings (`.fdump/config.toml`)
//! - `DumpMode` - Which extraction pipeline to run
//! - One sub-struct per config table

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which extraction pipeline a dump runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpMode {
    /// Crawl the widget inspector extensions.
    #[default]
    Inspector,
    /// Evaluate an injected crawler and embed its image assets.
    Figma,
}

impl std::fmt::Display for DumpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpMode::Inspector => write!(f, "inspector"),
            DumpMode::Figma => write!(f, "figma"),
        }
    }
}

/// Project settings (.fdump/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub inspector: InspectorSettings,

    #[serde(default)]
    pub crawler: CrawlerSettings,

    #[serde(default)]
    pub assets: AssetSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

/// Launching and connecting to the target app
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Hard limit for `flutter run` to report `app.debugPort`
    #[serde(default = "default_debug_port_timeout_secs")]
    pub debug_port_timeout_secs: u64,

    /// How long to wait for the `reloadSources` service registration after
    /// attaching
    #[serde(default = "default_service_wait_ms")]
    pub service_wait_ms: u64,

    /// Largest single VM Service reply accepted, in MiB
    #[serde(default = "default_max_message_mb")]
    pub max_message_mb: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            debug_port_timeout_secs: default_debug_port_timeout_secs(),
            service_wait_ms: default_service_wait_ms(),
            max_message_mb: default_max_message_mb(),
        }
    }
}

impl ConnectionSettings {
    pub fn debug_port_timeout(&self) -> Duration {
        Duration::from_secs(self.debug_port_timeout_secs)
    }

    pub fn service_wait(&self) -> Duration {
        Duration::from_millis(self.service_wait_ms)
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_mb.saturating_mul(1024 * 1024)
    }
}

fn default_debug_port_timeout_secs() -> u64 {
    60
}

fn default_service_wait_ms() -> u64 {
    1000
}

fn default_max_message_mb() -> usize {
    100
}

/// Widget inspector crawl
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InspectorSettings {
    /// Inspector object group every reference is allocated in
    #[serde(default = "default_object_group")]
    pub object_group: String,

    #[serde(default = "default_ready_max_attempts")]
    pub ready_max_attempts: u32,

    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    /// Pause after priming the inspector
    #[serde(default = "default_inspector_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause between per-node detail fetches
    #[serde(default = "default_node_delay_ms")]
    pub node_delay_ms: u64,
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self {
            object_group: default_object_group(),
            ready_max_attempts: default_ready_max_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
            settle_delay_ms: default_inspector_settle_delay_ms(),
            node_delay_ms: default_node_delay_ms(),
        }
    }
}

impl InspectorSettings {
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn node_delay(&self) -> Duration {
        Duration::from_millis(self.node_delay_ms)
    }
}

fn default_object_group() -> String {
    "fdump-inspector".to_string()
}

fn default_ready_max_attempts() -> u32 {
    20
}

fn default_ready_interval_ms() -> u64 {
    500
}

fn default_inspector_settle_delay_ms() -> u64 {
    200
}

fn default_node_delay_ms() -> u64 {
    10
}

/// Injected crawler (figma mode)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerSettings {
    /// Dart source of the crawler, relative to the project root
    #[serde(default)]
    pub source: Option<PathBuf>,

    /// Expression evaluated to run the crawler; must return a JSON string
    #[serde(default = "default_entry_expression")]
    pub entry_expression: String,

    /// Substring identifying the crawler library among the isolate's libraries
    #[serde(default = "default_library_hint")]
    pub library_hint: String,

    #[serde(default = "default_crawler_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_hot_reload_delay_ms")]
    pub hot_reload_delay_ms: u64,

    /// Also run the per-node inspector detail crawl
    #[serde(default)]
    pub fetch_details: bool,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            source: None,
            entry_expression: default_entry_expression(),
            library_hint: default_library_hint(),
            settle_delay_ms: default_crawler_settle_delay_ms(),
            hot_reload_delay_ms: default_hot_reload_delay_ms(),
            fetch_details: false,
        }
    }
}

impl CrawlerSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn hot_reload_delay(&self) -> Duration {
        Duration::from_millis(self.hot_reload_delay_ms)
    }
}

fn default_entry_expression() -> String {
    "figmaExtractorEntryPoint()".to_string()
}

fn default_library_hint() -> String {
    "figma_temp_crawler".to_string()
}

fn default_crawler_settle_delay_ms() -> u64 {
    1500
}

fn default_hot_reload_delay_ms() -> u64 {
    2000
}

/// Image asset embedding
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetSettings {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

/// Output directory names, relative to the project root
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSettings {
    #[serde(default = "default_inspector_dir")]
    pub inspector_dir: String,

    #[serde(default = "default_figma_dir")]
    pub figma_dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            inspector_dir: default_inspector_dir(),
            figma_dir: default_figma_dir(),
        }
    }
}

impl OutputSettings {
    pub fn dir_for(&self, mode: DumpMode) -> &str {
        match mode {
            DumpMode::Inspector => &self.inspector_dir,
            DumpMode::Figma => &self.figma_dir,
        }
    }
}

fn default_inspector_dir() -> String {
    "flutter_inspector_dump".to_string()
}

fn default_figma_dir() -> String {
    "flutter_figma_dump".to_string()
}
