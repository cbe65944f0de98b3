//! Settings loading and `.fdump/` initialization

use std::path::Path;

use fdump_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const FDUMP_DIR: &str = ".fdump";

/// Load settings from .fdump/config.toml
///
/// Returns default settings if file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(FDUMP_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create `.fdump/config.toml` with commented defaults.
///
/// An existing file is left untouched. Returns the config file path.
pub fn init_config_dir(project_path: &Path) -> Result<std::path::PathBuf> {
    let fdump_dir = project_path.join(FDUMP_DIR);

    if !fdump_dir.exists() {
        std::fs::create_dir_all(&fdump_dir)
            .map_err(|e| Error::config(format!("Failed to create .fdump dir: {}", e)))?;
    }

    let config_path = fdump_dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        info!("Config already exists at {:?}", config_path);
    } else {
        std::fs::write(&config_path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default config to {:?}", config_path);
    }

    Ok(config_path)
}

fn generate_default_config() -> String {
    r#"# flutter-dump configuration

[connection]
debug_port_timeout_secs = 60   # Wait for `flutter run` to report the VM Service
service_wait_ms = 1000         # Wait for reloadSources registration (--uri only)
max_message_mb = 100           # Largest single VM Service reply (getObject strings)

[inspector]
object_group = "fdump-inspector"
ready_max_attempts = 20        # Polls while the first frame is not built yet
ready_interval_ms = 500
settle_delay_ms = 200
node_delay_ms = 10             # Pause between per-node detail fetches

[crawler]
# Dart file injected as lib/figma_temp_crawler.dart (required for --mode figma)
# source = "tool/figma_crawler.dart"
entry_expression = "figmaExtractorEntryPoint()"
library_hint = "figma_temp_crawler"
settle_delay_ms = 1500
hot_reload_delay_ms = 2000
fetch_details = false          # Also crawl inspector details in figma mode

[assets]
max_bytes = 5242880            # Larger images are flagged instead of embedded

[output]
inspector_dir = "flutter_inspector_dump"
figma_dir = "flutter_figma_dump"
"#
    .to_string()
}
