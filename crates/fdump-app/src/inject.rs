//! Crawler source injection
//!
//! The crawler is compiled into the app by writing it as
//! `lib/figma_temp_crawler.dart` and importing it from `lib/main.dart`.
//! [`InjectionGuard`] puts both files back the way they were.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use fdump_core::prelude::*;

/// File name of the injected crawler inside `lib/`.
pub const CRAWLER_FILE_NAME: &str = "figma_temp_crawler.dart";

/// Import line added to `main.dart`.
pub const CRAWLER_IMPORT: &str = "import 'figma_temp_crawler.dart';";

/// A single-quoted or double-quoted import statement, through its `;`.
static IMPORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^import\s+['"][^;\n]*;"#).expect("Invalid import regex"));

/// Restores `lib/main.dart` and removes the crawler file.
///
/// Cleanup runs exactly once: through [`cleanup`](Self::cleanup) or, failing
/// that, on drop.
#[derive(Debug)]
pub struct InjectionGuard {
    main_path: PathBuf,
    crawler_path: PathBuf,
    original_main: String,
    restored: bool,
}

impl InjectionGuard {
    pub fn crawler_path(&self) -> &Path {
        &self.crawler_path
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Restore `main.dart` and delete the crawler. Later calls do nothing.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        let restore = std::fs::write(&self.main_path, &self.original_main);
        match &restore {
            Ok(()) => info!("Restored {}", self.main_path.display()),
            Err(e) => error!("Failed to restore {}: {}", self.main_path.display(), e),
        }

        let remove = match std::fs::remove_file(&self.crawler_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        };
        match &remove {
            Ok(()) => debug!("Removed {}", self.crawler_path.display()),
            Err(e) => error!("Failed to remove {}: {}", self.crawler_path.display(), e),
        }

        restore?;
        remove?;
        Ok(())
    }
}

impl Drop for InjectionGuard {
    fn drop(&mut self) {
        if !self.restored {
            warn!("InjectionGuard dropped without cleanup, restoring sources now");
            let _ = self.cleanup();
        }
    }
}

/// Add the crawler import to `source` unless it is already there.
///
/// The import goes right after the last import statement, or at the very top
/// when there are none.
pub fn add_crawler_import(source: &str) -> String {
    if source.contains(CRAWLER_IMPORT) {
        return source.to_string();
    }

    match IMPORT_PATTERN.find_iter(source).last() {
        Some(last) => {
            let at = last.end();
            format!("{}\n{}{}", &source[..at], CRAWLER_IMPORT, &source[at..])
        }
        None => format!("{}\n{}", CRAWLER_IMPORT, source),
    }
}

/// Write `crawler_source` into the project and import it from `main.dart`.
///
/// # Errors
///
/// [`Error::Injection`] when `lib/main.dart` is missing or a file cannot be
/// written. Nothing is left modified on failure.
pub fn inject(project_path: &Path, crawler_source: &str) -> Result<InjectionGuard> {
    let lib_dir = project_path.join("lib");
    let main_path = lib_dir.join("main.dart");
    let crawler_path = lib_dir.join(CRAWLER_FILE_NAME);

    let original_main = std::fs::read_to_string(&main_path).map_err(|e| {
        Error::injection(format!("cannot read {}: {}", main_path.display(), e))
    })?;

    std::fs::write(&crawler_path, crawler_source).map_err(|e| {
        Error::injection(format!("cannot write {}: {}", crawler_path.display(), e))
    })?;
    info!("Wrote crawler to {}", crawler_path.display());

    // From here on the guard owns the rollback.
    let mut guard = InjectionGuard {
        main_path,
        crawler_path,
        original_main,
        restored: false,
    };

    let modified = add_crawler_import(&guard.original_main);
    if modified != guard.original_main {
        if let Err(e) = std::fs::write(&guard.main_path, &modified) {
            let err = Error::injection(format!(
                "cannot update {}: {}",
                guard.main_path.display(),
                e
            ));
            let _ = guard.cleanup();
            return Err(err);
        }
        info!("Added crawler import to {}", guard.main_path.display());
    }

    Ok(guard)
}
