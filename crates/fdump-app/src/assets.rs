//! Image asset embedding for crawler output.
//!
//! Image nodes carry the Flutter `ImageProvider` description in
//! `properties.imagePath`, e.g. `AssetImage(name: "assets/logo.png")`. The
//! asset path is extracted, read relative to the project root, and stored as
//! Base64 in `properties.imageBase64`. Problems are recorded on the node in
//! `properties.error` and never abort the dump.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use fdump_core::prelude::*;

/// `properties.error` for assets over `max_bytes`, e.g. `Image too large (>5MB)`.
pub fn too_large_message(max_bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if max_bytes >= MIB && max_bytes % MIB == 0 {
        format!("Image too large (>{}MB)", max_bytes / MIB)
    } else {
        format!("Image too large (>{} bytes)", max_bytes)
    }
}

/// `properties.error` for assets that do not exist.
pub const NOT_FOUND_MESSAGE: &str = "Image file not found";

/// First quoted substring, e.g. `"assets/logo.png"`.
static QUOTED_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("Invalid quoted path regex"));

/// `AssetImage(name: ` style provider prefix.
static PROVIDER_PREFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*Image\(.*name:\s*").expect("Invalid provider prefix regex"));

/// Extract the asset path from an image provider description.
///
/// The first quoted substring wins; without quotes, an `...Image(name: `
/// prefix and a trailing `)` are stripped.
pub fn extract_asset_path(image_path: &str) -> String {
    if let Some(quoted) = QUOTED_PATH_PATTERN
        .captures(image_path)
        .and_then(|c| c.get(1))
    {
        return quoted.as_str().to_string();
    }

    let stripped = PROVIDER_PREFIX_PATTERN.replace(image_path, "");
    stripped
        .strip_suffix(')')
        .unwrap_or(&stripped)
        .to_string()
}

/// What happened to every image node.
#[derive(Debug, Default)]
pub struct EmbedReport {
    pub embedded: Vec<PathBuf>,
    /// [`Error::AssetTooLarge`] / [`Error::AssetNotFound`] / [`Error::Io`].
    pub issues: Vec<Error>,
}

impl EmbedReport {
    pub fn image_count(&self) -> usize {
        self.embedded.len() + self.issues.len()
    }
}

/// Embed every `Image` node's asset under `project_root` into `tree`.
///
/// Descends through `children` only.
pub fn embed(tree: &mut Value, project_root: &Path, max_bytes: u64) -> EmbedReport {
    let mut report = EmbedReport::default();
    let mut stack: Vec<&mut Value> = vec![tree];

    while let Some(node) = stack.pop() {
        embed_node(node, project_root, max_bytes, &mut report);

        if let Some(children) = node.get_mut("children").and_then(Value::as_array_mut) {
            stack.extend(children.iter_mut().rev());
        }
    }

    info!(
        "Embedded {} image(s), {} issue(s)",
        report.embedded.len(),
        report.issues.len()
    );
    report
}

fn embed_node(node: &mut Value, project_root: &Path, max_bytes: u64, report: &mut EmbedReport) {
    if node.get("type").and_then(Value::as_str) != Some("Image") {
        return;
    }
    let Some(properties) = node.get_mut("properties").and_then(Value::as_object_mut) else {
        return;
    };
    let Some(image_path) = properties.get("imagePath").and_then(Value::as_str) else {
        return;
    };

    let relative = extract_asset_path(image_path);
    let full_path = project_root.join(&relative);

    match read_asset(&full_path, max_bytes) {
        Ok(bytes) => {
            properties.insert(
                "imageBase64".to_string(),
                Value::String(BASE64_STANDARD.encode(bytes)),
            );
            debug!("Embedded image {}", relative);
            report.embedded.push(full_path);
        }
        Err(e) => {
            match &e {
                Error::AssetTooLarge { .. } => {
                    warn!("{}", e);
                    properties.insert(
                        "error".to_string(),
                        Value::String(too_large_message(max_bytes)),
                    );
                }
                Error::AssetNotFound { .. } => {
                    warn!("{} (from {})", e, image_path);
                    properties.insert(
                        "error".to_string(),
                        Value::String(NOT_FOUND_MESSAGE.to_string()),
                    );
                }
                _ => error!("Failed to embed image {}: {}", full_path.display(), e),
            }
            report.issues.push(e);
        }
    }
}

fn read_asset(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => {
            return Err(Error::AssetNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::AssetNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.len() > max_bytes {
        return Err(Error::AssetTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_bytes,
        });
    }

    Ok(std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_asset_path() {
        assert_eq!(
            extract_asset_path(r#"AssetImage(name: "assets/a.png")"#),
            "assets/a.png"
        );
        assert_eq!(
            extract_asset_path("AssetImage(bundle: null, name: 'assets/b.png')"),
            "assets/b.png"
        );
        assert_eq!(extract_asset_path("AssetImage(name: assets/c.png)"), "assets/c.png");
        assert_eq!(extract_asset_path("assets/d.png"), "assets/d.png");
    }

    #[test]
    fn test_embed_encodes_and_flags() {
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("assets")).unwrap();
        std::fs::write(project.path().join("assets/a.png"), b"PNG").unwrap();
        std::fs::write(project.path().join("assets/big.png"), vec![0u8; 16]).unwrap();

        let mut tree = json!({
            "type": "Column",
            "children": [
                { "type": "Image", "properties": { "imagePath": "AssetImage(name: \"assets/a.png\")" } },
                { "type": "Container", "children": [
                    { "type": "Image", "properties": { "imagePath": "AssetImage(name: \"assets/missing.png\")" } }
                ]},
                { "type": "Image", "properties": { "imagePath": "AssetImage(name: \"assets/big.png\")" } },
                { "type": "Text", "properties": { "imagePath": "AssetImage(name: \"assets/a.png\")" } }
            ]
        });

        let report = embed(&mut tree, project.path(), 8);

        assert_eq!(tree["children"][0]["properties"]["imageBase64"], "UE5H");
        assert_eq!(
            tree["children"][1]["children"][0]["properties"]["error"],
            NOT_FOUND_MESSAGE
        );
        assert_eq!(
            tree["children"][2]["properties"]["error"],
            "Image too large (>8 bytes)"
        );
        assert!(tree["children"][2]["properties"].get("imageBase64").is_none());
        assert!(tree["children"][3]["properties"].get("imageBase64").is_none());

        assert_eq!(report.embedded.len(), 1);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(Error::is_asset_issue));
        assert_eq!(report.image_count(), 3);
    }

    #[test]
    fn test_too_large_message_follows_limit() {
        assert_eq!(too_large_message(5 * 1024 * 1024), "Image too large (>5MB)");
        assert_eq!(too_large_message(2 * 1024 * 1024), "Image too large (>2MB)");
        assert_eq!(too_large_message(1_500_000), "Image too large (>1500000 bytes)");
    }

    #[test]
    fn test_embed_ignores_non_image_trees() {
        let project = tempfile::tempdir().unwrap();
        let mut tree = json!({ "type": "Text", "properties": {} });
        let report = embed(&mut tree, project.path(), 1024);
        assert_eq!(report.image_count(), 0);
        assert_eq!(tree, json!({ "type": "Text", "properties": {} }));
    }
}
