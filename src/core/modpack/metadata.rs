// ─── Metadata Repair ───
// Makes sure a staged version directory has `<name>.json` with a matching id
// and a `<name>.jar`. Heuristic and best effort by nature.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

/// Content folders never searched for descriptors or binaries.
const CONTENT_DIRS: &[&str] = &[
    "mods",
    "config",
    "resourcepacks",
    "shaderpacks",
    "saves",
    "defaultconfigs",
    "kubejs",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedMetadata {
    pub descriptor: PathBuf,
    pub binary: PathBuf,
    pub descriptor_rewritten: bool,
    pub binary_copied: bool,
}

pub async fn repair_metadata(version_dir: &Path, name: &str) -> LauncherResult<RepairedMetadata> {
    let version_dir = version_dir.to_path_buf();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || repair_blocking(&version_dir, &name))
        .await
        .map_err(|e| LauncherError::Other(format!("metadata task failed: {e}")))?
}

fn repair_blocking(version_dir: &Path, name: &str) -> LauncherResult<RepairedMetadata> {
    let mut files = Vec::new();
    collect_files(version_dir, version_dir, &mut files)?;

    let descriptor = version_dir.join(format!("{name}.json"));
    let descriptor_rewritten = ensure_descriptor(&descriptor, name, &files)?;

    let binary = version_dir.join(format!("{name}.jar"));
    let binary_copied = ensure_binary(&binary, name, &files)?;

    Ok(RepairedMetadata {
        descriptor,
        binary,
        descriptor_rewritten,
        binary_copied,
    })
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> LauncherResult<()> {
    for entry in std::fs::read_dir(dir).map_err(LauncherError::io(dir))? {
        let entry = entry.map_err(LauncherError::io(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(LauncherError::io(&path))?;
        if file_type.is_dir() {
            let skip = dir == root
                && entry
                    .file_name()
                    .to_str()
                    .map(|n| CONTENT_DIRS.contains(&n))
                    .unwrap_or(false);
            if !skip {
                collect_files(root, &path, out)?;
            }
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn looks_like_descriptor(value: &Value) -> bool {
    value.get("id").is_some_and(Value::is_string)
        && (value.get("mainClass").is_some() || value.get("libraries").is_some())
}

fn read_descriptor(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&raw).ok()?;
    looks_like_descriptor(&value).then_some(value)
}

/// Returns true when the descriptor had to be written.
fn ensure_descriptor(target: &Path, name: &str, files: &[PathBuf]) -> LauncherResult<bool> {
    let (mut value, from_existing) = match read_descriptor(target) {
        Some(value) => (value, true),
        None => {
            // Shallowest candidate first; ties broken by path for determinism.
            let mut candidates: Vec<&PathBuf> = files
                .iter()
                .filter(|p| p.extension().is_some_and(|e| e == "json") && p.as_path() != target)
                .collect();
            candidates.sort_by_key(|p| (p.components().count(), p.to_path_buf()));

            let found = candidates
                .into_iter()
                .find_map(|p| read_descriptor(p).map(|v| (p, v)))
                .ok_or_else(|| {
                    LauncherError::Install(format!("no version descriptor found for {name}"))
                })?;
            info!("Synthesizing {}.json from {:?}", name, found.0);
            (found.1, false)
        }
    };

    if from_existing && value.get("id").and_then(Value::as_str) == Some(name) {
        return Ok(false);
    }

    // Only the id changes.
    value["id"] = Value::String(name.to_string());
    let pretty = serde_json::to_string_pretty(&value)?;
    std::fs::write(target, pretty).map_err(LauncherError::io(target))?;
    Ok(true)
}

fn binary_rank(path: &Path, name: &str) -> (bool, u64) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let primary = stem == name.to_ascii_lowercase() || stem.contains("client") || stem.contains("primary");
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    (primary, size)
}

/// Returns true when a binary had to be copied into place.
fn ensure_binary(target: &Path, name: &str, files: &[PathBuf]) -> LauncherResult<bool> {
    if std::fs::metadata(target).map(|m| m.len() > 0).unwrap_or(false) {
        return Ok(false);
    }

    let best = files
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "jar") && p.as_path() != target)
        .map(|p| (binary_rank(p, name), p))
        .filter(|((_, size), _)| *size > 0)
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, p)| p)
        .ok_or_else(|| LauncherError::Install(format!("no game binary found for {name}")))?;

    debug!("Copying {:?} to {:?}", best, target);
    std::fs::copy(best, target).map_err(LauncherError::io(target))?;
    Ok(true)
}
