// ─── Pack Archive ───
// Blocking zip access, always run on the blocking pool.

use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::fs_util::safe_join;

fn open(path: &Path) -> LauncherResult<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path).map_err(LauncherError::io(path))?;
    Ok(zip::ZipArchive::new(file)?)
}

async fn blocking<T, F>(f: F) -> LauncherResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LauncherResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LauncherError::Other(format!("archive task failed: {e}")))?
}

pub async fn entry_names(archive: &Path) -> LauncherResult<Vec<String>> {
    let archive = archive.to_path_buf();
    blocking(move || {
        let zip = open(&archive)?;
        Ok(zip.file_names().map(str::to_string).collect())
    })
    .await
}

pub async fn read_json<T>(archive: &Path, entry: &str) -> LauncherResult<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let archive = archive.to_path_buf();
    let entry = entry.to_string();
    blocking(move || {
        let mut zip = open(&archive)?;
        let mut file = zip.by_name(&entry).map_err(|_| {
            LauncherError::UnsupportedModpack(format!("{entry} missing from {}", archive.display()))
        })?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(LauncherError::io(&archive))?;
        Ok(serde_json::from_str(&raw)?)
    })
    .await
}

/// Extract every file under each prefix into `dest`, stripping the prefix.
/// Prefixes apply in order, so later ones win on conflicts. An empty prefix
/// extracts the whole archive. Returns the number of files written.
pub async fn extract_prefixes(archive: &Path, prefixes: &[String], dest: &Path) -> LauncherResult<usize> {
    let archive = archive.to_path_buf();
    let prefixes = prefixes.to_vec();
    let dest = dest.to_path_buf();
    blocking(move || {
        let mut zip = open(&archive)?;
        let mut written = 0;
        for prefix in &prefixes {
            for i in 0..zip.len() {
                let mut entry = zip.by_index(i)?;
                if entry.is_dir() {
                    continue;
                }
                let Some(enclosed) = entry.enclosed_name() else {
                    warn!("Skipping unsafe archive entry {}", entry.name());
                    continue;
                };
                let name = to_slash(&enclosed);
                let Some(relative) = name.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                if relative.is_empty() {
                    continue;
                }

                let target = safe_join(&dest, relative)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(LauncherError::io(parent))?;
                }
                let mut out = std::fs::File::create(&target).map_err(LauncherError::io(&target))?;
                std::io::copy(&mut entry, &mut out).map_err(LauncherError::io(&target))?;
                written += 1;
            }
        }
        debug!("Extracted {} override files into {:?}", written, dest);
        Ok(written)
    })
    .await
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
