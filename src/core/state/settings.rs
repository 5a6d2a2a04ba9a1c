use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::fs_util::RetryPolicy;
use crate::core::modpack::CURSEFORGE_API_BASE;
use crate::core::source::DownloadSource;
use crate::core::version::VersionInstallOptions;

const APP_DIR_NAME: &str = "InterfaceOficial";
const SETTINGS_FILE: &str = "installer_settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    pub download_source: DownloadSource,
    pub max_concurrent_downloads: usize,
    pub fetch_assets_after_install: bool,
    /// Skip an existing library only when its SHA-1 also matches.
    pub verify_sha1_on_skip: bool,
    pub curseforge_api_key: Option<String>,
    pub curseforge_api_base: String,
    /// Seconds a finished task stays visible; `None` keeps it until pruned.
    pub task_auto_remove_secs: Option<u64>,
    pub move_retry_attempts: u32,
    pub move_retry_delay_ms: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            download_source: DownloadSource::Official,
            max_concurrent_downloads: 4,
            fetch_assets_after_install: false,
            verify_sha1_on_skip: false,
            curseforge_api_key: None,
            curseforge_api_base: CURSEFORGE_API_BASE.to_string(),
            task_auto_remove_secs: Some(5),
            move_retry_attempts: 5,
            move_retry_delay_ms: 500,
        }
    }
}

impl InstallerSettings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring corrupt settings at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> LauncherResult<()> {
        std::fs::create_dir_all(data_dir).map_err(LauncherError::io(data_dir))?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(LauncherError::io(&path))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.move_retry_attempts.max(1),
            delay: Duration::from_millis(self.move_retry_delay_ms),
        }
    }

    pub fn version_options(&self) -> VersionInstallOptions {
        VersionInstallOptions {
            max_concurrent_downloads: self.max_concurrent_downloads.max(1),
            verify_sha1_on_skip: self.verify_sha1_on_skip,
            fetch_assets: self.fetch_assets_after_install,
        }
    }

    pub fn task_auto_remove(&self) -> Option<Duration> {
        self.task_auto_remove_secs.map(Duration::from_secs)
    }
}

/// `<platform data dir>/InterfaceOficial`, or the working directory when the
/// platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
