// ─── Version Manifest ───
// Fetching and parsing the version manifest v2 from the active source.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::downloader::TransferEngine;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::source::{Resource, SourceResolver};

#[derive(Debug, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub latest: Option<LatestVersions>,
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(default)]
    pub release_time: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

impl VersionManifest {
    pub async fn fetch(
        engine: &TransferEngine,
        resolver: &dyn SourceResolver,
        cancel: &CancellationToken,
    ) -> LauncherResult<Self> {
        let url = resolver.url_for(&Resource::VersionManifest);
        info!("Fetching version manifest from {} ({})", url, resolver.name());

        let raw = engine.fetch_text(&url, cancel).await?;
        let manifest: VersionManifest = serde_json::from_str(&raw)?;

        info!("Loaded {} versions from manifest", manifest.versions.len());
        Ok(manifest)
    }

    pub fn find_version(&self, id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn require_version(&self, id: &str) -> LauncherResult<&VersionEntry> {
        self.find_version(id)
            .ok_or_else(|| LauncherError::Install(format!("version {id} not found in manifest")))
    }
}
