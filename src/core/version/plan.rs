use std::collections::HashSet;

use tracing::debug;

use super::rules::Platform;
use super::version_file::{AssetIndexInfo, DownloadArtifact, LibraryDownload, VersionJson};
use crate::core::error::LauncherResult;

/// Everything one version install will fetch, with totals computed up front.
///
/// The totals only feed the overall percentage; they are not recomputed when
/// files are skipped or fail.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub client: DownloadArtifact,
    pub libraries: Vec<LibraryDownload>,
    pub asset_index: Option<AssetIndexInfo>,
    /// Libraries rejected by their rules.
    pub filtered_out: usize,
    pub total_files: u64,
    pub total_bytes: u64,
}

impl InstallPlan {
    pub fn build(version: &VersionJson, platform: &Platform) -> LauncherResult<Self> {
        let client = version.client_artifact()?.clone();

        let mut libraries = Vec::new();
        let mut seen = HashSet::new();
        let mut filtered_out = 0;

        for lib in &version.libraries {
            if !lib.is_allowed_for(platform) {
                debug!("Skipping library (OS rule): {}", lib.name);
                filtered_out += 1;
                continue;
            }
            for dl in lib.downloads_for(platform)? {
                // Two entries resolving to one file would race on the same path.
                if seen.insert(dl.path.clone()) {
                    libraries.push(dl);
                }
            }
        }

        let asset_index = version.asset_index.clone();

        let total_files = libraries.len() as u64 + 1 + u64::from(asset_index.is_some());
        let total_bytes = client.size.unwrap_or(0)
            + libraries.iter().filter_map(|l| l.size).sum::<u64>()
            + asset_index.as_ref().and_then(|a| a.size).unwrap_or(0);

        Ok(Self {
            client,
            libraries,
            asset_index,
            filtered_out,
            total_files,
            total_bytes,
        })
    }
}
