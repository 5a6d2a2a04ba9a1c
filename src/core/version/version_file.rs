// ─── Version File ───
// Parses a version descriptor JSON into the artifacts the installer fetches.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::rules::{rules_allow, LibraryRule, Platform};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::maven::MavenArtifact;

/// The subset of a version descriptor the installer needs. The raw JSON is
/// what gets persisted; this struct is only used to plan downloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionJson {
    pub id: String,
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionDownloads {
    pub client: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexInfo {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha1: Option<String>,
}

// ─── Library Entry ───

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(default)]
    pub downloads: Option<LibraryDownloads>,
    /// Maven repository base for coordinate-only libraries.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rules: Option<Vec<LibraryRule>>,
    #[serde(default)]
    pub natives: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default)]
    pub artifact: Option<LibDownloadArtifact>,
    #[serde(default)]
    pub classifiers: Option<HashMap<String, LibDownloadArtifact>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibDownloadArtifact {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// One concrete file to place under the libraries root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDownload {
    pub name: String,
    /// Relative to the libraries root, forward slashes.
    pub path: String,
    /// `None` means "default library repository of the active source".
    pub url: Option<String>,
    pub size: Option<u64>,
    pub sha1: Option<String>,
}

impl LibraryEntry {
    pub fn is_allowed_for(&self, platform: &Platform) -> bool {
        self.rules
            .as_deref()
            .map_or(true, |rules| rules_allow(rules, platform))
    }

    /// Files this library contributes on `platform`: the main artifact plus
    /// the native classifier, when the library declares one for this OS.
    /// Rules are not evaluated here.
    pub fn downloads_for(&self, platform: &Platform) -> LauncherResult<Vec<LibraryDownload>> {
        let mut out = Vec::new();
        let downloads = self.downloads.as_ref();

        match downloads.and_then(|d| d.artifact.as_ref()) {
            Some(artifact) => {
                if let Some(dl) = self.from_artifact(artifact, None)? {
                    out.push(dl);
                }
            }
            // Natives-only entries carry a classifiers block but no artifact.
            None if downloads.and_then(|d| d.classifiers.as_ref()).is_none() => {
                out.push(self.from_coordinate(None)?);
            }
            None => {}
        }

        if let Some(classifier) = self.native_classifier(platform) {
            let declared = downloads
                .and_then(|d| d.classifiers.as_ref())
                .and_then(|c| c.get(&classifier));
            match declared {
                Some(artifact) => {
                    if let Some(dl) = self.from_artifact(artifact, Some(&classifier))? {
                        out.push(dl);
                    }
                }
                None if downloads.is_none() => out.push(self.from_coordinate(Some(&classifier))?),
                None => debug!("No {} classifier published for {}", classifier, self.name),
            }
        }

        Ok(out)
    }

    fn native_classifier(&self, platform: &Platform) -> Option<String> {
        let natives = self.natives.as_ref()?;
        natives
            .get(&platform.os)
            .map(|c| c.replace("${arch}", platform.arch_bits()))
    }

    fn from_artifact(
        &self,
        artifact: &LibDownloadArtifact,
        classifier: Option<&str>,
    ) -> LauncherResult<Option<LibraryDownload>> {
        let path = match &artifact.path {
            Some(p) if !p.is_empty() => p.clone(),
            _ => self.coordinate(classifier)?.relative_path(),
        };

        // An empty URL marks a file produced locally (e.g. by a loader's
        // post-processors); there is nothing to fetch.
        let url = match artifact.url.as_deref() {
            Some("") => {
                debug!("Library {} has no download URL, skipping", self.name);
                return Ok(None);
            }
            Some(u) => Some(u.to_string()),
            None => None,
        };

        Ok(Some(LibraryDownload {
            name: self.name.clone(),
            path,
            url,
            size: artifact.size,
            sha1: artifact.sha1.clone(),
        }))
    }

    fn from_coordinate(&self, classifier: Option<&str>) -> LauncherResult<LibraryDownload> {
        let artifact = self.coordinate(classifier)?;
        Ok(LibraryDownload {
            name: self.name.clone(),
            path: artifact.relative_path(),
            url: self.url.as_deref().map(|repo| artifact.url_in(repo)),
            size: None,
            sha1: None,
        })
    }

    fn coordinate(&self, classifier: Option<&str>) -> LauncherResult<MavenArtifact> {
        let artifact = MavenArtifact::parse(&self.name)?;
        Ok(match classifier {
            Some(c) => artifact.with_classifier(c),
            None => artifact,
        })
    }
}

impl VersionJson {
    pub fn parse(raw: &str) -> LauncherResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn client_artifact(&self) -> LauncherResult<&DownloadArtifact> {
        self.downloads
            .as_ref()
            .and_then(|d| d.client.as_ref())
            .ok_or_else(|| {
                LauncherError::InvalidDescriptor(format!(
                    "version {} declares no client download",
                    self.id
                ))
            })
    }

    /// Persist the descriptor exactly as received.
    pub async fn save_raw(raw_json: &str, path: &Path) -> LauncherResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(LauncherError::io(parent))?;
        }
        tokio::fs::write(path, raw_json)
            .await
            .map_err(LauncherError::io(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> Platform {
        Platform::new("linux", "x86_64")
    }

    #[test]
    fn parses_client_and_asset_index() {
        let v = VersionJson::parse(
            r#"{
                "id": "1.20.1",
                "mainClass": "net.minecraft.client.main.Main",
                "downloads": {"client": {"url": "https://x/client.jar", "size": 23028853, "sha1": "abc"}},
                "assetIndex": {"id": "5", "url": "https://x/5.json", "size": 409245},
                "libraries": []
            }"#,
        )
        .unwrap();

        assert_eq!(v.client_artifact().unwrap().size, Some(23028853));
        assert_eq!(v.asset_index.unwrap().id, "5");
    }

    #[test]
    fn missing_client_is_an_invalid_descriptor() {
        let v = VersionJson::parse(r#"{"id": "fabric-loader-0.15-1.20.1", "inheritsFrom": "1.20.1"}"#)
            .unwrap();
        assert!(matches!(
            v.client_artifact(),
            Err(LauncherError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn artifact_library_uses_declared_path() {
        let lib: LibraryEntry = serde_json::from_value(serde_json::json!({
            "name": "com.mojang:brigadier:1.1.8",
            "downloads": {"artifact": {
                "path": "com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar",
                "url": "https://libraries.minecraft.net/com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar",
                "size": 78881,
                "sha1": "5244ce82c3337bba4a196a3ce858bfaecc74404a"
            }}
        }))
        .unwrap();

        let dls = lib.downloads_for(&linux()).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].path, "com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar");
        assert_eq!(dls[0].size, Some(78881));
    }

    #[test]
    fn coordinate_library_without_url_uses_default_repository() {
        let lib: LibraryEntry = serde_json::from_value(serde_json::json!({
            "name": "net.fabricmc:sponge-mixin:0.12.5+mixin.0.8.5",
            "url": "https://maven.fabricmc.net/"
        }))
        .unwrap();
        let dls = lib.downloads_for(&linux()).unwrap();
        assert_eq!(
            dls[0].url.as_deref(),
            Some("https://maven.fabricmc.net/net/fabricmc/sponge-mixin/0.12.5+mixin.0.8.5/sponge-mixin-0.12.5+mixin.0.8.5.jar")
        );

        let bare: LibraryEntry =
            serde_json::from_value(serde_json::json!({"name": "org.ow2.asm:asm:9.6"})).unwrap();
        assert_eq!(bare.downloads_for(&linux()).unwrap()[0].url, None);
    }

    #[test]
    fn native_classifier_is_added_for_current_os() {
        let lib: LibraryEntry = serde_json::from_value(serde_json::json!({
            "name": "org.lwjgl.lwjgl:lwjgl-platform:2.9.4",
            "natives": {"linux": "natives-linux", "windows": "natives-windows-${arch}"},
            "downloads": {"classifiers": {
                "natives-linux": {"path": "org/lwjgl/natives-linux.jar", "url": "https://x/natives-linux.jar", "size": 10},
                "natives-windows-64": {"path": "org/lwjgl/natives-windows-64.jar", "url": "https://x/nw.jar", "size": 20}
            }}
        }))
        .unwrap();

        let on_linux = lib.downloads_for(&linux()).unwrap();
        assert_eq!(on_linux.len(), 1);
        assert_eq!(on_linux[0].path, "org/lwjgl/natives-linux.jar");

        let on_windows = lib.downloads_for(&Platform::new("windows", "x86_64")).unwrap();
        assert_eq!(on_windows[0].size, Some(20));

        assert!(lib.downloads_for(&Platform::new("osx", "arm64")).unwrap().is_empty());
    }

    #[test]
    fn empty_url_artifacts_are_not_fetched() {
        let lib: LibraryEntry = serde_json::from_value(serde_json::json!({
            "name": "net.minecraftforge:forge:1.20.1-47.2.0:client",
            "downloads": {"artifact": {"path": "net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-client.jar", "url": "", "size": 0}}
        }))
        .unwrap();
        assert!(lib.downloads_for(&linux()).unwrap().is_empty());
    }
}
