// ─── Source Endpoints ───
// Maps logical resources to concrete URLs for the official upstream or the
// BMCLAPI mirror. Pure string construction: a bad URL only shows up at fetch time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const OFFICIAL_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const OFFICIAL_LIBRARIES: &str = "https://libraries.minecraft.net";
pub const OFFICIAL_RESOURCES: &str = "https://resources.download.minecraft.net";
pub const BMCLAPI_BASE: &str = "https://bmclapi2.bangbang93.com";

/// Which download source is active. Persisted in settings and threaded into
/// each install request; changing it affects the next request only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    #[default]
    Official,
    Mirror,
}

impl DownloadSource {
    pub fn resolver(self) -> Arc<dyn SourceResolver> {
        match self {
            DownloadSource::Official => Arc::new(OfficialSource::default()),
            DownloadSource::Mirror => Arc::new(MirrorSource::default()),
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadSource::Official => write!(f, "official"),
            DownloadSource::Mirror => write!(f, "mirror"),
        }
    }
}

impl std::str::FromStr for DownloadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "official" | "mojang" => Ok(DownloadSource::Official),
            "mirror" | "bmclapi" => Ok(DownloadSource::Mirror),
            other => Err(format!("unknown download source '{other}'")),
        }
    }
}

/// A logical resource the pipeline needs a URL for.
///
/// `url` fields carry the upstream URL found in the manifest, when there is one.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    VersionManifest,
    VersionJson { id: &'a str, url: &'a str },
    ClientJar { version_id: &'a str, url: &'a str },
    /// `path` is relative to the libraries root. `url` is `None` for
    /// coordinate-only libraries hosted on the default repository.
    Library { path: &'a str, url: Option<&'a str> },
    AssetIndex { url: &'a str },
    AssetObject { hash: &'a str },
}

pub trait SourceResolver: Send + Sync {
    fn name(&self) -> &str;

    fn url_for(&self, resource: &Resource<'_>) -> String;
}

// ── Official upstream ───────────────────────────────────

#[derive(Debug, Clone)]
pub struct OfficialSource {
    manifest_url: String,
}

impl Default for OfficialSource {
    fn default() -> Self {
        Self {
            manifest_url: OFFICIAL_MANIFEST_URL.to_string(),
        }
    }
}

impl SourceResolver for OfficialSource {
    fn name(&self) -> &str {
        "official"
    }

    fn url_for(&self, resource: &Resource<'_>) -> String {
        match *resource {
            Resource::VersionManifest => self.manifest_url.clone(),
            Resource::VersionJson { url, .. }
            | Resource::ClientJar { url, .. }
            | Resource::AssetIndex { url } => url.to_string(),
            Resource::Library { url: Some(url), .. } => url.to_string(),
            Resource::Library { path, url: None } => join_url(OFFICIAL_LIBRARIES, path),
            Resource::AssetObject { hash } => asset_object_url(OFFICIAL_RESOURCES, hash),
        }
    }
}

// ── Accelerated mirror ──────────────────────────────────

/// BMCLAPI-compatible mirror. Known upstream hosts are rewritten onto the
/// mirror; anything else (third-party mavens) passes through untouched.
#[derive(Debug, Clone)]
pub struct MirrorSource {
    base: String,
}

impl Default for MirrorSource {
    fn default() -> Self {
        Self::new(BMCLAPI_BASE)
    }
}

/// (upstream prefix, path under the mirror base)
const MIRROR_REWRITES: &[(&str, &str)] = &[
    ("https://piston-meta.mojang.com", ""),
    ("https://launchermeta.mojang.com", ""),
    ("https://piston-data.mojang.com", ""),
    ("https://launcher.mojang.com", ""),
    ("https://libraries.minecraft.net", "/maven"),
    ("https://resources.download.minecraft.net", "/assets"),
];

impl MirrorSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn rewrite(&self, url: &str) -> String {
        for (upstream, mirror_path) in MIRROR_REWRITES {
            if let Some(rest) = url.strip_prefix(upstream) {
                return format!("{}{}{}", self.base, mirror_path, rest);
            }
        }
        url.to_string()
    }
}

impl SourceResolver for MirrorSource {
    fn name(&self) -> &str {
        "mirror"
    }

    fn url_for(&self, resource: &Resource<'_>) -> String {
        match *resource {
            Resource::VersionManifest => {
                format!("{}/mc/game/version_manifest_v2.json", self.base)
            }
            Resource::VersionJson { url, .. } | Resource::AssetIndex { url } => self.rewrite(url),
            // Dedicated endpoint, noticeably faster than the generic rewrite.
            Resource::ClientJar { version_id, .. } => {
                format!("{}/version/{}/client", self.base, version_id)
            }
            Resource::Library { url: Some(url), .. } => self.rewrite(url),
            Resource::Library { path, url: None } => {
                join_url(&format!("{}/maven", self.base), path)
            }
            Resource::AssetObject { hash } => {
                asset_object_url(&format!("{}/assets", self.base), hash)
            }
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.replace('\\', "/").trim_start_matches('/')
    )
}

fn asset_object_url(base: &str, hash: &str) -> String {
    let prefix = hash.get(..2).unwrap_or(hash);
    format!("{}/{}/{}", base.trim_end_matches('/'), prefix, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_URL: &str =
        "https://piston-data.mojang.com/v1/objects/fd19469fed4a4b4c15b2d5133985f0e3e7816a8a/client.jar";

    #[test]
    fn official_passes_manifest_urls_through() {
        let src = OfficialSource::default();
        assert_eq!(src.url_for(&Resource::VersionManifest), OFFICIAL_MANIFEST_URL);
        assert_eq!(
            src.url_for(&Resource::ClientJar {
                version_id: "1.20.1",
                url: CLIENT_URL
            }),
            CLIENT_URL
        );
    }

    #[test]
    fn official_builds_coordinate_library_urls() {
        let src = OfficialSource::default();
        let url = src.url_for(&Resource::Library {
            path: "com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar",
            url: None,
        });
        assert_eq!(
            url,
            "https://libraries.minecraft.net/com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar"
        );
    }

    #[test]
    fn mirror_uses_client_fast_path() {
        let src = MirrorSource::default();
        let url = src.url_for(&Resource::ClientJar {
            version_id: "1.20.1",
            url: CLIENT_URL,
        });
        assert_eq!(url, "https://bmclapi2.bangbang93.com/version/1.20.1/client");
    }

    #[test]
    fn mirror_rewrites_known_hosts_only() {
        let src = MirrorSource::new("https://mirror.test/");
        assert_eq!(
            src.url_for(&Resource::Library {
                path: "a/b.jar",
                url: Some("https://libraries.minecraft.net/a/b.jar"),
            }),
            "https://mirror.test/maven/a/b.jar"
        );
        assert_eq!(
            src.url_for(&Resource::Library {
                path: "net/fabricmc/x.jar",
                url: Some("https://maven.fabricmc.net/net/fabricmc/x.jar"),
            }),
            "https://maven.fabricmc.net/net/fabricmc/x.jar"
        );
        assert_eq!(
            src.url_for(&Resource::AssetObject { hash: "abcdef" }),
            "https://mirror.test/assets/ab/abcdef"
        );
    }

    #[test]
    fn source_parses_from_settings_strings() {
        assert_eq!("Mirror".parse::<DownloadSource>(), Ok(DownloadSource::Mirror));
        assert_eq!("official".parse::<DownloadSource>(), Ok(DownloadSource::Official));
        assert!("ftp".parse::<DownloadSource>().is_err());
    }
}
