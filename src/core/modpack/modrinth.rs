use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use super::content::ContentRef;
use super::format::ModpackFormat;
use super::plan::ModpackPlan;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::fs_util::safe_join;
use crate::core::loaders::{LoaderFamily, LoaderSpec};

/// `modrinth.index.json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthIndex {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub files: Vec<ModrinthFile>,
    pub dependencies: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthFile {
    pub path: String,
    #[serde(default)]
    pub downloads: Vec<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub env: Option<ModrinthEnv>,
}

#[derive(Debug, Deserialize)]
pub struct ModrinthEnv {
    #[serde(default)]
    pub client: Option<String>,
}

impl ModrinthFile {
    fn client_supported(&self) -> bool {
        self.env
            .as_ref()
            .and_then(|e| e.client.as_deref())
            .map(|c| c != "unsupported")
            .unwrap_or(true)
    }
}

impl ModrinthIndex {
    pub fn into_plan(self) -> LauncherResult<ModpackPlan> {
        let game_version = self
            .dependencies
            .get("minecraft")
            .cloned()
            .ok_or_else(|| {
                LauncherError::UnsupportedModpack("index declares no minecraft dependency".into())
            })?;

        let mut loader = None;
        for (key, version) in &self.dependencies {
            if key == "minecraft" {
                continue;
            }
            match key.parse::<LoaderFamily>() {
                Ok(family) if loader.is_none() => {
                    loader = Some(LoaderSpec {
                        family,
                        version: version.clone(),
                    })
                }
                Ok(family) => warn!("Ignoring extra loader dependency {}", family),
                Err(_) => debug!("Ignoring unknown dependency {}", key),
            }
        }

        let mut content = Vec::new();
        for file in self.files {
            if !file.client_supported() {
                debug!("Skipping server-only file {}", file.path);
                continue;
            }
            if safe_join(Path::new(""), &file.path).is_err() {
                warn!("Skipping file with unsafe path {}", file.path);
                continue;
            }
            content.push(ContentRef::Direct {
                path: file.path.replace('\\', "/"),
                urls: file.downloads,
                size: file.file_size,
            });
        }

        Ok(ModpackPlan {
            format: ModpackFormat::Modrinth,
            name: self.name,
            game_version,
            loader,
            content,
            // client-overrides last so it wins over shared overrides.
            override_prefixes: vec!["overrides/".into(), "client-overrides/".into()],
        })
    }
}
