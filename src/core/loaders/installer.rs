use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::LoaderContext;
use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderFamily {
    Forge,
    Fabric,
    Quilt,
    NeoForge,
}

impl fmt::Display for LoaderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderFamily::Forge => "forge",
            LoaderFamily::Fabric => "fabric",
            LoaderFamily::Quilt => "quilt",
            LoaderFamily::NeoForge => "neoforge",
        };
        f.write_str(name)
    }
}

impl FromStr for LoaderFamily {
    type Err = LauncherError;

    /// Accepts both short names and Modrinth dependency keys (`fabric-loader`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forge" => Ok(LoaderFamily::Forge),
            "fabric" | "fabric-loader" => Ok(LoaderFamily::Fabric),
            "quilt" | "quilt-loader" => Ok(LoaderFamily::Quilt),
            "neoforge" | "neoforged" => Ok(LoaderFamily::NeoForge),
            other => Err(LauncherError::Loader(format!("unknown loader '{other}'"))),
        }
    }
}

/// A loader a pack declares: family plus exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSpec {
    pub family: LoaderFamily,
    pub version: String,
}

impl LoaderSpec {
    /// Parse the `<family>-<version>` ids used by CurseForge manifests,
    /// e.g. `forge-47.2.0` or `fabric-0.15.7`.
    pub fn parse_id(id: &str) -> LauncherResult<Self> {
        let (family, version) = id
            .split_once('-')
            .ok_or_else(|| LauncherError::Loader(format!("malformed loader id '{id}'")))?;
        if version.is_empty() {
            return Err(LauncherError::Loader(format!("loader id '{id}' has no version")));
        }
        Ok(Self {
            family: family.parse()?,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for LoaderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.version)
    }
}

/// One implementation per loader family. Opaque to the installer pipeline;
/// may perform its own downloads.
#[async_trait]
pub trait LoaderInstaller: Send + Sync {
    async fn install_loader(&self, ctx: LoaderContext<'_>) -> LauncherResult<()>;
}

/// Installed loader implementations keyed by family.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    installers: HashMap<LoaderFamily, Arc<dyn LoaderInstaller>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, family: LoaderFamily, installer: Arc<dyn LoaderInstaller>) {
        self.installers.insert(family, installer);
    }

    pub fn with(mut self, family: LoaderFamily, installer: Arc<dyn LoaderInstaller>) -> Self {
        self.register(family, installer);
        self
    }

    pub fn get(&self, family: LoaderFamily) -> LauncherResult<Arc<dyn LoaderInstaller>> {
        self.installers
            .get(&family)
            .cloned()
            .ok_or_else(|| LauncherError::Loader(format!("no installer available for {family}")))
    }
}
