use std::path::Path;

use tracing::info;

use super::archive;
use super::content::ContentRef;
use super::curseforge::CurseForgeManifest;
use super::format::{ModpackFormat, CURSEFORGE_MANIFEST, MODRINTH_INDEX};
use super::modrinth::ModrinthIndex;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::loaders::LoaderSpec;

/// What a pack asks for, independent of its archive format.
#[derive(Debug, Clone)]
pub struct ModpackPlan {
    pub format: ModpackFormat,
    pub name: Option<String>,
    pub game_version: String,
    pub loader: Option<LoaderSpec>,
    pub content: Vec<ContentRef>,
    /// Archive prefixes copied into the version directory, applied in order.
    pub override_prefixes: Vec<String>,
}

/// Values the caller supplies for archives that cannot describe themselves.
#[derive(Debug, Clone, Default)]
pub struct PlanHints {
    pub game_version: Option<String>,
    pub loader: Option<LoaderSpec>,
}

/// Classify `archive` and read its plan.
pub async fn read_plan(archive: &Path, hints: &PlanHints) -> LauncherResult<ModpackPlan> {
    let names = archive::entry_names(archive).await?;
    let format = ModpackFormat::detect(names.iter().map(String::as_str))?;
    info!("Detected {} modpack: {}", format, archive.display());

    let mut plan = match format {
        ModpackFormat::CurseForge => {
            archive::read_json::<CurseForgeManifest>(archive, CURSEFORGE_MANIFEST)
                .await?
                .into_plan()?
        }
        ModpackFormat::Modrinth => {
            archive::read_json::<ModrinthIndex>(archive, MODRINTH_INDEX)
                .await?
                .into_plan()?
        }
        ModpackFormat::Manual => manual_plan(&names, hints)?,
    };

    // An explicit loader from the caller replaces whatever the pack says.
    if let Some(loader) = &hints.loader {
        plan.loader = Some(loader.clone());
    }
    Ok(plan)
}

fn manual_plan(names: &[String], hints: &PlanHints) -> LauncherResult<ModpackPlan> {
    let game_version = hints.game_version.clone().ok_or_else(|| {
        LauncherError::UnsupportedModpack(
            "manual archives do not declare a game version; pass one explicitly".into(),
        )
    })?;

    // A top-level overrides/ folder is unwrapped; otherwise the archive root is the tree.
    let prefix = if names.iter().any(|n| n.starts_with("overrides/")) {
        "overrides/"
    } else {
        ""
    };

    Ok(ModpackPlan {
        format: ModpackFormat::Manual,
        name: None,
        game_version,
        loader: hints.loader.clone(),
        content: Vec::new(),
        override_prefixes: vec![prefix.to_string()],
    })
}
