use std::fmt;

use serde::Serialize;

use crate::core::error::{LauncherError, LauncherResult};

pub const CURSEFORGE_MANIFEST: &str = "manifest.json";
pub const MODRINTH_INDEX: &str = "modrinth.index.json";

/// Top-level folders that mark a flat "copy me into the game dir" archive.
const MANUAL_FOLDERS: &[&str] = &[
    "mods",
    "config",
    "resourcepacks",
    "shaderpacks",
    "overrides",
    "defaultconfigs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModpackFormat {
    CurseForge,
    Modrinth,
    Manual,
}

impl fmt::Display for ModpackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModpackFormat::CurseForge => "CurseForge",
            ModpackFormat::Modrinth => "Modrinth",
            ModpackFormat::Manual => "manual",
        };
        f.write_str(name)
    }
}

impl ModpackFormat {
    /// Classify an archive by its entry names.
    pub fn detect<'a, I>(entries: I) -> LauncherResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut has_manifest = false;
        let mut has_index = false;
        let mut has_manual_folder = false;

        for entry in entries {
            let entry = entry.trim_start_matches("./");
            match entry {
                CURSEFORGE_MANIFEST => has_manifest = true,
                MODRINTH_INDEX => has_index = true,
                _ => {
                    let top = entry.split(['/', '\\']).next().unwrap_or("");
                    let nested = entry.len() > top.len();
                    if nested && MANUAL_FOLDERS.contains(&top) {
                        has_manual_folder = true;
                    }
                }
            }
        }

        if has_manifest {
            Ok(ModpackFormat::CurseForge)
        } else if has_index {
            Ok(ModpackFormat::Modrinth)
        } else if has_manual_folder {
            Ok(ModpackFormat::Manual)
        } else {
            Err(LauncherError::UnsupportedModpack(format!(
                "expected {CURSEFORGE_MANIFEST}, {MODRINTH_INDEX} or one of {} at the archive root",
                MANUAL_FOLDERS.join("/, ")
            )))
        }
    }
}
