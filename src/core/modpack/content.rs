use std::fmt;

use async_trait::async_trait;

use super::curseforge::CurseForgeApi;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::task::TaskKind;

/// One piece of content a pack declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    /// Resolved through the CurseForge API.
    CurseForge { project_id: u64, file_id: u64 },
    /// Path inside the version directory plus mirror URLs, tried in order.
    Direct {
        path: String,
        urls: Vec<String>,
        size: Option<u64>,
    },
}

impl ContentRef {
    /// Kind of task to show while fetching; resource packs are told apart by
    /// folder when the path is known up front.
    pub fn task_kind(&self) -> TaskKind {
        match self {
            ContentRef::Direct { path, .. } if path.starts_with("resourcepacks/") => {
                TaskKind::ResourcePack
            }
            _ => TaskKind::ModFile,
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::CurseForge {
                project_id,
                file_id,
            } => write!(f, "curseforge:{project_id}/{file_id}"),
            ContentRef::Direct { path, .. } => f.write_str(path),
        }
    }
}

/// Where a content item lands and where its bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    /// Relative to the version directory, e.g. `mods/sodium.jar`.
    pub relative_path: String,
    pub urls: Vec<String>,
    pub size: Option<u64>,
}

impl ResolvedContent {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Turns a [`ContentRef`] into something downloadable. Failures are per item.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, item: &ContentRef) -> LauncherResult<ResolvedContent>;
}

/// Default resolver: direct references pass through, CurseForge references
/// go to the API when a key is configured.
#[derive(Clone, Default)]
pub struct PackContentResolver {
    curseforge: Option<CurseForgeApi>,
}

impl PackContentResolver {
    pub fn new(curseforge: Option<CurseForgeApi>) -> Self {
        Self { curseforge }
    }
}

#[async_trait]
impl ContentResolver for PackContentResolver {
    async fn resolve(&self, item: &ContentRef) -> LauncherResult<ResolvedContent> {
        match item {
            ContentRef::Direct { path, urls, size } => {
                if urls.is_empty() {
                    return Err(LauncherError::Install(format!("{path} has no download URL")));
                }
                Ok(ResolvedContent {
                    relative_path: path.clone(),
                    urls: urls.clone(),
                    size: *size,
                })
            }
            ContentRef::CurseForge {
                project_id,
                file_id,
            } => match &self.curseforge {
                Some(api) => api.resolve_file(*project_id, *file_id).await,
                None => Err(LauncherError::Install(format!(
                    "{item}: no CurseForge API key configured"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_references_pass_through() {
        let resolver = PackContentResolver::default();
        let item = ContentRef::Direct {
            path: "mods/sodium.jar".into(),
            urls: vec!["https://cdn.modrinth.com/sodium.jar".into()],
            size: Some(10),
        };
        let resolved = resolver.resolve(&item).await.unwrap();
        assert_eq!(resolved.file_name(), "sodium.jar");
        assert_eq!(resolved.size, Some(10));
        assert_eq!(item.task_kind(), TaskKind::ModFile);
    }

    #[tokio::test]
    async fn curseforge_without_key_fails_per_item() {
        let resolver = PackContentResolver::default();
        let err = resolver
            .resolve(&ContentRef::CurseForge {
                project_id: 238222,
                file_id: 4712345,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("curseforge:238222/4712345"));
    }

    #[test]
    fn resource_packs_get_their_own_task_kind() {
        let item = ContentRef::Direct {
            path: "resourcepacks/faithful.zip".into(),
            urls: vec![],
            size: None,
        };
        assert_eq!(item.task_kind(), TaskKind::ResourcePack);
    }
}
