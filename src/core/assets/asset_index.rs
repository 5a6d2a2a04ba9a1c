use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::downloader::{file_matches, TransferEngine};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::source::{Resource, SourceResolver};

/// Top-level asset index JSON structure.
#[derive(Debug, Deserialize)]
pub struct AssetIndex {
    pub objects: HashMap<String, AssetObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssetFetchReport {
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// Location of an index file inside the assets root.
pub fn index_path(assets_dir: &Path, index_id: &str) -> PathBuf {
    assets_dir.join("indexes").join(format!("{index_id}.json"))
}

/// `objects/<first two hash chars>/<hash>`
pub fn object_path(assets_dir: &Path, hash: &str) -> PathBuf {
    let prefix = hash.get(..2).unwrap_or(hash);
    assets_dir.join("objects").join(prefix).join(hash)
}

/// Downloads the objects referenced by an index already on disk.
///
/// Best effort: individual failures are counted and logged, cancellation aborts.
pub struct AssetManager {
    engine: TransferEngine,
    resolver: Arc<dyn SourceResolver>,
    concurrency: usize,
}

impl AssetManager {
    pub fn new(engine: TransferEngine, resolver: Arc<dyn SourceResolver>, concurrency: usize) -> Self {
        Self {
            engine,
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn fetch_objects(
        &self,
        assets_dir: &Path,
        index_file: &Path,
        cancel: &CancellationToken,
    ) -> LauncherResult<AssetFetchReport> {
        let raw = tokio::fs::read_to_string(index_file)
            .await
            .map_err(LauncherError::io(index_file))?;
        let index: AssetIndex = serde_json::from_str(&raw)?;

        // Several names may share one object.
        let mut unique: HashMap<String, AssetObject> = HashMap::new();
        for obj in index.objects.into_values() {
            unique.entry(obj.hash.clone()).or_insert(obj);
        }

        let mut report = AssetFetchReport::default();
        let mut pending = Vec::new();
        for obj in unique.into_values() {
            let dest = object_path(assets_dir, &obj.hash);
            if file_matches(&dest, obj.size, None).await {
                report.already_present += 1;
            } else {
                pending.push((obj, dest));
            }
        }

        info!(
            "Downloading {} asset objects ({} already cached)",
            pending.len(),
            report.already_present
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        for (obj, dest) in pending {
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            let url = self.resolver.url_for(&Resource::AssetObject { hash: &obj.hash });
            let cancel = cancel.clone();

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| LauncherError::Cancelled)?;
                engine
                    .download_file(&url, &dest, &cancel, &mut |_| {})
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        if !e.is_cancelled() {
                            warn!("Asset {} failed: {}", obj.hash, e);
                        }
                        e
                    })
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => report.downloaded += 1,
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(_)) | Err(_) => report.failed += 1,
            }
        }

        if cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }

        if report.failed > 0 {
            warn!("{} asset downloads failed", report.failed);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::build_http_client;
    use crate::core::source::MirrorSource;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn object_paths_use_hash_prefix() {
        let p = object_path(Path::new("assets"), "bdf48ef6b5d0d23bbb02e17d04865216179f510a");
        assert_eq!(
            p,
            Path::new("assets/objects/bd/bdf48ef6b5d0d23bbb02e17d04865216179f510a")
        );
        assert_eq!(index_path(Path::new("assets"), "5"), Path::new("assets/indexes/5.json"));
    }

    #[tokio::test]
    async fn fetches_missing_objects_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/aa/aa11"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"sound".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/assets/bb/bb22"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let assets = dir.path().join("assets");
        let index = index_path(&assets, "5");
        std::fs::create_dir_all(index.parent().unwrap()).unwrap();
        std::fs::write(
            &index,
            r#"{"objects": {
                "minecraft/sounds/a.ogg": {"hash": "aa11", "size": 5},
                "minecraft/sounds/a_copy.ogg": {"hash": "aa11", "size": 5},
                "minecraft/lang/x.json": {"hash": "bb22", "size": 3},
                "icons/icon.png": {"hash": "cc33", "size": 4}
            }}"#,
        )
        .unwrap();
        std::fs::create_dir_all(assets.join("objects/cc")).unwrap();
        std::fs::write(assets.join("objects/cc/cc33"), b"icon").unwrap();

        let manager = AssetManager::new(
            TransferEngine::new(build_http_client().unwrap()),
            Arc::new(MirrorSource::new(server.uri())),
            4,
        );
        let report = manager
            .fetch_objects(&assets, &index, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            report,
            AssetFetchReport {
                downloaded: 1,
                already_present: 1,
                failed: 1
            }
        );
        assert_eq!(std::fs::read(assets.join("objects/aa/aa11")).unwrap(), b"sound");
    }
}
