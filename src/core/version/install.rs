// ─── Version Installer ───
// Descriptor → plan → client jar → libraries (bounded fan-out) → asset index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manifest::VersionManifest;
use super::plan::InstallPlan;
use super::progress::{InstallProgress, ProgressSink, ProgressTracker};
use super::rules::Platform;
use super::version_file::{LibraryDownload, VersionJson};
use crate::core::assets::{index_path, AssetFetchReport, AssetManager};
use crate::core::downloader::{file_matches, TransferEngine};
use crate::core::error::{InstallOutcome, LauncherError, LauncherResult};
use crate::core::source::{Resource, SourceResolver};
use crate::core::task::{TaskKind, TaskRegistry};

#[derive(Debug, Clone)]
pub struct VersionInstallOptions {
    pub max_concurrent_downloads: usize,
    /// Also require the declared SHA-1 before treating a file as present.
    pub verify_sha1_on_skip: bool,
    pub fetch_assets: bool,
}

impl Default for VersionInstallOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            verify_sha1_on_skip: false,
            fetch_assets: false,
        }
    }
}

#[derive(Clone)]
pub struct VersionInstallRequest {
    pub version_id: String,
    pub game_dir: PathBuf,
    /// Folder/file name under `versions/`; defaults to the version id.
    pub display_name: Option<String>,
    pub resolver: Arc<dyn SourceResolver>,
    /// A second libraries tree consulted before downloading. Staged installs
    /// point this at the live tree while writing into a private game dir.
    pub shared_libraries_dir: Option<PathBuf>,
}

impl VersionInstallRequest {
    pub fn new(
        version_id: impl Into<String>,
        game_dir: impl Into<PathBuf>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        Self {
            version_id: version_id.into(),
            game_dir: game_dir.into(),
            display_name: None,
            resolver,
            shared_libraries_dir: None,
        }
    }

    pub fn version_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.version_id)
    }
}

#[derive(Debug, Clone)]
pub struct VersionInstallReport {
    pub version_name: String,
    pub descriptor_path: PathBuf,
    pub client_path: PathBuf,
    pub libraries_downloaded: usize,
    pub libraries_present: usize,
    pub libraries_failed: Vec<String>,
    pub asset_index_path: Option<PathBuf>,
    pub assets: Option<AssetFetchReport>,
}

enum LibraryOutcome {
    Downloaded,
    Present,
    Failed(String),
    Cancelled,
}

/// Everything a library worker needs, shared across the fan-out.
struct LibraryJob {
    engine: TransferEngine,
    resolver: Arc<dyn SourceResolver>,
    tracker: Arc<ProgressTracker>,
    libraries_dir: PathBuf,
    shared_dir: Option<PathBuf>,
    verify_sha1: bool,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct VersionInstaller {
    engine: TransferEngine,
    registry: TaskRegistry,
    options: VersionInstallOptions,
}

impl VersionInstaller {
    pub fn new(engine: TransferEngine, registry: TaskRegistry, options: VersionInstallOptions) -> Self {
        Self {
            engine,
            registry,
            options,
        }
    }

    pub fn options(&self) -> &VersionInstallOptions {
        &self.options
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Install as a tracked task. Never returns an error: the task always
    /// ends in the state the outcome describes.
    pub async fn install(
        &self,
        request: &VersionInstallRequest,
        cancel: &CancellationToken,
        sink: Option<ProgressSink>,
    ) -> InstallOutcome {
        let task = self
            .registry
            .create_linked(request.version_name(), TaskKind::BaseVersion, cancel);
        task.set_message("Resolving version");

        let task_for_sink = task.clone();
        let wrapped: ProgressSink = Arc::new(move |p: &InstallProgress| {
            task_for_sink.update(p.percentage, &p.status, Some(p.speed));
            if let Some(outer) = &sink {
                outer(p);
            }
        });

        let result = self
            .install_version(request, task.cancel_token(), Some(wrapped))
            .await
            .map(|report| {
                info!(
                    "Installed {} ({} libraries downloaded, {} present, {} failed)",
                    report.version_name,
                    report.libraries_downloaded,
                    report.libraries_present,
                    report.libraries_failed.len()
                );
            });

        let outcome = task.finish(result);
        match &outcome {
            InstallOutcome::Failed(message) => warn!("Install of {} failed: {}", request.version_name(), message),
            InstallOutcome::Cancelled => info!("Install of {} cancelled", request.version_name()),
            InstallOutcome::Completed => {}
        }
        outcome
    }

    /// The install pipeline itself, without task bookkeeping.
    pub async fn install_version(
        &self,
        request: &VersionInstallRequest,
        cancel: &CancellationToken,
        sink: Option<ProgressSink>,
    ) -> LauncherResult<VersionInstallReport> {
        let name = request.version_name().to_string();
        let resolver = request.resolver.clone();
        let version_dir = request.game_dir.join("versions").join(&name);

        // ── 1. Descriptor ──
        let manifest = VersionManifest::fetch(&self.engine, resolver.as_ref(), cancel).await?;
        let entry = manifest.require_version(&request.version_id)?;
        let descriptor_url = resolver.url_for(&Resource::VersionJson {
            id: &entry.id,
            url: &entry.url,
        });
        info!("Fetching version descriptor {} from {}", entry.id, descriptor_url);
        let raw = self.engine.fetch_text(&descriptor_url, cancel).await?;

        // ── 2. Parse ──
        let version = VersionJson::parse(&raw)?;
        let descriptor_path = version_dir.join(format!("{name}.json"));
        VersionJson::save_raw(&raw, &descriptor_path).await?;

        // ── 3/4. Filter + plan ──
        let plan = InstallPlan::build(&version, &Platform::current())?;
        info!(
            "Plan for {}: {} libraries ({} filtered by rules), {} files, {} bytes",
            name,
            plan.libraries.len(),
            plan.filtered_out,
            plan.total_files,
            plan.total_bytes
        );
        let tracker = Arc::new(ProgressTracker::new(plan.total_files, plan.total_bytes, sink));

        // ── 5. Client jar ──
        tracker.status("Downloading client");
        let client_path = version_dir.join(format!("{name}.jar"));
        let client_name = format!("{name}.jar");
        let client_size = plan.client.size.unwrap_or(0);
        let client_sha1 = self.sha1_for_skip(plan.client.sha1.as_deref());
        if plan.client.size.is_some() && file_matches(&client_path, client_size, client_sha1).await {
            debug!("Client jar already present: {:?}", client_path);
        } else {
            let url = resolver.url_for(&Resource::ClientJar {
                version_id: &version.id,
                url: &plan.client.url,
            });
            self.engine
                .download_file(&url, &client_path, cancel, &mut |p| {
                    tracker.file_progress(&client_name, p)
                })
                .await?;
        }
        tracker.file_finished(&client_name, client_size);

        // ── 6. Libraries ──
        tracker.status("Downloading libraries");
        let job = Arc::new(LibraryJob {
            engine: self.engine.clone(),
            resolver: resolver.clone(),
            tracker: tracker.clone(),
            libraries_dir: request.game_dir.join("libraries"),
            shared_dir: request.shared_libraries_dir.clone(),
            verify_sha1: self.options.verify_sha1_on_skip,
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_downloads.max(1)));
        let mut workers = JoinSet::new();
        for lib in plan.libraries.iter().cloned() {
            workers.spawn(fetch_library(job.clone(), lib, semaphore.clone()));
        }

        let mut libraries_downloaded = 0;
        let mut libraries_present = 0;
        let mut libraries_failed = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(LibraryOutcome::Downloaded) => libraries_downloaded += 1,
                Ok(LibraryOutcome::Present) => libraries_present += 1,
                Ok(LibraryOutcome::Failed(path)) => libraries_failed.push(path),
                Ok(LibraryOutcome::Cancelled) => {}
                Err(e) => warn!("Library worker panicked: {}", e),
            }
        }
        if cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }
        if !libraries_failed.is_empty() {
            warn!("{} libraries could not be downloaded", libraries_failed.len());
        }

        // ── 7. Asset index ──
        let assets_dir = request.game_dir.join("assets");
        let mut asset_index_path = None;
        let mut assets = None;
        if let Some(index) = &plan.asset_index {
            tracker.status("Downloading asset index");
            let dest = index_path(&assets_dir, &index.id);
            let index_name = format!("{}.json", index.id);
            let sha1 = self.sha1_for_skip(index.sha1.as_deref());
            let present = match index.size {
                Some(size) => file_matches(&dest, size, sha1).await,
                None => false,
            };
            if !present {
                let url = resolver.url_for(&Resource::AssetIndex { url: &index.url });
                self.engine
                    .download_file(&url, &dest, cancel, &mut |p| {
                        tracker.file_progress(&index_name, p)
                    })
                    .await?;
            }
            tracker.file_finished(&index_name, index.size.unwrap_or(0));

            if self.options.fetch_assets {
                tracker.status("Downloading assets");
                assets = self.fetch_assets(&assets_dir, &dest, resolver.clone(), cancel).await?;
            }
            asset_index_path = Some(dest);
        }

        // ── 8. Done ──
        tracker.finish("Installed");

        Ok(VersionInstallReport {
            version_name: name,
            descriptor_path,
            client_path,
            libraries_downloaded,
            libraries_present,
            libraries_failed,
            asset_index_path,
            assets,
        })
    }

    fn sha1_for_skip<'a>(&self, sha1: Option<&'a str>) -> Option<&'a str> {
        if self.options.verify_sha1_on_skip {
            sha1
        } else {
            None
        }
    }

    /// Best effort: only cancellation aborts the install.
    async fn fetch_assets(
        &self,
        assets_dir: &Path,
        index_file: &Path,
        resolver: Arc<dyn SourceResolver>,
        cancel: &CancellationToken,
    ) -> LauncherResult<Option<AssetFetchReport>> {
        let task = self
            .registry
            .create_linked("Game assets", TaskKind::AssetSet, cancel);
        let manager = AssetManager::new(
            self.engine.clone(),
            resolver,
            self.options.max_concurrent_downloads,
        );
        let result = manager
            .fetch_objects(assets_dir, index_file, task.cancel_token())
            .await;
        match result {
            Ok(report) => {
                task.finish(Ok(()));
                Ok(Some(report))
            }
            Err(e) if e.is_cancelled() => {
                task.finish(Err(LauncherError::Cancelled));
                Err(e)
            }
            Err(e) => {
                warn!("Asset download skipped: {}", e);
                task.finish(Err(e));
                Ok(None)
            }
        }
    }
}

async fn library_present(job: &LibraryJob, lib: &LibraryDownload) -> bool {
    let sha1 = if job.verify_sha1 { lib.sha1.as_deref() } else { None };
    let mut candidates = vec![job.libraries_dir.join(&lib.path)];
    if let Some(shared) = &job.shared_dir {
        candidates.push(shared.join(&lib.path));
    }

    for candidate in candidates {
        let present = match lib.size {
            Some(size) => file_matches(&candidate, size, sha1).await,
            // Nothing to compare against: existence is all we can check.
            None => tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
        };
        if present {
            return true;
        }
    }
    false
}

async fn fetch_library(
    job: Arc<LibraryJob>,
    lib: LibraryDownload,
    semaphore: Arc<Semaphore>,
) -> LibraryOutcome {
    let _permit = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return LibraryOutcome::Cancelled,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return LibraryOutcome::Cancelled,
        },
    };
    if job.cancel.is_cancelled() {
        return LibraryOutcome::Cancelled;
    }

    let size = lib.size.unwrap_or(0);
    if library_present(&job, &lib).await {
        debug!("Library present: {}", lib.path);
        job.tracker.file_finished(&lib.path, size);
        return LibraryOutcome::Present;
    }

    let url = job.resolver.url_for(&Resource::Library {
        path: &lib.path,
        url: lib.url.as_deref(),
    });
    let dest = job.libraries_dir.join(&lib.path);
    let tracker = &job.tracker;
    let result = job
        .engine
        .download_file(&url, &dest, &job.cancel, &mut |p| {
            tracker.file_progress(&lib.path, p)
        })
        .await;

    match result {
        Ok(_) => {
            tracker.file_finished(&lib.path, size);
            LibraryOutcome::Downloaded
        }
        Err(e) if e.is_cancelled() => LibraryOutcome::Cancelled,
        Err(e) => {
            warn!("Library {} failed, skipping: {}", lib.name, e);
            tracker.file_finished(&lib.path, size);
            LibraryOutcome::Failed(lib.path)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{mount_version, LIB_SIZE};
    use super::*;
    use crate::core::http::build_http_client;
    use crate::core::source::MirrorSource;
    use crate::core::task::TaskStatus;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn installer(concurrency: usize) -> VersionInstaller {
        VersionInstaller::new(
            TransferEngine::new(build_http_client().unwrap()),
            TaskRegistry::default(),
            VersionInstallOptions {
                max_concurrent_downloads: concurrency,
                ..Default::default()
            },
        )
    }

    fn request(server: &MockServer, game_dir: &Path) -> VersionInstallRequest {
        VersionInstallRequest::new("1.20.1", game_dir, Arc::new(MirrorSource::new(server.uri())))
    }

    async fn library_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r: &&Request| r.url.path().starts_with("/maven/"))
            .count()
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    stack.push(p);
                } else if p.to_string_lossy().ends_with(".part") {
                    found.push(p);
                }
            }
        }
        found
    }

    #[tokio::test]
    async fn mirror_install_fetches_only_allowed_libraries() {
        let server = MockServer::start().await;
        mount_version(&server, 40, &[5, 17, 33]).await;
        let dir = tempdir().unwrap();

        let report = installer(8)
            .install_version(&request(&server, dir.path()), &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.libraries_downloaded, 37);
        assert!(report.libraries_failed.is_empty());
        assert_eq!(library_requests(&server).await, 37);

        let version_dir = dir.path().join("versions/1.20.1");
        assert_eq!(std::fs::metadata(version_dir.join("1.20.1.jar")).unwrap().len(), 1000);
        let saved = std::fs::read_to_string(version_dir.join("1.20.1.json")).unwrap();
        assert!(saved.contains("net.minecraft.client.main.Main"));
        assert!(dir.path().join("assets/indexes/5.json").is_file());
        assert!(!dir
            .path()
            .join("libraries/org/example/lib5/1.0/lib5-1.0.jar")
            .exists());
    }

    #[tokio::test]
    async fn second_run_transfers_no_libraries() {
        let server = MockServer::start().await;
        mount_version(&server, 10, &[]).await;
        let dir = tempdir().unwrap();
        let installer = installer(4);
        let req = request(&server, dir.path());

        installer
            .install_version(&req, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(library_requests(&server).await, 10);

        let report = installer
            .install_version(&req, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(report.libraries_present, 10);
        assert_eq!(report.libraries_downloaded, 0);
        assert_eq!(library_requests(&server).await, 10);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let server = MockServer::start().await;
        mount_version(&server, 12, &[3]).await;
        let dir = tempdir().unwrap();

        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink_seen = seen.clone();
        let sink: ProgressSink = Arc::new(move |p: &InstallProgress| {
            sink_seen.lock().unwrap().push(p.percentage);
        });

        let outcome = installer(3)
            .install(&request(&server, dir.path()), &CancellationToken::new(), Some(sink))
            .await;
        assert_eq!(outcome, InstallOutcome::Completed);

        let pcts = seen.lock().unwrap().clone();
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]), "{pcts:?}");
        assert_eq!(pcts.last().copied(), Some(100.0));
        assert_eq!(pcts.iter().filter(|p| **p == 100.0).count(), 1);
    }

    #[tokio::test]
    async fn failed_library_is_skipped_but_failed_client_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maven/org/example/lib2/1.0/lib2-1.0.jar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_version(&server, 4, &[]).await;
        let dir = tempdir().unwrap();

        let report = installer(2)
            .install_version(&request(&server, dir.path()), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(report.libraries_downloaded, 3);
        assert_eq!(report.libraries_failed, vec!["org/example/lib2/1.0/lib2-1.0.jar"]);

        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version/1.20.1/client"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;
        mount_version(&broken, 2, &[]).await;
        let installer = installer(2);
        let outcome = installer
            .install(&request(&broken, dir.path().join("other").as_path()), &CancellationToken::new(), None)
            .await;
        assert!(matches!(outcome, InstallOutcome::Failed(ref m) if m.contains("500")));
        let task = &installer.registry.snapshot()[0];
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_keeps_committed_libraries_intact() {
        let server = MockServer::start().await;
        mount_version(&server, 8, &[]).await;
        let dir = tempdir().unwrap();

        let cancel = CancellationToken::new();
        let sink_cancel = cancel.clone();
        let sink: ProgressSink = Arc::new(move |p: &InstallProgress| {
            // client jar + two libraries done
            if p.completed_files >= 3 {
                sink_cancel.cancel();
            }
        });

        let installer = installer(1);
        let outcome = installer
            .install(&request(&server, dir.path()), &cancel, Some(sink))
            .await;
        assert_eq!(outcome, InstallOutcome::Cancelled);
        assert_eq!(installer.registry.snapshot()[0].status, TaskStatus::Cancelled);

        let libs = dir.path().join("libraries");
        let committed: Vec<_> = (0..8)
            .map(|i| libs.join(format!("org/example/lib{i}/1.0/lib{i}-1.0.jar")))
            .filter(|p| p.exists())
            .collect();
        assert!(committed.len() >= 2 && committed.len() < 8, "{committed:?}");
        for lib in &committed {
            assert_eq!(std::fs::metadata(lib).unwrap().len(), LIB_SIZE as u64);
        }
        assert!(part_files(dir.path()).is_empty());
        assert!(!dir.path().join("assets/indexes/5.json").exists());
    }

    #[tokio::test]
    async fn shared_tree_counts_as_present() {
        let server = MockServer::start().await;
        mount_version(&server, 3, &[]).await;
        let dir = tempdir().unwrap();
        let shared = dir.path().join("live/libraries");
        let lib0 = shared.join("org/example/lib0/1.0/lib0-1.0.jar");
        std::fs::create_dir_all(lib0.parent().unwrap()).unwrap();
        std::fs::write(&lib0, vec![b'l'; LIB_SIZE]).unwrap();

        let mut req = request(&server, &dir.path().join("temp"));
        req.shared_libraries_dir = Some(shared);
        let report = installer(2)
            .install_version(&req, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.libraries_present, 1);
        assert_eq!(report.libraries_downloaded, 2);
    }
}
