// ─── Staged Modpack Installer ───
// Builds the whole version tree under a private temp root and only then
// swaps it into `versions/`. The temp root is removed on every exit path.
//
//   Preparing → DownloadingBase → InstallingLoader → FetchingContent
//     → WritingOverrides → FinalizingMetadata → Migrating → Cleanup

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive;
use super::content::{ContentRef, ContentResolver};
use super::format::ModpackFormat;
use super::metadata::{repair_metadata, RepairedMetadata};
use super::plan::{read_plan, ModpackPlan, PlanHints};
use crate::core::downloader::TransferEngine;
use crate::core::error::{InstallOutcome, LauncherError, LauncherResult};
use crate::core::fs_util::{merge_if_absent, remove_dir_with_retry, retry, safe_join, RetryPolicy};
use crate::core::loaders::{LoaderContext, LoaderRegistry};
use crate::core::source::SourceResolver;
use crate::core::task::{TaskHandle, TaskKind, TaskRegistry};
use crate::core::version::{InstallProgress, ProgressSink, VersionInstallRequest, VersionInstaller};

/// Parent of every temp root, inside the game dir so the final move is a rename.
pub const STAGING_DIR: &str = ".staging";
pub const ISOLATION_MARKER: &str = "launcher_isolation.json";

/// `(status, percentage 0..=100)`
pub type ModpackProgress = Arc<dyn Fn(&str, f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Preparing,
    DownloadingBase,
    InstallingLoader,
    FetchingContent,
    WritingOverrides,
    FinalizingMetadata,
    Migrating,
    Cleanup,
}

impl InstallPhase {
    pub fn label(self) -> &'static str {
        match self {
            InstallPhase::Preparing => "Preparing",
            InstallPhase::DownloadingBase => "Downloading base game",
            InstallPhase::InstallingLoader => "Installing loader",
            InstallPhase::FetchingContent => "Fetching content",
            InstallPhase::WritingOverrides => "Writing overrides",
            InstallPhase::FinalizingMetadata => "Finalizing metadata",
            InstallPhase::Migrating => "Migrating",
            InstallPhase::Cleanup => "Cleaning up",
        }
    }

    /// Share of the overall bar, as `(start, end)` percentages.
    fn span(self) -> (f64, f64) {
        match self {
            InstallPhase::Preparing => (0.0, 2.0),
            InstallPhase::DownloadingBase => (2.0, 40.0),
            InstallPhase::InstallingLoader => (40.0, 55.0),
            InstallPhase::FetchingContent => (55.0, 85.0),
            InstallPhase::WritingOverrides => (85.0, 92.0),
            InstallPhase::FinalizingMetadata => (92.0, 95.0),
            InstallPhase::Migrating => (95.0, 98.0),
            InstallPhase::Cleanup => (98.0, 99.0),
        }
    }
}

/// Maps phase-local progress onto one non-decreasing bar and mirrors it into the task.
struct PhaseReporter {
    task: TaskHandle,
    sink: Option<ModpackProgress>,
    high_water: Mutex<f64>,
}

impl PhaseReporter {
    fn report(&self, status: &str, pct: f64) {
        let mut high_water = self.high_water.lock().unwrap_or_else(|e| e.into_inner());
        if pct > *high_water {
            *high_water = pct;
        }
        self.task.update(*high_water, status, None);
        if let Some(sink) = &self.sink {
            sink(status, *high_water);
        }
    }

    fn enter(&self, phase: InstallPhase) {
        info!("Modpack install: {}", phase.label());
        self.report(phase.label(), phase.span().0);
    }

    /// `fraction` is 0..=100 within the phase.
    fn within(&self, phase: InstallPhase, detail: &str, fraction: f64) {
        let (start, end) = phase.span();
        let pct = start + (end - start) * fraction.clamp(0.0, 100.0) / 100.0;
        if detail.is_empty() {
            self.report(phase.label(), pct);
        } else {
            self.report(&format!("{}: {}", phase.label(), detail), pct);
        }
    }
}

// ── Directory moves ─────────────────────────────────────

/// The rename used by the migrate step.
#[async_trait]
pub trait DirectoryMover: Send + Sync {
    async fn rename(&self, from: &Path, to: &Path) -> LauncherResult<()>;
}

pub struct FsMover;

#[async_trait]
impl DirectoryMover for FsMover {
    async fn rename(&self, from: &Path, to: &Path) -> LauncherResult<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(LauncherError::io(from))
    }
}

// ── Requests / reports ──────────────────────────────────

#[derive(Clone)]
pub struct ModpackRequest {
    pub archive: PathBuf,
    pub game_dir: PathBuf,
    /// Defaults to the pack's own name, then the archive file name.
    pub version_name: Option<String>,
    pub hints: PlanHints,
    pub resolver: Arc<dyn SourceResolver>,
}

#[derive(Debug, Clone)]
pub struct ModpackInstallReport {
    pub version_name: String,
    pub format: ModpackFormat,
    pub version_dir: PathBuf,
    pub content_downloaded: usize,
    pub content_failed: Vec<String>,
    pub overrides_written: usize,
    pub metadata: RepairedMetadata,
}

enum ItemOutcome {
    Downloaded,
    Failed(String),
    Cancelled(String),
}

struct ContentJob {
    engine: TransferEngine,
    resolver: Arc<dyn ContentResolver>,
    registry: TaskRegistry,
    staging: PathBuf,
    cancel: CancellationToken,
}

pub struct ModpackInstaller {
    versions: VersionInstaller,
    registry: TaskRegistry,
    loaders: LoaderRegistry,
    content: Arc<dyn ContentResolver>,
    mover: Arc<dyn DirectoryMover>,
    retry: RetryPolicy,
}

impl ModpackInstaller {
    pub fn new(
        versions: VersionInstaller,
        registry: TaskRegistry,
        loaders: LoaderRegistry,
        content: Arc<dyn ContentResolver>,
    ) -> Self {
        Self {
            versions,
            registry,
            loaders,
            content,
            mover: Arc::new(FsMover),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_mover(mut self, mover: Arc<dyn DirectoryMover>) -> Self {
        self.mover = mover;
        self
    }

    /// Install as a tracked task; the task always ends in the state the outcome describes.
    pub async fn install(
        &self,
        request: &ModpackRequest,
        cancel: &CancellationToken,
        progress: Option<ModpackProgress>,
    ) -> InstallOutcome {
        let label = request
            .version_name
            .clone()
            .unwrap_or_else(|| archive_stem(&request.archive));
        let task = self
            .registry
            .create_linked(label, TaskKind::BaseVersion, cancel);
        let reporter = Arc::new(PhaseReporter {
            task: task.clone(),
            sink: progress,
            high_water: Mutex::new(0.0),
        });

        let result = self
            .install_staged(request, task.cancel_token(), &reporter)
            .await;

        match &result {
            Ok(report) => {
                info!(
                    "Modpack {} installed: {} content files ({} failed), {} override files",
                    report.version_name,
                    report.content_downloaded,
                    report.content_failed.len(),
                    report.overrides_written
                );
                reporter.report("Done", 100.0);
            }
            Err(e) if e.is_cancelled() => info!("Modpack install cancelled"),
            Err(e) => error!("Modpack install failed: {}", e),
        }
        task.finish(result.map(|_| ()))
    }

    async fn install_staged(
        &self,
        request: &ModpackRequest,
        cancel: &CancellationToken,
        reporter: &Arc<PhaseReporter>,
    ) -> LauncherResult<ModpackInstallReport> {
        reporter.enter(InstallPhase::Preparing);
        let plan = read_plan(&request.archive, &request.hints).await?;

        let stem = archive_stem(&request.archive);
        let name = sanitize_version_name(
            request
                .version_name
                .as_deref()
                .or(plan.name.as_deref())
                .unwrap_or(&stem),
        );
        if name.is_empty() {
            return Err(LauncherError::Install("modpack has no usable version name".into()));
        }

        let temp_root = create_temp_root(&request.game_dir).await?;
        debug!("Staging {} under {:?}", name, temp_root);

        let result = self
            .run_staged(request, &plan, &name, &temp_root, cancel, reporter)
            .await;

        reporter.enter(InstallPhase::Cleanup);
        if let Err(e) = remove_dir_with_retry(&temp_root, self.retry).await {
            warn!("Could not remove staging root {:?}: {}", temp_root, e);
        }
        // Succeeds only when no other install is staging.
        let _ = tokio::fs::remove_dir(request.game_dir.join(STAGING_DIR)).await;

        result
    }

    async fn run_staged(
        &self,
        request: &ModpackRequest,
        plan: &ModpackPlan,
        name: &str,
        temp_root: &Path,
        cancel: &CancellationToken,
        reporter: &Arc<PhaseReporter>,
    ) -> LauncherResult<ModpackInstallReport> {
        let temp_game = temp_root.join("game");
        let staging = temp_game.join("versions").join(name);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(LauncherError::io(&staging))?;
        write_isolation_marker(&staging).await?;
        check_cancelled(cancel)?;

        // ── Base game ──
        reporter.enter(InstallPhase::DownloadingBase);
        let mut base = VersionInstallRequest::new(
            plan.game_version.clone(),
            &temp_game,
            request.resolver.clone(),
        );
        base.display_name = Some(name.to_string());
        base.shared_libraries_dir = Some(request.game_dir.join("libraries"));

        let base_reporter = reporter.clone();
        let sink: ProgressSink = Arc::new(move |p: &InstallProgress| {
            base_reporter.within(InstallPhase::DownloadingBase, &p.status, p.percentage)
        });
        self.versions
            .install_version(&base, cancel, Some(sink))
            .await
            .map_err(|e| match e {
                LauncherError::Cancelled => e,
                other => LauncherError::Install(format!(
                    "base game {} failed: {}",
                    plan.game_version, other
                )),
            })?;
        self.merge_shared(&temp_game, &request.game_dir).await?;

        // ── Loader ──
        reporter.enter(InstallPhase::InstallingLoader);
        if let Some(loader) = &plan.loader {
            let installer = self.loaders.get(loader.family)?;
            info!("Installing {} for {}", loader, name);
            let loader_reporter = reporter.clone();
            let progress = move |status: &str, pct: f64| {
                loader_reporter.within(InstallPhase::InstallingLoader, status, pct)
            };
            installer
                .install_loader(LoaderContext {
                    game_version: &plan.game_version,
                    loader_version: &loader.version,
                    live_game_dir: &request.game_dir,
                    temp_game_dir: &temp_game,
                    target_version_name: name,
                    progress: &progress,
                    cancel,
                })
                .await?;
            self.merge_shared(&temp_game, &request.game_dir).await?;
        } else {
            debug!("Pack declares no loader");
        }
        check_cancelled(cancel)?;

        // ── Content ──
        reporter.enter(InstallPhase::FetchingContent);
        let (content_downloaded, content_failed) = self
            .fetch_content(&plan.content, &staging, cancel, reporter)
            .await?;

        // ── Overrides ──
        reporter.enter(InstallPhase::WritingOverrides);
        let overrides_written =
            archive::extract_prefixes(&request.archive, &plan.override_prefixes, &staging).await?;
        check_cancelled(cancel)?;

        // ── Metadata ──
        reporter.enter(InstallPhase::FinalizingMetadata);
        let metadata = repair_metadata(&staging, name).await?;
        check_cancelled(cancel)?;

        // ── Migrate ──
        reporter.enter(InstallPhase::Migrating);
        let live = request.game_dir.join("versions").join(name);
        self.migrate(&staging, &live).await?;

        Ok(ModpackInstallReport {
            version_name: name.to_string(),
            format: plan.format,
            metadata: RepairedMetadata {
                descriptor: live.join(format!("{name}.json")),
                binary: live.join(format!("{name}.jar")),
                ..metadata
            },
            version_dir: live,
            content_downloaded,
            content_failed,
            overrides_written,
        })
    }

    /// Move shared trees out of the temp game dir without touching existing files.
    async fn merge_shared(&self, temp_game: &Path, game_dir: &Path) -> LauncherResult<()> {
        for dir in ["libraries", "assets"] {
            let stats = merge_if_absent(&temp_game.join(dir), &game_dir.join(dir)).await?;
            debug!(
                "Merged {}: {} moved, {} copied, {} already present",
                dir, stats.moved, stats.copied, stats.skipped_existing
            );
        }
        Ok(())
    }

    async fn fetch_content(
        &self,
        items: &[ContentRef],
        staging: &Path,
        cancel: &CancellationToken,
        reporter: &Arc<PhaseReporter>,
    ) -> LauncherResult<(usize, Vec<String>)> {
        if items.is_empty() {
            return Ok((0, Vec::new()));
        }

        let total = items.len();
        let job = Arc::new(ContentJob {
            engine: self.versions.engine().clone(),
            resolver: self.content.clone(),
            registry: self.registry.clone(),
            staging: staging.to_path_buf(),
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(
            self.versions.options().max_concurrent_downloads.max(1),
        ));
        let finished = Arc::new(AtomicUsize::new(0));

        let mut workers = JoinSet::new();
        for item in items.iter().cloned() {
            let job = job.clone();
            let semaphore = semaphore.clone();
            let finished = finished.clone();
            let reporter = reporter.clone();
            workers.spawn(async move {
                let outcome = fetch_content_item(&job, &item, semaphore).await;
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.within(
                    InstallPhase::FetchingContent,
                    &format!("{done}/{total}"),
                    done as f64 / total as f64 * 100.0,
                );
                outcome
            });
        }

        let mut downloaded = 0;
        let mut failed = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(ItemOutcome::Downloaded) => downloaded += 1,
                Ok(ItemOutcome::Failed(message)) => failed.push(message),
                Ok(ItemOutcome::Cancelled(item)) => {
                    warn!("Content {} was cancelled", item);
                    failed.push(format!("{item}: cancelled"));
                }
                Err(e) => failed.push(format!("content worker panicked: {e}")),
            }
        }

        check_cancelled(cancel)?;
        if downloaded == 0 && failed.len() == total {
            return Err(LauncherError::Install(format!(
                "all {total} content downloads failed (first: {})",
                failed[0]
            )));
        }
        if !failed.is_empty() {
            warn!("{} of {} content files failed", failed.len(), total);
        }
        Ok((downloaded, failed))
    }

    /// Replace `live` with `staging`. An existing live directory is parked
    /// next to it under a hidden backup name and put back if the swap fails.
    /// The backup never lives in the temp root, so cleanup cannot delete it.
    async fn migrate(&self, staging: &Path, live: &Path) -> LauncherResult<()> {
        if let Some(parent) = live.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(LauncherError::io(parent))?;
        }

        if tokio::fs::metadata(live).await.is_err() {
            return self.move_dir(staging, live).await.map_err(|e| {
                LauncherError::Install(format!(
                    "could not move staged version into {}: {e}",
                    live.display()
                ))
            });
        }

        let backup = backup_path(live);
        self.move_dir(live, &backup).await.map_err(|e| {
            LauncherError::Install(format!("could not move {} aside: {e}", live.display()))
        })?;

        if let Err(e) = self.move_dir(staging, live).await {
            return match self.move_dir(&backup, live).await {
                Ok(()) => Err(LauncherError::Install(format!(
                    "could not move staged version into {}: {e}",
                    live.display()
                ))),
                Err(restore) => {
                    error!("Could not restore {:?} from {:?}: {}", live, backup, restore);
                    Err(LauncherError::Install(format!(
                        "could not move staged version into {}: {e}; previous version kept at {}",
                        live.display(),
                        backup.display()
                    )))
                }
            };
        }

        if let Err(e) = remove_dir_with_retry(&backup, self.retry).await {
            warn!("Could not remove old version at {:?}: {}", backup, e);
        }
        Ok(())
    }

    async fn move_dir(&self, from: &Path, to: &Path) -> LauncherResult<()> {
        let what = format!("moving {} to {}", from.display(), to.display());
        let mover: &dyn DirectoryMover = self.mover.as_ref();
        retry(self.retry, &what, move |_| mover.rename(from, to)).await
    }
}

async fn fetch_content_item(
    job: &ContentJob,
    item: &ContentRef,
    semaphore: Arc<Semaphore>,
) -> ItemOutcome {
    let _permit = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return ItemOutcome::Cancelled(item.to_string()),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ItemOutcome::Cancelled(item.to_string()),
        },
    };

    let task = job
        .registry
        .create_linked(item.to_string(), item.task_kind(), &job.cancel);
    let result = download_content(job, item, &task).await;
    match task.finish(result) {
        InstallOutcome::Completed => ItemOutcome::Downloaded,
        InstallOutcome::Cancelled => ItemOutcome::Cancelled(item.to_string()),
        InstallOutcome::Failed(message) => {
            warn!("Content {} failed: {}", item, message);
            ItemOutcome::Failed(format!("{item}: {message}"))
        }
    }
}

async fn download_content(job: &ContentJob, item: &ContentRef, task: &TaskHandle) -> LauncherResult<()> {
    let resolved = job.resolver.resolve(item).await?;
    let dest = safe_join(&job.staging, &resolved.relative_path)?;
    let file_name = resolved.file_name().to_string();
    task.set_message(&file_name);

    let mut last_error = None;
    for url in &resolved.urls {
        let result = job
            .engine
            .download_file(url, &dest, task.cancel_token(), &mut |p| {
                if let Some(pct) = p.percentage() {
                    task.update(pct, &file_name, Some(p.speed));
                }
            })
            .await;
        match result {
            Ok(written) => match resolved.size {
                Some(expected) if written != expected => {
                    debug!(
                        "{} from {} has {} bytes, expected {}",
                        file_name, url, written, expected
                    );
                    let _ = tokio::fs::remove_file(&dest).await;
                    last_error = Some(LauncherError::Install(format!(
                        "{file_name}: size mismatch ({written} bytes, expected {expected})"
                    )));
                }
                _ => return Ok(()),
            },
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                debug!("{} failed from {}: {}", file_name, url, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        LauncherError::Install(format!("{} has no download URL", resolved.relative_path))
    }))
}

/// `versions/.<name>.bak-<id>`, beside the live directory.
fn backup_path(live: &Path) -> PathBuf {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = uuid::Uuid::new_v4().simple().to_string();
    live.with_file_name(format!(".{name}.bak-{}", &id[..8]))
}

fn check_cancelled(cancel: &CancellationToken) -> LauncherResult<()> {
    if cancel.is_cancelled() {
        Err(LauncherError::Cancelled)
    } else {
        Ok(())
    }
}

async fn create_temp_root(game_dir: &Path) -> LauncherResult<PathBuf> {
    let parent = game_dir.join(STAGING_DIR);
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(LauncherError::io(&parent))?;
    let dir = tempfile::Builder::new()
        .prefix("install-")
        .tempdir_in(&parent)
        .map_err(LauncherError::io(&parent))?;
    Ok(dir.keep())
}

async fn write_isolation_marker(version_dir: &Path) -> LauncherResult<()> {
    let marker = version_dir.join(ISOLATION_MARKER);
    let body = serde_json::to_vec_pretty(&serde_json::json!({ "isolated": true }))?;
    tokio::fs::write(&marker, body)
        .await
        .map_err(LauncherError::io(&marker))
}

fn archive_stem(archive: &Path) -> String {
    archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "modpack".to_string())
}

fn sanitize_version_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_matches('.').trim().to_string()
}
