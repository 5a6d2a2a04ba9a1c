// ─── Task Registry ───
// Thread-safe collection of in-flight and finished operations. Observers
// subscribe to one revision counter instead of per-field signals.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{DownloadTask, TaskKind, TaskStatus};
use crate::core::error::{InstallOutcome, LauncherResult};

struct Entry {
    task: DownloadTask,
    cancel: CancellationToken,
}

struct RegistryInner {
    /// Most recent first.
    entries: Mutex<Vec<Entry>>,
    changed: watch::Sender<u64>,
    auto_remove_after: Option<Duration>,
}

/// Cheap-to-clone handle to the process-wide task list.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TaskRegistry {
    /// `auto_remove_after`: completed tasks disappear after this delay.
    pub fn new(auto_remove_after: Option<Duration>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Vec::new()),
                changed,
                auto_remove_after,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.inner.changed.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Apply `f` to a task, then notify. Returns false for unknown ids.
    fn with_task(&self, id: &str, f: impl FnOnce(&mut Entry)) -> bool {
        let found = {
            let mut entries = self.entries();
            match entries.iter_mut().find(|e| e.task.id == id) {
                Some(entry) => {
                    f(entry);
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify();
        }
        found
    }

    // ── Creation ────────────────────────────────────────

    pub fn create(&self, name: impl Into<String>, kind: TaskKind) -> TaskHandle {
        self.create_with_token(name, kind, CancellationToken::new())
    }

    /// Create a task whose cancellation also follows `parent`.
    pub fn create_linked(
        &self,
        name: impl Into<String>,
        kind: TaskKind,
        parent: &CancellationToken,
    ) -> TaskHandle {
        self.create_with_token(name, kind, parent.child_token())
    }

    fn create_with_token(
        &self,
        name: impl Into<String>,
        kind: TaskKind,
        cancel: CancellationToken,
    ) -> TaskHandle {
        let task = DownloadTask::new(name.into(), kind);
        let id = task.id.clone();
        debug!("Task {} created: {} ({})", id, task.name, kind);

        self.entries().insert(
            0,
            Entry {
                task,
                cancel: cancel.clone(),
            },
        );
        self.notify();

        TaskHandle {
            id,
            registry: self.clone(),
            cancel,
        }
    }

    // ── Mutation ────────────────────────────────────────

    /// Raise the percentage (never lowers it) and optionally replace the
    /// message and speed. Ignored once the task is terminal.
    pub fn update_progress(
        &self,
        id: &str,
        percentage: f64,
        message: Option<&str>,
        speed: Option<u64>,
    ) -> bool {
        self.with_task(id, |entry| {
            let task = &mut entry.task;
            if task.status.is_terminal() {
                return;
            }
            let pct = percentage.clamp(0.0, 100.0);
            if pct > task.percentage {
                task.percentage = pct;
            }
            if let Some(message) = message {
                task.message = message.to_string();
            }
            if let Some(speed) = speed {
                task.speed = speed;
            }
        })
    }

    pub fn complete(&self, id: &str) -> bool {
        let mut transitioned = false;
        let found = self.with_task(id, |entry| {
            transitioned = finish(&mut entry.task, TaskStatus::Completed, None);
        });

        if transitioned {
            info!("Task {} completed", id);
            self.schedule_removal(id);
        }
        found
    }

    pub fn fail(&self, id: &str, message: &str) -> bool {
        self.with_task(id, |entry| {
            if finish(&mut entry.task, TaskStatus::Failed, Some(message)) {
                warn!("Task {} failed: {}", entry.task.id, message);
            }
        })
    }

    /// Request cancellation: trips the task's token and marks it cancelled.
    /// Sibling tasks are unaffected.
    pub fn cancel(&self, id: &str) -> bool {
        self.with_task(id, |entry| {
            entry.cancel.cancel();
            if finish(&mut entry.task, TaskStatus::Cancelled, Some("Cancelled")) {
                info!("Task {} cancelled", entry.task.id);
            }
        })
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|e| e.task.id != id);
            entries.len() != before
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Drop every terminal task. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|e| !e.task.status.is_terminal());
            before - entries.len()
        };
        if removed > 0 {
            self.notify();
        }
        removed
    }

    fn schedule_removal(&self, id: &str) {
        let Some(delay) = self.inner.auto_remove_after else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let registry = self.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            registry.remove(&id);
        });
    }

    // ── Observation ─────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<DownloadTask> {
        self.entries()
            .iter()
            .find(|e| e.task.id == id)
            .map(|e| e.task.clone())
    }

    /// All tasks, most recent first.
    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.entries().iter().map(|e| e.task.clone()).collect()
    }

    /// Receiver that ticks whenever anything in the registry changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }
}

/// Move a task into a terminal state. Returns false if it already was terminal.
fn finish(task: &mut DownloadTask, status: TaskStatus, message: Option<&str>) -> bool {
    if task.status.is_terminal() {
        return false;
    }
    task.status = status;
    task.speed = 0;
    task.finished_at = Some(Utc::now());
    if status == TaskStatus::Completed {
        task.percentage = 100.0;
    }
    if let Some(message) = message {
        task.message = message.to_string();
    }
    true
}

/// Owned handle for the component driving one task.
#[derive(Clone)]
pub struct TaskHandle {
    id: String,
    registry: TaskRegistry,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn update(&self, percentage: f64, message: &str, speed: Option<u64>) {
        self.registry
            .update_progress(&self.id, percentage, Some(message), speed);
    }

    pub fn set_message(&self, message: &str) {
        self.registry
            .update_progress(&self.id, 0.0, Some(message), None);
    }

    /// Record the terminal state matching `result` and convert it into an outcome.
    pub fn finish(&self, result: LauncherResult<()>) -> InstallOutcome {
        let outcome = InstallOutcome::from(result);
        match &outcome {
            InstallOutcome::Completed => {
                self.registry.complete(&self.id);
            }
            InstallOutcome::Cancelled => {
                self.registry.cancel(&self.id);
            }
            InstallOutcome::Failed(message) => {
                self.registry.fail(&self.id, message);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LauncherError;

    #[test]
    fn newest_task_is_listed_first() {
        let registry = TaskRegistry::default();
        registry.create("1.20.1", TaskKind::BaseVersion);
        registry.create("Sodium", TaskKind::ModFile);

        let names: Vec<_> = registry.snapshot().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Sodium", "1.20.1"]);
    }

    #[test]
    fn percentage_never_goes_backwards() {
        let registry = TaskRegistry::default();
        let task = registry.create("pack", TaskKind::BaseVersion);

        task.update(40.0, "libraries", Some(1024));
        task.update(25.0, "still libraries", None);

        let snapshot = registry.get(task.id()).unwrap();
        assert_eq!(snapshot.percentage, 40.0);
        assert_eq!(snapshot.message, "still libraries");
        assert_eq!(snapshot.speed, 1024);
    }

    #[test]
    fn terminal_state_is_final() {
        let registry = TaskRegistry::default();
        let task = registry.create("pack", TaskKind::BaseVersion);
        task.update(50.0, "halfway", Some(99));

        assert_eq!(
            task.finish(Err(LauncherError::Install("disk full".into()))),
            InstallOutcome::Failed("Install failed: disk full".into())
        );
        registry.complete(task.id());
        registry.update_progress(task.id(), 90.0, Some("late"), Some(5));

        let snapshot = registry.get(task.id()).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.message, "Install failed: disk full");
        assert_eq!(snapshot.percentage, 50.0);
        assert_eq!(snapshot.speed, 0);
    }

    #[test]
    fn completion_sets_full_percentage() {
        let registry = TaskRegistry::default();
        let task = registry.create("1.20.1", TaskKind::BaseVersion);
        task.finish(Ok(()));

        let snapshot = registry.get(task.id()).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.percentage, 100.0);
    }

    #[test]
    fn cancel_trips_only_that_task() {
        let registry = TaskRegistry::default();
        let parent = CancellationToken::new();
        let a = registry.create_linked("a", TaskKind::ModFile, &parent);
        let b = registry.create_linked("b", TaskKind::ModFile, &parent);

        registry.cancel(a.id());

        assert!(a.cancel_token().is_cancelled());
        assert!(!b.cancel_token().is_cancelled());
        assert!(!parent.is_cancelled());
        assert_eq!(registry.get(a.id()).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(registry.get(b.id()).unwrap().status, TaskStatus::Downloading);
    }

    #[test]
    fn prune_removes_only_terminal_tasks() {
        let registry = TaskRegistry::default();
        let done = registry.create("done", TaskKind::AssetSet);
        let running = registry.create("running", TaskKind::AssetSet);
        done.finish(Ok(()));

        assert_eq!(registry.prune(), 1);
        assert!(registry.get(done.id()).is_none());
        assert!(registry.get(running.id()).is_some());
    }

    #[tokio::test]
    async fn observers_see_changes() {
        let registry = TaskRegistry::default();
        let mut rx = registry.subscribe();
        let task = registry.create("1.20.1", TaskKind::BaseVersion);

        rx.changed().await.unwrap();
        task.update(10.0, "descriptor", None);
        rx.changed().await.unwrap();
        assert!(*rx.borrow() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_tasks_are_removed_after_delay() {
        let registry = TaskRegistry::new(Some(Duration::from_secs(5)));
        let task = registry.create("1.20.1", TaskKind::BaseVersion);
        task.finish(Ok(()));
        assert!(registry.get(task.id()).is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.get(task.id()).is_none());
    }

    #[test]
    fn concurrent_updates_are_safe() {
        let registry = TaskRegistry::default();
        let task = registry.create("pack", TaskKind::BaseVersion);

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let id = task.id().to_string();
                std::thread::spawn(move || {
                    for step in 0..100 {
                        registry.update_progress(&id, (i * 100 + step) as f64 / 8.0, None, None);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.get(task.id()).unwrap().percentage, 799.0 / 8.0);
    }
}
