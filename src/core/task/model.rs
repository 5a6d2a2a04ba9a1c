use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a task is transferring. Display-only for the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BaseVersion,
    AssetSet,
    ModFile,
    ResourcePack,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::BaseVersion => write!(f, "base-version"),
            TaskKind::AssetSet => write!(f, "asset-set"),
            TaskKind::ModFile => write!(f, "mod-file"),
            TaskKind::ResourcePack => write!(f, "resource-pack"),
        }
    }
}

/// Lifecycle of a task. `Downloading` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Downloading)
    }
}

/// Snapshot of one tracked operation, as shown to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub name: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// 0–100. Never decreases while downloading; exactly 100 once completed.
    pub percentage: f64,
    pub message: String,
    /// Bytes per second, reset to 0 on any terminal transition.
    pub speed: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadTask {
    pub fn new(name: String, kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            kind,
            status: TaskStatus::Downloading,
            percentage: 0.0,
            message: String::new(),
            speed: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
