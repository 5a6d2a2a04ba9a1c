use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the installation pipeline.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Parsing ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid Maven coordinate: {0}")]
    InvalidMavenCoordinate(String),

    #[error("Invalid version descriptor: {0}")]
    InvalidDescriptor(String),

    // ── Planning ────────────────────────────────────────
    #[error("Unsupported modpack: {0}")]
    UnsupportedModpack(String),

    // ── Install ─────────────────────────────────────────
    #[error("Loader error: {0}")]
    Loader(String),

    #[error("Install failed: {0}")]
    Install(String),

    /// Cooperative cancellation. Not a failure; callers report it separately.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl LauncherError {
    /// Attach a path to an IO error. Helper for `map_err`.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| LauncherError::Io { path, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LauncherError::Cancelled)
    }

    /// True for file-lock contention that usually clears after a short wait
    /// (antivirus scanners, indexers, a game process still shutting down).
    pub fn is_transient(&self) -> bool {
        match self {
            LauncherError::Io { source, .. } => is_transient_io(source),
            _ => false,
        }
    }
}

pub fn is_transient_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    if cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }

    matches!(
        err.kind(),
        ErrorKind::PermissionDenied | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Final result of a top-level install operation.
///
/// Cancellation is its own outcome, distinct from failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum InstallOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl InstallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, InstallOutcome::Completed)
    }
}

impl From<LauncherResult<()>> for InstallOutcome {
    fn from(result: LauncherResult<()>) -> Self {
        match result {
            Ok(()) => InstallOutcome::Completed,
            Err(e) if e.is_cancelled() => InstallOutcome::Cancelled,
            Err(e) => InstallOutcome::Failed(e.to_string()),
        }
    }
}

// ── Serialization for front ends ────────────────────────
// Progress/outcome payloads carry errors as their display string.
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_transient() {
        let err = LauncherError::Io {
            path: PathBuf::from("versions/pack"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn not_found_is_not_transient() {
        let err: LauncherError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(!err.is_transient());
        assert!(!LauncherError::Install("x".into()).is_transient());
    }

    #[test]
    fn outcome_from_result_separates_cancellation() {
        assert_eq!(InstallOutcome::from(Ok(())), InstallOutcome::Completed);
        assert_eq!(
            InstallOutcome::from(Err(LauncherError::Cancelled)),
            InstallOutcome::Cancelled
        );
        assert_eq!(
            InstallOutcome::from(Err(LauncherError::Install("boom".into()))),
            InstallOutcome::Failed("Install failed: boom".into())
        );
    }
}
