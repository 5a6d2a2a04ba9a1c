// ─── Filesystem Helpers ───
// Retry for lock-prone moves/deletes, path containment, copy-if-absent merges.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Base delay; attempt `n` waits `n * delay` before retrying.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out. `op` receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> LauncherResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = LauncherResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying",
                    what, attempt, attempts, e
                );
                tokio::time::sleep(policy.delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Join an untrusted relative path (archive entry, manifest path) onto
/// `root`, refusing anything that would land outside it.
pub fn safe_join(root: &Path, relative: &str) -> LauncherResult<PathBuf> {
    let normalized = relative.replace('\\', "/");
    let mut out = root.to_path_buf();
    let mut pushed = false;

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().contains(':') {
                    return Err(unsafe_path(relative));
                }
                out.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return Err(unsafe_path(relative)),
        }
    }

    if !pushed {
        return Err(unsafe_path(relative));
    }
    Ok(out)
}

fn unsafe_path(relative: &str) -> LauncherError {
    LauncherError::Install(format!("refusing unsafe path '{relative}'"))
}

pub async fn remove_dir_with_retry(path: &Path, policy: RetryPolicy) -> LauncherResult<()> {
    if !path.exists() {
        return Ok(());
    }
    retry(policy, &format!("removing {}", path.display()), |_| async move {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LauncherError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    })
    .await
}

// ── Copy-if-absent merge ────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub moved: usize,
    pub copied: usize,
    pub skipped_existing: usize,
}

/// Merge every file under `src` into `dst`. Existing destination files are
/// never replaced. Files are linked when possible and copied otherwise.
pub async fn merge_if_absent(src: &Path, dst: &Path) -> LauncherResult<MergeStats> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut stats = MergeStats::default();
        if src.is_dir() {
            merge_dir(&src, &dst, &mut stats)?;
        }
        Ok(stats)
    })
    .await
    .map_err(|e| LauncherError::Other(format!("merge task failed: {e}")))?
}

fn merge_dir(src: &Path, dst: &Path, stats: &mut MergeStats) -> LauncherResult<()> {
    std::fs::create_dir_all(dst).map_err(LauncherError::io(dst))?;

    for entry in std::fs::read_dir(src).map_err(LauncherError::io(src))? {
        let entry = entry.map_err(LauncherError::io(src))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(LauncherError::io(&from))?;

        if file_type.is_dir() {
            merge_dir(&from, &to, stats)?;
        } else if file_type.is_file() {
            place_if_absent(&from, &to, stats)?;
        }
    }
    Ok(())
}

fn place_if_absent(from: &Path, to: &Path, stats: &mut MergeStats) -> LauncherResult<()> {
    use std::io::ErrorKind;

    if to.exists() {
        stats.skipped_existing += 1;
        return Ok(());
    }

    // hard_link refuses to replace an existing file, unlike rename.
    match std::fs::hard_link(from, to) {
        Ok(()) => {
            let _ = std::fs::remove_file(from);
            stats.moved += 1;
            return Ok(());
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            stats.skipped_existing += 1;
            return Ok(());
        }
        Err(e) => debug!("Link {:?} -> {:?} failed ({}), copying", from, to, e),
    }

    let mut target = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            stats.skipped_existing += 1;
            return Ok(());
        }
        Err(e) => return Err(LauncherError::io(to)(e)),
    };
    let mut source = std::fs::File::open(from).map_err(LauncherError::io(from))?;
    if let Err(e) = std::io::copy(&mut source, &mut target) {
        drop(target);
        let _ = std::fs::remove_file(to);
        return Err(LauncherError::io(to)(e));
    }
    stats.copied += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn locked() -> LauncherError {
        LauncherError::Io {
            path: PathBuf::from("versions/pack"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            delay: Duration::from_millis(100),
        };

        let value = retry(policy, "move", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(locked())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(10),
        };

        let result: LauncherResult<()> = retry(policy, "delete", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(locked()) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: LauncherResult<()> = retry(RetryPolicy::default(), "parse", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LauncherError::InvalidDescriptor("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let root = Path::new("/games/staging");
        assert_eq!(
            safe_join(root, "mods/sodium.jar").unwrap(),
            root.join("mods").join("sodium.jar")
        );
        assert_eq!(
            safe_join(root, "config\\sodium.json").unwrap(),
            root.join("config").join("sodium.json")
        );
        for bad in ["../escape.jar", "/etc/passwd", "mods/../../x", "", "C:/x", "./"] {
            assert!(safe_join(root, bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn merge_never_overwrites_existing_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("temp/libraries");
        let dst = dir.path().join("libraries");
        std::fs::create_dir_all(src.join("org/a")).unwrap();
        std::fs::create_dir_all(dst.join("org/a")).unwrap();
        std::fs::write(src.join("org/a/new.jar"), b"new").unwrap();
        std::fs::write(src.join("org/a/shared.jar"), b"from-temp").unwrap();
        std::fs::write(dst.join("org/a/shared.jar"), b"original").unwrap();

        let stats = merge_if_absent(&src, &dst).await.unwrap();

        assert_eq!(stats.moved + stats.copied, 1);
        assert_eq!(stats.skipped_existing, 1);
        assert_eq!(std::fs::read(dst.join("org/a/new.jar")).unwrap(), b"new");
        assert_eq!(std::fs::read(dst.join("org/a/shared.jar")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn remove_dir_tolerates_missing_paths() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("never-created");
        remove_dir_with_retry(&gone, RetryPolicy::default()).await.unwrap();

        let present = dir.path().join("staging");
        std::fs::create_dir_all(present.join("versions/pack")).unwrap();
        remove_dir_with_retry(&present, RetryPolicy::default()).await.unwrap();
        assert!(!present.exists());
    }
}
