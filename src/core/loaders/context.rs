use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

/// `(status, percentage 0..=100)` reported by a loader installer.
pub type LoaderProgress<'a> = &'a (dyn Fn(&str, f64) + Send + Sync);

/// Everything a loader installer gets to see.
/// The installer writes only under `temp_game_dir`; `live_game_dir` is read-only context
/// (shared libraries, existing profiles).
pub struct LoaderContext<'a> {
    pub game_version: &'a str,
    pub loader_version: &'a str,
    pub live_game_dir: &'a Path,
    pub temp_game_dir: &'a Path,
    pub target_version_name: &'a str,
    pub progress: LoaderProgress<'a>,
    pub cancel: &'a CancellationToken,
}

impl LoaderContext<'_> {
    /// `<temp_game_dir>/versions/<target_version_name>`
    pub fn staging_version_dir(&self) -> PathBuf {
        self.temp_game_dir
            .join("versions")
            .join(self.target_version_name)
    }
}
