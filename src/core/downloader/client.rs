use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::Client;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{LauncherError, LauncherResult};

/// Read buffer size for streamed bodies.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Minimum delay between two progress callbacks for the same transfer.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(150);

/// Where the bytes of a transfer go.
pub enum TransferSink<'a> {
    /// Truncate-create the file. Left partial on failure or cancellation.
    File(&'a Path),
    /// Append to an in-memory buffer (manifests, small JSON payloads).
    Memory(&'a mut Vec<u8>),
}

/// A throughput sample for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct TransferProgress {
    pub bytes_so_far: u64,
    /// Bytes per second since the previous sample.
    pub speed: u64,
    /// `None` when the server sent no `Content-Length`.
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some((self.bytes_so_far as f64 / total as f64) * 100.0),
            _ => None,
        }
    }
}

/// Streams HTTP GET bodies in fixed-size chunks with cooperative cancellation
/// and rate-limited progress reporting.
#[derive(Clone)]
pub struct TransferEngine {
    client: Client,
    progress_interval: Duration,
}

enum Writer<'a> {
    File(tokio::fs::File, &'a Path),
    Memory(&'a mut Vec<u8>),
}

impl TransferEngine {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    // ── Single streamed transfer ────────────────────────

    /// Perform one GET of `url` into `sink`, returning the number of bytes written.
    ///
    /// `on_progress` is called at most once per progress interval, plus once
    /// with the final byte count. A cancelled transfer returns
    /// [`LauncherError::Cancelled`] and never reports completion.
    pub async fn transfer(
        &self,
        url: &str,
        sink: TransferSink<'_>,
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(TransferProgress) + Send),
    ) -> LauncherResult<u64> {
        if cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LauncherError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(stream);

        let mut writer = match sink {
            TransferSink::File(path) => {
                let file = tokio::fs::File::create(path)
                    .await
                    .map_err(LauncherError::io(path))?;
                Writer::File(file, path)
            }
            TransferSink::Memory(buffer) => Writer::Memory(buffer),
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_so_far: u64 = 0;
        let mut last_sample_at = Instant::now();
        let mut last_sample_bytes: u64 = 0;
        let mut speed: u64 = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LauncherError::Cancelled),
                read = reader.read(&mut buf) => read.map_err(network_error)?,
            };
            if read == 0 {
                break;
            }

            match &mut writer {
                Writer::File(file, path) => file
                    .write_all(&buf[..read])
                    .await
                    .map_err(LauncherError::io(*path))?,
                Writer::Memory(buffer) => buffer.extend_from_slice(&buf[..read]),
            }
            bytes_so_far += read as u64;

            let elapsed = last_sample_at.elapsed();
            if elapsed >= self.progress_interval {
                speed = ((bytes_so_far - last_sample_bytes) as f64 / elapsed.as_secs_f64()) as u64;
                last_sample_at = Instant::now();
                last_sample_bytes = bytes_so_far;
                on_progress(TransferProgress {
                    bytes_so_far,
                    speed,
                    total_bytes,
                });
            }
        }

        // Flush and drop the handle before anyone renames the file.
        if let Writer::File(mut file, path) = writer {
            file.flush().await.map_err(LauncherError::io(path))?;
        }

        on_progress(TransferProgress {
            bytes_so_far,
            speed,
            total_bytes,
        });

        debug!("Transferred {} bytes from {}", bytes_so_far, url);
        Ok(bytes_so_far)
    }

    /// Fetch a text payload (manifests, descriptors) into memory.
    pub async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> LauncherResult<String> {
        let mut buffer = Vec::new();
        self.transfer(url, TransferSink::Memory(&mut buffer), cancel, &mut |_| {})
            .await?;
        String::from_utf8(buffer)
            .map_err(|e| LauncherError::InvalidDescriptor(format!("{url} is not UTF-8: {e}")))
    }

    // ── Staged file download ────────────────────────────

    /// Download into a private `.part` sibling of `dest` and move it into place
    /// only once complete, so `dest` is never observed half-written. An
    /// existing `dest` is replaced; callers decide beforehand whether it is
    /// good enough to keep.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(TransferProgress) + Send),
    ) -> LauncherResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(LauncherError::io(parent))?;
        }

        let part = part_path(dest);
        let result = self
            .transfer(url, TransferSink::File(&part), cancel, on_progress)
            .await;

        match result {
            Ok(written) => {
                if let Err(e) = tokio::fs::rename(&part, dest).await {
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(LauncherError::io(dest)(e));
                }
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.part", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    dest.with_file_name(name)
}

/// Surface the reqwest error behind a stream read as a network fault.
fn network_error(err: std::io::Error) -> LauncherError {
    let is_reqwest = err
        .get_ref()
        .map(|inner| inner.is::<reqwest::Error>())
        .unwrap_or(false);

    if is_reqwest {
        if let Some(inner) = err.into_inner() {
            if let Ok(reqwest_err) = inner.downcast::<reqwest::Error>() {
                return LauncherError::Http(*reqwest_err);
            }
        }
        return LauncherError::Other("network stream failed".into());
    }

    LauncherError::Io {
        path: PathBuf::new(),
        source: err,
    }
}

// ── Presence checks ─────────────────────────────────────

/// True when `path` is a file of exactly `expected_size` bytes and, when a
/// SHA-1 is supplied, its digest matches too.
pub async fn file_matches(path: &Path, expected_size: u64, sha1: Option<&str>) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() == expected_size => {}
        _ => return false,
    }

    match sha1 {
        None => true,
        Some(expected) => {
            let path = path.to_path_buf();
            let expected = expected.to_ascii_lowercase();
            tokio::task::spawn_blocking(move || sha1_of_file(&path).ok() == Some(expected))
                .await
                .unwrap_or(false)
        }
    }
}

fn sha1_of_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
