use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::core::downloader::TransferProgress;

/// Rich progress record for a version install.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallProgress {
    pub status: String,
    /// 0–100, non-decreasing within one install; 100 only once everything is done.
    pub percentage: f64,
    pub current_file: String,
    pub current_file_bytes: u64,
    pub current_file_total: Option<u64>,
    pub overall_bytes: u64,
    pub overall_total: u64,
    pub completed_files: u64,
    pub total_files: u64,
    /// Bytes per second of the file that produced this sample.
    pub speed: u64,
}

pub type ProgressSink = Arc<dyn Fn(&InstallProgress) + Send + Sync>;

/// Highest percentage reported before the final step completes.
const IN_FLIGHT_CAP: f64 = 99.0;

#[derive(Default)]
struct Aggregate {
    completed_files: u64,
    completed_bytes: u64,
    high_water: f64,
    status: String,
}

/// Shared counters for one install operation. Counters only grow; every
/// report is built and delivered under the same lock, so observers see a
/// consistent, non-decreasing sequence.
pub struct ProgressTracker {
    total_files: u64,
    total_bytes: u64,
    state: Mutex<Aggregate>,
    sink: Option<ProgressSink>,
}

impl ProgressTracker {
    pub fn new(total_files: u64, total_bytes: u64, sink: Option<ProgressSink>) -> Self {
        Self {
            total_files,
            total_bytes,
            state: Mutex::new(Aggregate::default()),
            sink,
        }
    }

    fn raw_percentage(&self, agg: &Aggregate, in_flight_bytes: u64) -> f64 {
        let pct = if self.total_bytes > 0 {
            (agg.completed_bytes + in_flight_bytes) as f64 / self.total_bytes as f64 * 100.0
        } else if self.total_files > 0 {
            agg.completed_files as f64 / self.total_files as f64 * 100.0
        } else {
            0.0
        };
        pct.min(IN_FLIGHT_CAP)
    }

    fn emit(&self, agg: &mut Aggregate, pct: f64, file: &str, transfer: TransferProgress) {
        if pct > agg.high_water {
            agg.high_water = pct;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        sink(&InstallProgress {
            status: agg.status.clone(),
            percentage: agg.high_water,
            current_file: file.to_string(),
            current_file_bytes: transfer.bytes_so_far,
            current_file_total: transfer.total_bytes,
            overall_bytes: agg.completed_bytes + transfer.bytes_so_far,
            overall_total: self.total_bytes,
            completed_files: agg.completed_files,
            total_files: self.total_files,
            speed: transfer.speed,
        });
    }

    /// Phase transition: new status text, counters unchanged.
    pub fn status(&self, status: &str) {
        let mut agg = self.state.lock().unwrap_or_else(|e| e.into_inner());
        agg.status = status.to_string();
        let pct = agg.high_water;
        self.emit(&mut agg, pct, "", TransferProgress::default());
    }

    pub fn file_progress(&self, file: &str, transfer: TransferProgress) {
        let mut agg = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pct = self.raw_percentage(&agg, transfer.bytes_so_far);
        self.emit(&mut agg, pct, file, transfer);
    }

    /// Count one file as done (downloaded, already present, or given up on).
    pub fn file_finished(&self, file: &str, bytes: u64) {
        let mut agg = self.state.lock().unwrap_or_else(|e| e.into_inner());
        agg.completed_files += 1;
        agg.completed_bytes += bytes;
        let pct = self.raw_percentage(&agg, 0);
        self.emit(&mut agg, pct, file, TransferProgress::default());
    }

    /// Report the terminal 100%.
    pub fn finish(&self, status: &str) {
        let mut agg = self.state.lock().unwrap_or_else(|e| e.into_inner());
        agg.status = status.to_string();
        self.emit(&mut agg, 100.0, "", TransferProgress::default());
    }
}
