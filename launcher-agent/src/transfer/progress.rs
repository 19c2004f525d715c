//! Byte-level progress tracking for patch downloads.

use std::time::{Duration, Instant};

/// Progress of a single download.
///
/// `total_bytes` is `None` when the server did not send a Content-Length;
/// in that case no percentage can be derived but the transfer still runs.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub total_bytes: Option<u64>,
    pub received_bytes: u64,

    /// Current transfer speed in bytes/second
    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds), 0 when unknown
    pub eta_seconds: u64,
}

impl DownloadProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes,
            received_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
        }
    }

    /// Integer percentage complete, `None` without a known total.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        let pct = (self.received_bytes as f64 / total as f64) * 100.0;
        Some(pct.round().min(100.0) as u8)
    }

    pub fn is_complete(&self) -> bool {
        match self.total_bytes {
            Some(total) => self.received_bytes >= total,
            None => false,
        }
    }
}

/// Tracks a download over time, deriving speed and ETA.
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: DownloadProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: DownloadProgress::new(total_bytes),
        }
    }

    /// Record the new received-byte count and recompute speed/ETA.
    pub fn update(&mut self, received_bytes: u64) -> &DownloadProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = received_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        if self.progress.bytes_per_second > 0 {
            if let Some(total) = self.progress.total_bytes {
                let remaining = total.saturating_sub(received_bytes);
                self.progress.eta_seconds = remaining / self.progress.bytes_per_second;
            }
        }

        self.progress.received_bytes = received_bytes;
        self.last_update_time = now;
        self.last_bytes = received_bytes;

        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since the download started.
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.received_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &DownloadProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
