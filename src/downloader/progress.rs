//! Download Progress Tracking

use serde::Serialize;

/// Aggregate progress of one ranged download.
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct DownloadProgress {
    /// Bytes downloaded so far, summed across range workers
    pub downloaded_bytes: u64,

    /// Total file size in bytes
    pub total_bytes: u64,

    /// Aggregate download speed in bytes/sec
    pub speed_bytes_per_sec: f64,

    /// Download completion percentage (0-100)
    pub percentage: f64,
}

impl DownloadProgress {
    pub fn new(downloaded: u64, total: u64, elapsed_seconds: f64) -> Self {
        let percentage = if total > 0 {
            ((downloaded as f64 / total as f64) * 100.0).min(100.0)
        } else {
            0.0
        };
        let speed = if elapsed_seconds > 0.0 {
            downloaded as f64 / elapsed_seconds
        } else {
            0.0
        };
        Self {
            downloaded_bytes: downloaded.min(total.max(downloaded)),
            total_bytes: total,
            speed_bytes_per_sec: speed,
            percentage,
        }
    }
}

/// Format bytes per second as human-readable string
pub fn format_bytes_per_sec(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.2} GB/s", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} MB/s", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} KB/s", bps / 1_000.0)
    } else {
        format!("{:.0} B/s", bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage_and_speed() {
        let progress = DownloadProgress::new(500, 1000, 1.0);
        assert!((progress.percentage - 50.0).abs() < 0.01);
        assert!((progress.speed_bytes_per_sec - 500.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_is_bounded() {
        let progress = DownloadProgress::new(1500, 1000, 1.0);
        assert!((progress.percentage - 100.0).abs() < 0.01);

        let progress = DownloadProgress::new(10, 0, 1.0);
        assert_eq!(progress.percentage, 0.0);
    }

    #[test]
    fn test_format_bytes_per_sec() {
        assert_eq!(format_bytes_per_sec(500.0), "500 B/s");
        assert_eq!(format_bytes_per_sec(1500.0), "1.50 KB/s");
        assert_eq!(format_bytes_per_sec(1_500_000.0), "1.50 MB/s");
        assert_eq!(format_bytes_per_sec(1_500_000_000.0), "1.50 GB/s");
    }
}
