//! Handshake progress display.

use indicatif::{ProgressBar, ProgressStyle};
use quantumgate_core::Status;

/// A spinner tracking one peer's handshake as it advances through
/// [`Status`] (§3, §4.1).
pub struct HandshakeProgress {
    bar: ProgressBar,
}

impl HandshakeProgress {
    /// Start a spinner for a freshly admitted peer.
    #[must_use]
    pub fn new(peer_label: &str) -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("invalid progress bar template"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        bar.set_message(format!("{peer_label}: {:?}", Status::Initialized));

        Self { bar }
    }

    /// Record the peer having reached a new status.
    pub fn update(&self, peer_label: &str, status: Status) {
        self.bar.set_message(format!("{peer_label}: {status:?}"));
    }

    /// Finish once the peer reaches [`Status::Ready`].
    pub fn finish_ready(&self, peer_label: &str) {
        self.bar.finish_with_message(format!("{peer_label}: Ready"));
    }

    /// Finish once the peer reaches [`Status::Disconnected`].
    pub fn finish_disconnected(&self, peer_label: &str, reason: &str) {
        self.bar.abandon_with_message(format!("{peer_label}: disconnected ({reason})"));
    }
}

/// Format bytes in human-readable form.
///
/// # Example
///
/// ```
/// use quantumgate_cli::progress::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
/// assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a rate in bytes/sec, human-readable.
///
/// # Example
///
/// ```
/// use quantumgate_cli::progress::format_speed;
///
/// assert_eq!(format_speed(1024.0), "1.00 KB/s");
/// assert_eq!(format_speed(1024.0 * 1024.0), "1.00 MB/s");
/// ```
#[must_use]
#[allow(dead_code)]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format a duration in human-readable form.
///
/// # Example
///
/// ```
/// use quantumgate_cli::progress::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
/// ```
#[must_use]
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
