//! UI utilities for PeerLink CLI.

use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::watch;

use peerlink_core::client::{TransferProgress, TransferState};
use peerlink_core::file::format_size;

const RULE_WIDTH: usize = 60;

/// Parse a duration string like "5m", "30s", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_millis(num))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}

/// Horizontal rule used between table sections.
pub fn rule() -> String {
    "─".repeat(RULE_WIDTH)
}

/// Format a transfer rate from bytes and elapsed time.
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return "--".to_string();
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let rate = (bytes as f64 / secs) as u64;
    format!("{}/s", format_size(rate))
}

/// Print download progress until it completes or fails.
pub async fn display_progress(mut rx: watch::Receiver<TransferProgress>) {
    let mut last_state = rx.borrow().state;

    loop {
        if rx.changed().await.is_err() {
            break;
        }

        let progress = rx.borrow().clone();

        if progress.state != last_state {
            last_state = progress.state;

            match progress.state {
                TransferState::Transferring => {
                    println!("  Receiving {}...", progress.file_name);
                }
                TransferState::Verifying => {
                    println!();
                    println!("  Verifying SHA-256...");
                }
                TransferState::Completed | TransferState::Failed => break,
                TransferState::Connecting | TransferState::Requesting => {}
            }
        }

        if progress.state == TransferState::Transferring {
            let pct = progress.percentage().unwrap_or(0.0);
            let total = progress
                .total_bytes
                .map_or_else(|| "?".to_string(), format_size);

            print!(
                "\r  [{:>6.2}%] {} / {} - {}    ",
                pct,
                format_size(progress.bytes_transferred),
                total,
                format_rate(progress.bytes_transferred, progress.started_at.elapsed())
            );
            let _ = io::stdout().flush();
        }
    }
}
