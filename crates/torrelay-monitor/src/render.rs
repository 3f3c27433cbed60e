//! Plain-text progress rendering for chat messages.

use std::fmt::Write as _;
use std::time::Duration;

use torrelay_torrent_core::{StatePhase, TorrentSnapshot};

const BAR_WIDTH: usize = 20;
const NAME_LIMIT: usize = 50;
const FILLED: char = '█';
const EMPTY: char = '░';
const PARTIAL: [&str; 8] = ["", "▏", "▎", "▍", "▌", "▋", "▊", "▉"];
const SIZE_UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
// Engines report "no estimate" as a huge ETA; anything past 100 days is noise.
const MAX_DISPLAYED_SECS: u64 = 8_640_000;

/// Render a bracketed bar of `width` cells followed by the percentage.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn progress_bar(progress: f64, width: usize) -> String {
    let progress = torrelay_torrent_core::model::clamp_progress(progress);
    let exact = width as f64 * progress / 100.0;
    let filled = (exact.floor() as usize).min(width);

    let mut bar = String::with_capacity(width * 3 + 10);
    bar.extend(std::iter::repeat_n(FILLED, filled));
    let mut used = filled;
    if filled < width {
        let partial = ((exact - filled as f64) * PARTIAL.len() as f64) as usize;
        if partial > 0 {
            bar.push_str(PARTIAL[partial.min(PARTIAL.len() - 1)]);
            used += 1;
        }
    }
    bar.extend(std::iter::repeat_n(EMPTY, width - used));
    format!("[{bar}] {progress:.1}%")
}

/// Human-readable byte count using binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", SIZE_UNITS[unit])
}

/// Human-readable transfer rate.
#[must_use]
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_size(bytes_per_second))
}

/// Compact duration such as `4m 10s` or `2d 3h`; `∞` when unknown.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 || seconds > MAX_DISPLAYED_SECS {
        return "∞".to_string();
    }
    match seconds {
        0..60 => format!("{seconds}s"),
        60..3600 => format!("{}m {}s", seconds / 60, seconds % 60),
        3600..86_400 => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
        _ => format!("{}d {}h", seconds / 86_400, (seconds % 86_400) / 3600),
    }
}

/// Multi-line status block for one snapshot.
///
/// Speeds appear only when non-zero and the ETA only while the torrent is
/// still in an active phase.
#[must_use]
pub fn render_progress(snapshot: &TorrentSnapshot, elapsed: Duration) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{}", truncate_name(&snapshot.name));
    let _ = writeln!(text);
    let _ = writeln!(text, "{}", progress_bar(snapshot.progress, BAR_WIDTH));
    let _ = writeln!(text);
    let _ = writeln!(text, "State: {}", snapshot.state);
    let _ = writeln!(text, "Size: {}", format_size(snapshot.size));
    let _ = writeln!(text, "Downloaded: {}", format_size(snapshot.downloaded));
    if snapshot.download_speed > 0 {
        let _ = writeln!(text, "Download: {}", format_speed(snapshot.download_speed));
    }
    if snapshot.upload_speed > 0 {
        let _ = writeln!(text, "Upload: {}", format_speed(snapshot.upload_speed));
    }
    if snapshot.phase() == StatePhase::Active
        && let Some(eta) = snapshot.eta.filter(|eta| *eta > 0)
    {
        let _ = writeln!(text, "Remaining: {}", format_duration(eta));
    }
    let _ = write!(text, "Elapsed: {}", format_duration(elapsed.as_secs()));
    text
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() <= NAME_LIMIT {
        return name.to_string();
    }
    let mut short: String = name.chars().take(NAME_LIMIT).collect();
    short.push_str("...");
    short
}
