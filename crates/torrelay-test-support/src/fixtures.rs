//! File and snapshot fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use torrelay_torrent_core::{EngineState, TorrentSnapshot};

/// Write `len` bytes of a non-repeating-per-block pattern to `dir/name`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_patterned_file(dir: &Path, name: &str, len: usize) -> Result<PathBuf> {
    let path = dir.join(name);
    let bytes: Vec<u8> = (0..len)
        .map(|index| u8::try_from((index * 31 + index / 251) % 256).unwrap_or_default())
        .collect();
    fs::write(&path, bytes).with_context(|| format!("failed to write fixture {}", path.display()))?;
    Ok(path)
}

/// Write `len` pseudo-random bytes to `dir/name`; gzip cannot shrink them.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_random_file(dir: &Path, name: &str, len: usize, seed: u64) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut state = seed | 1;
    let bytes: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect();
    fs::write(&path, bytes).with_context(|| format!("failed to write fixture {}", path.display()))?;
    Ok(path)
}

/// Snapshot for an engine `label` at `progress` percent.
#[must_use]
pub fn snapshot(label: &str, progress: f64) -> TorrentSnapshot {
    TorrentSnapshot::new("payload", EngineState::from_engine(label), progress)
}
