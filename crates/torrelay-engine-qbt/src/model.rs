//! Wire DTOs returned by the qBittorrent Web API.

use serde::Deserialize;
use torrelay_torrent_core::{EngineState, TorrentSnapshot};

/// ETA value the engine reports when it cannot estimate completion.
const ETA_INFINITE: i64 = 8_640_000;

const BTIH_PREFIX: &str = "urn:btih:";

/// One entry of `GET /api/v2/torrents/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct QbtTorrentInfo {
    /// Lowercase info hash.
    pub hash: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Raw engine state label.
    #[serde(default)]
    pub state: String,
    /// Completion ratio in `0..=1`.
    #[serde(default)]
    pub progress: f64,
    /// Selected payload size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Bytes downloaded so far.
    #[serde(default)]
    pub downloaded: i64,
    /// Download rate in bytes per second.
    #[serde(default)]
    pub dlspeed: i64,
    /// Upload rate in bytes per second.
    #[serde(default)]
    pub upspeed: i64,
    /// Seconds until completion; [`ETA_INFINITE`] when unknown.
    #[serde(default)]
    pub eta: i64,
    /// Unix timestamp of admission.
    #[serde(default)]
    pub added_on: i64,
    /// Directory the payload is written into.
    #[serde(default)]
    pub save_path: String,
}

impl QbtTorrentInfo {
    /// Convert into the engine-agnostic snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> TorrentSnapshot {
        let mut snapshot = TorrentSnapshot::new(
            self.name.clone(),
            EngineState::from_engine(&self.state),
            self.progress * 100.0,
        );
        snapshot.size = non_negative(self.size);
        snapshot.downloaded = non_negative(self.downloaded);
        snapshot.download_speed = non_negative(self.dlspeed);
        snapshot.upload_speed = non_negative(self.upspeed);
        snapshot.eta = match self.eta {
            1..ETA_INFINITE => Some(non_negative(self.eta)),
            _ => None,
        };
        snapshot.hash.clone_from(&self.hash);
        snapshot
    }
}

/// One entry of `GET /api/v2/torrents/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct QbtFile {
    /// Path relative to the torrent save path.
    pub name: String,
}

/// Extract the hex `btih` info hash from a magnet link, lowercased.
///
/// Base32 hashes and malformed links yield `None`; callers then fall back to
/// looking the torrent up after admission.
#[must_use]
pub fn magnet_info_hash(uri: &str) -> Option<String> {
    let query = uri.strip_prefix("magnet:?")?;
    query.split('&').find_map(|pair| {
        let value = pair.strip_prefix("xt=")?;
        let value = value
            .get(..BTIH_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(BTIH_PREFIX))
            .map(|_| &value[BTIH_PREFIX.len()..])?;
        (value.len() == 40 && value.bytes().all(|byte| byte.is_ascii_hexdigit()))
            .then(|| value.to_ascii_lowercase())
    })
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrelay_torrent_core::StatePhase;

    const HASH: &str = "0123456789ABCDEF0123456789abcdef01234567";

    #[test]
    fn magnet_hash_is_extracted_and_lowercased() {
        let uri = format!("magnet:?dn=ubuntu&xt=urn:btih:{HASH}&tr=udp://tracker");
        assert_eq!(
            magnet_info_hash(&uri).as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
    }

    #[test]
    fn base32_and_malformed_links_are_rejected() {
        assert_eq!(
            magnet_info_hash("magnet:?xt=urn:btih:CIQOIT5ZYM4FAXQ3NTGR6X4ALNLH3WCQ"),
            None
        );
        assert_eq!(magnet_info_hash("https://example.com/file.torrent"), None);
        assert_eq!(magnet_info_hash("magnet:?dn=nothing"), None);
    }

    #[test]
    fn info_converts_to_percent_snapshot() -> anyhow::Result<()> {
        let info: QbtTorrentInfo = serde_json::from_value(serde_json::json!({
            "hash": "abc",
            "name": "ubuntu.iso",
            "state": "stalledUP",
            "progress": 1.0,
            "size": 4096,
            "downloaded": 4096,
            "dlspeed": 0,
            "upspeed": 12,
            "eta": 8_640_000,
            "added_on": 1_700_000_000,
            "save_path": "/downloads"
        }))?;
        let snapshot = info.to_snapshot();
        assert!((snapshot.progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.phase(), StatePhase::Succeeded);
        assert_eq!(snapshot.size, 4096);
        assert_eq!(snapshot.upload_speed, 12);
        assert_eq!(snapshot.eta, None);
        assert_eq!(snapshot.hash, "abc");
        Ok(())
    }

    #[test]
    fn missing_fields_default_and_negative_sizes_clamp() -> anyhow::Result<()> {
        let info: QbtTorrentInfo = serde_json::from_value(serde_json::json!({
            "hash": "abc",
            "state": "metaDL",
            "size": -1,
            "eta": 90
        }))?;
        let snapshot = info.to_snapshot();
        assert_eq!(snapshot.size, 0);
        assert_eq!(snapshot.eta, Some(90));
        assert_eq!(snapshot.phase(), StatePhase::Active);
        Ok(())
    }
}
