//! Cookie-session client for the qBittorrent Web API v2.
//!
//! # Design
//! - One login per session; a 403 answer drops the session, logs in again and
//!   retries the request once.
//! - Transport failures surface as [`TorrentError::Unavailable`], non-success
//!   statuses as [`TorrentError::Rejected`].
//! - Magnet links carrying a hex info hash resolve their handle directly.
//!   Everything else is looked up after a short settle delay.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use torrelay_config::EngineSettings;
use torrelay_torrent_core::{
    DownloadEngine, TorrentDescriptor, TorrentError, TorrentHandle, TorrentResult, TorrentSnapshot,
};
use tracing::{debug, info, warn};

use crate::model::{QbtFile, QbtTorrentInfo, magnet_info_hash};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
const OK_BODY: &str = "Ok.";

/// [`DownloadEngine`] backed by a qBittorrent instance.
pub struct QbtEngine {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    save_path: PathBuf,
    logged_in: AtomicBool,
    settle_delay: Duration,
}

impl QbtEngine {
    /// Build an adapter from connection settings. No request is made yet.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Unavailable`] when the HTTP client cannot be
    /// constructed.
    pub fn new(settings: &EngineSettings) -> TorrentResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()
            .map_err(|err| TorrentError::unavailable("build_client", err))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            save_path: settings.save_path.clone(),
            logged_in: AtomicBool::new(false),
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    /// Override how long to wait before looking up a freshly added torrent.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2/{endpoint}", self.base_url)
    }

    async fn login(&self) -> TorrentResult<()> {
        let response = self
            .client
            .post(self.url("auth/login"))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| TorrentError::unavailable("login", err))?;
        let response = check_status("login", response).await?;
        let body = response
            .text()
            .await
            .map_err(|err| TorrentError::unavailable("login", err))?;
        if body.trim() != OK_BODY {
            return Err(TorrentError::Rejected {
                operation: "login",
                detail: body.trim().to_string(),
            });
        }
        self.logged_in.store(true, Ordering::SeqCst);
        info!(url = %self.base_url, "logged in to qBittorrent");
        Ok(())
    }

    async fn send<F>(&self, operation: &'static str, build: F) -> TorrentResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        if !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }
        let response = build(&self.client)
            .send()
            .await
            .map_err(|err| TorrentError::unavailable(operation, err))?;
        if response.status() != StatusCode::FORBIDDEN {
            return check_status(operation, response).await;
        }

        debug!(operation, "session rejected; logging in again");
        self.logged_in.store(false, Ordering::SeqCst);
        self.login().await?;
        let response = build(&self.client)
            .send()
            .await
            .map_err(|err| TorrentError::unavailable(operation, err))?;
        check_status(operation, response).await
    }

    async fn torrents(&self, hash: Option<&str>) -> TorrentResult<Vec<QbtTorrentInfo>> {
        let url = self.url("torrents/info");
        let response = self
            .send("torrents_info", |client| {
                let request = client.get(&url);
                match hash {
                    Some(hash) => request.query(&[("hashes", hash)]),
                    None => request,
                }
            })
            .await?;
        response
            .json()
            .await
            .map_err(|err| TorrentError::unavailable("torrents_info", err))
    }

    async fn info(&self, handle: &TorrentHandle) -> TorrentResult<Option<QbtTorrentInfo>> {
        Ok(self
            .torrents(Some(handle.as_str()))
            .await?
            .into_iter()
            .find(|info| info.hash.eq_ignore_ascii_case(handle.as_str())))
    }

    async fn admit(&self, descriptor: &TorrentDescriptor) -> TorrentResult<bool> {
        let url = self.url("torrents/add");
        let save_path = self.save_path.to_string_lossy().into_owned();
        let response = match descriptor {
            TorrentDescriptor::Magnet { uri } => {
                self.send("torrents_add", |client| {
                    client
                        .post(&url)
                        .form(&[("urls", uri.as_str()), ("savepath", save_path.as_str())])
                })
                .await?
            }
            TorrentDescriptor::TorrentFile { file_name, bytes } => {
                self.send("torrents_add", |client| {
                    let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    let form = Form::new()
                        .part("torrents", part)
                        .text("savepath", save_path.clone());
                    client.post(&url).multipart(form)
                })
                .await?
            }
        };
        let body = response
            .text()
            .await
            .map_err(|err| TorrentError::unavailable("torrents_add", err))?;
        Ok(body.trim() == OK_BODY)
    }

    async fn resolve_added(&self, descriptor: &TorrentDescriptor) -> TorrentResult<Option<TorrentHandle>> {
        if let TorrentDescriptor::Magnet { uri } = descriptor
            && let Some(hash) = magnet_info_hash(uri)
        {
            return Ok(Some(TorrentHandle::new(hash)));
        }

        tokio::time::sleep(self.settle_delay).await;
        let torrents = self.torrents(None).await?;
        if let TorrentDescriptor::TorrentFile { file_name, .. } = descriptor {
            let stem = file_name.trim_end_matches(".torrent");
            if let Some(info) = torrents
                .iter()
                .find(|info| !info.name.is_empty() && (info.name.contains(stem) || stem.contains(&info.name)))
            {
                return Ok(Some(TorrentHandle::new(info.hash.to_ascii_lowercase())));
            }
        }
        Ok(torrents
            .into_iter()
            .max_by_key(|info| info.added_on)
            .map(|info| TorrentHandle::new(info.hash.to_ascii_lowercase())))
    }
}

#[async_trait]
impl DownloadEngine for QbtEngine {
    async fn add(&self, descriptor: TorrentDescriptor) -> TorrentResult<Option<TorrentHandle>> {
        if !self.admit(&descriptor).await? {
            warn!("qBittorrent refused the torrent");
            return Ok(None);
        }
        let handle = self.resolve_added(&descriptor).await?;
        match &handle {
            Some(handle) => info!(handle = %handle, "torrent added"),
            None => warn!("torrent accepted but not found in the engine listing"),
        }
        Ok(handle)
    }

    async fn snapshot(&self, handle: &TorrentHandle) -> TorrentResult<Option<TorrentSnapshot>> {
        Ok(self.info(handle).await?.map(|info| info.to_snapshot()))
    }

    async fn list_files(&self, handle: &TorrentHandle) -> TorrentResult<Vec<PathBuf>> {
        let Some(info) = self.info(handle).await? else {
            return Err(TorrentError::NotFound {
                handle: handle.clone(),
            });
        };
        let url = self.url("torrents/files");
        let files: Vec<QbtFile> = self
            .send("torrents_files", |client| {
                client.get(&url).query(&[("hash", handle.as_str())])
            })
            .await?
            .json()
            .await
            .map_err(|err| TorrentError::unavailable("torrents_files", err))?;

        let save_path = if info.save_path.is_empty() {
            self.save_path.clone()
        } else {
            PathBuf::from(&info.save_path)
        };
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            match existing_path(&save_path, &info.name, &file.name).await {
                Some(path) => paths.push(path),
                None => debug!(handle = %handle, file = %file.name, "skipping file missing on disk"),
            }
        }
        Ok(paths)
    }

    async fn remove(&self, handle: &TorrentHandle, delete_files: bool) -> TorrentResult<()> {
        let url = self.url("torrents/delete");
        let delete_files = if delete_files { "true" } else { "false" };
        self.send("torrents_delete", |client| {
            client.post(&url).form(&[
                ("hashes", handle.as_str()),
                ("deleteFiles", delete_files),
            ])
        })
        .await?;
        info!(handle = %handle, delete_files, "torrent removed");
        Ok(())
    }
}

/// Resolve a file entry against the save path, tolerating engines that
/// report names relative to the torrent folder.
async fn existing_path(save_path: &Path, torrent_name: &str, file_name: &str) -> Option<PathBuf> {
    let direct = save_path.join(file_name);
    if tokio::fs::metadata(&direct).await.is_ok_and(|meta| meta.is_file()) {
        return Some(direct);
    }
    let nested = save_path.join(torrent_name).join(file_name);
    tokio::fs::metadata(&nested)
        .await
        .is_ok_and(|meta| meta.is_file())
        .then_some(nested)
}

async fn check_status(operation: &'static str, response: Response) -> TorrentResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = if body.trim().is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {}", body.trim())
    };
    Err(TorrentError::Rejected { operation, detail })
}
