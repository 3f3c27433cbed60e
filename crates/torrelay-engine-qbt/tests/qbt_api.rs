use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use httpmock::MockServer;
use httpmock::prelude::*;
use serde_json::json;
use torrelay_config::EngineSettings;
use torrelay_engine_qbt::QbtEngine;
use torrelay_torrent_core::{
    DownloadEngine, StatePhase, TorrentDescriptor, TorrentError, TorrentHandle,
};

const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn engine(server: &MockServer, save_path: &Path) -> Result<QbtEngine> {
    let settings = EngineSettings {
        base_url: server.base_url(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        save_path: save_path.to_path_buf(),
    };
    Ok(QbtEngine::new(&settings)?.with_settle_delay(Duration::ZERO))
}

fn mock_login(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200)
            .header("set-cookie", "SID=session; path=/")
            .body("Ok.");
    })
}

fn torrent_json(hash: &str, name: &str, added_on: i64, save_path: &str) -> serde_json::Value {
    json!({
        "hash": hash,
        "name": name,
        "state": "downloading",
        "progress": 0.425,
        "size": 1000,
        "downloaded": 425,
        "dlspeed": 2048,
        "upspeed": 0,
        "eta": 120,
        "added_on": added_on,
        "save_path": save_path
    })
}

#[tokio::test]
async fn snapshot_logs_in_once_and_converts_progress() -> Result<()> {
    let server = MockServer::start_async().await;
    let login = mock_login(&server);
    let info = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v2/torrents/info")
            .query_param("hashes", HASH);
        then.status(200)
            .json_body(json!([torrent_json(HASH, "ubuntu.iso", 1, "/downloads")]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;
    let handle = TorrentHandle::new(HASH);

    let snapshot = engine
        .snapshot(&handle)
        .await?
        .context("torrent should be known")?;
    engine.snapshot(&handle).await?;

    assert_eq!(snapshot.name, "ubuntu.iso");
    assert!((snapshot.progress - 42.5).abs() < 1e-9);
    assert_eq!(snapshot.phase(), StatePhase::Active);
    assert_eq!(snapshot.eta, Some(120));
    assert_eq!(login.hits(), 1);
    assert_eq!(info.hits(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_hash_has_no_snapshot() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    assert!(engine.snapshot(&TorrentHandle::new(HASH)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_login_is_rejected() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200).body("Fails.");
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let err = engine
        .snapshot(&TorrentHandle::new(HASH))
        .await
        .expect_err("login must fail");
    assert!(matches!(
        err,
        TorrentError::Rejected {
            operation: "login",
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn forbidden_answer_triggers_one_relogin() -> Result<()> {
    let server = MockServer::start_async().await;
    let login = mock_login(&server);
    let info = server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(403).body("Forbidden");
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let err = engine
        .snapshot(&TorrentHandle::new(HASH))
        .await
        .expect_err("still forbidden after retry");

    assert!(matches!(
        err,
        TorrentError::Rejected {
            operation: "torrents_info",
            ..
        }
    ));
    assert_eq!(login.hits(), 2);
    assert_eq!(info.hits(), 2);
    Ok(())
}

#[tokio::test]
async fn hex_magnet_resolves_without_listing() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    let add = server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/add");
        then.status(200).body("Ok.");
    });
    let listing = server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let uri = format!("magnet:?xt=urn:btih:{}&dn=ubuntu", HASH.to_ascii_uppercase());
    let handle = engine.add(TorrentDescriptor::magnet(uri)).await?;

    assert_eq!(handle, Some(TorrentHandle::new(HASH)));
    add.assert();
    assert_eq!(listing.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn base32_magnet_resolves_to_latest_torrent() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/add");
        then.status(200).body("Ok.");
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([
            torrent_json("1111111111111111111111111111111111111111", "old", 10, "/d"),
            torrent_json("2222222222222222222222222222222222222222", "new", 20, "/d"),
        ]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let handle = engine
        .add(TorrentDescriptor::magnet(
            "magnet:?xt=urn:btih:CIQOIT5ZYM4FAXQ3NTGR6X4ALNLH3WCQ",
        ))
        .await?;

    assert_eq!(
        handle,
        Some(TorrentHandle::new("2222222222222222222222222222222222222222"))
    );
    Ok(())
}

#[tokio::test]
async fn torrent_file_resolves_by_name_first() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/add");
        then.status(200).body("Ok.");
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([
            torrent_json("1111111111111111111111111111111111111111", "debian-12", 10, "/d"),
            torrent_json("2222222222222222222222222222222222222222", "other", 20, "/d"),
        ]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let handle = engine
        .add(TorrentDescriptor::torrent_file("debian-12.torrent", b"d4:infod".to_vec()))
        .await?;

    assert_eq!(
        handle,
        Some(TorrentHandle::new("1111111111111111111111111111111111111111"))
    );
    Ok(())
}

#[tokio::test]
async fn refused_torrent_yields_no_handle() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/add");
        then.status(200).body("Fails.");
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let handle = engine
        .add(TorrentDescriptor::magnet(format!("magnet:?xt=urn:btih:{HASH}")))
        .await?;
    assert_eq!(handle, None);
    Ok(())
}

#[tokio::test]
async fn list_files_keeps_only_files_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("show"))?;
    std::fs::write(dir.path().join("show/ep1.mkv"), b"video")?;
    let save_path = dir.path().to_string_lossy().into_owned();

    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200)
            .json_body(json!([torrent_json(HASH, "show", 1, &save_path)]));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/v2/torrents/files")
            .query_param("hash", HASH);
        then.status(200)
            .json_body(json!([{"name": "show/ep1.mkv"}, {"name": "show/ep2.mkv"}]));
    });
    let engine = engine(&server, Path::new("/unused"))?;

    let files = engine.list_files(&TorrentHandle::new(HASH)).await?;
    assert_eq!(files, vec![PathBuf::from(&save_path).join("show/ep1.mkv")]);
    Ok(())
}

#[tokio::test]
async fn list_files_for_unknown_torrent_is_not_found() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(json!([]));
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    let err = engine
        .list_files(&TorrentHandle::new(HASH))
        .await
        .expect_err("unknown torrent");
    assert!(matches!(err, TorrentError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn remove_posts_delete_request() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server);
    let delete = server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/delete");
        then.status(200);
    });
    let engine = engine(&server, Path::new("/downloads"))?;

    engine.remove(&TorrentHandle::new(HASH), true).await?;
    delete.assert();
    Ok(())
}

#[tokio::test]
async fn unreachable_engine_is_unavailable() -> Result<()> {
    let settings = EngineSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        ..EngineSettings::default()
    };
    let engine = QbtEngine::new(&settings)?;

    let err = engine
        .snapshot(&TorrentHandle::new(HASH))
        .await
        .expect_err("nothing listens on the discard port");
    assert!(matches!(err, TorrentError::Unavailable { .. }));
    Ok(())
}
