//! Upload and download endpoints, observed over HTTP and the duplex channel.

mod common;

use common::*;
use reqwest::multipart::{Form, Part};
use std::sync::atomic::Ordering;
use std::time::Duration;

const MIB: usize = 1 << 20;

fn file_part(name: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name(name.to_string())
}

#[tokio::test]
async fn upload_stores_base_name_and_reports_progress() {
    let server = start_server().await;
    let (_tx, mut rx) = connect(&server, "c1", "proj1").await;

    let form = Form::new().part("files", file_part("../evil/kick.wav", vec![7u8; MIB]));
    let resp = reqwest::Client::new()
        .post(server.http_url("/?id=c1&place=proj1"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let stored = server.storage_root().join("proj1").join("kick.wav").join("kick.wav");
    assert_eq!(std::fs::metadata(&stored).unwrap().len(), MIB as u64);
    assert!(!server.storage_root().join("evil").exists());

    let (progress, processed) = recv_until(&mut rx, "processed").await;
    let counts: Vec<i64> = progress
        .iter()
        .map(|m| {
            assert_eq!(m["action"], "progress");
            m["number"].as_i64().unwrap()
        })
        .collect();
    assert!(!counts.is_empty());
    assert!(counts.windows(2).all(|w| w[0] < w[1]), "not increasing: {counts:?}");
    assert_eq!(*counts.last().unwrap(), MIB as i64);

    assert_eq!(processed["filename"], "kick.wav");
    assert_eq!(processed["file"]["size"], MIB as u64);
}

#[tokio::test]
async fn upload_multiple_files() {
    let server = start_server().await;
    let (_tx, mut rx) = connect(&server, "c1", "proj1").await;

    let form = Form::new()
        .part("files", file_part("a.wav", vec![1u8; 100]))
        .part("files", file_part("b.wav", vec![2u8; 200]))
        .text("note", "ignored");
    let resp = reqwest::Client::new()
        .post(server.http_url("/upload?id=c1&place=proj1"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut processed = Vec::new();
    while processed.len() < 2 {
        let (_, msg) = recv_until(&mut rx, "processed").await;
        processed.push(msg["filename"].as_str().unwrap().to_string());
    }
    processed.sort();
    assert_eq!(processed, vec!["a.wav", "b.wav"]);
    assert!(server.storage_root().join("proj1/b.wav/b.wav").is_file());
}

#[tokio::test]
async fn upload_without_channel_still_succeeds() {
    let server = start_server().await;

    let form = Form::new().part("files", file_part("snare.wav", vec![3u8; 4096]));
    let resp = reqwest::Client::new()
        .post(server.http_url("/?id=nobody&place=proj1"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.storage_root().join("proj1/snare.wav/snare.wav").is_file());
}

#[tokio::test]
async fn upload_requires_id_and_place() {
    let server = start_server().await;
    let form = Form::new().part("files", file_part("a.wav", vec![0u8; 10]));
    let resp = reqwest::Client::new()
        .post(server.http_url("/?place=proj1"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "missing_parameter");
}

#[tokio::test]
async fn upload_with_non_multipart_body_is_bad_request() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(server.http_url("/?id=c1&place=proj1"))
        .body("plain text")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_form");
}

#[tokio::test]
async fn download_streams_archive_between_processing_markers() {
    let server = start_server().await;
    server.seed("proj1", "kick.wav", b"RIFF");
    let (_tx, mut rx) = connect(&server, "c1", "proj1").await;

    let resp = reqwest::Client::new()
        .post(server.http_url("/download?id=c1&place=proj1"))
        .body(r#"["kick.wav"]"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/zip");
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment"));
    assert_eq!(&resp.bytes().await.unwrap()[..], FAKE_ARCHIVE);

    assert_eq!(recv_json(&mut rx).await["action"], "processingstart");
    assert_eq!(recv_json(&mut rx).await["action"], "processingstop");
}

#[tokio::test]
async fn download_removes_archive_after_streaming() {
    let server = start_server().await;
    server.seed("proj1", "kick.wav", b"RIFF");
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .post(server.http_url("/download?id=c1&place=proj1"))
            .body(r#"["kick.wav"]"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(&resp.bytes().await.unwrap()[..], FAKE_ARCHIVE);
    }

    let archives = server.state.storage.archive_dir();
    let mut left = Vec::new();
    for _ in 0..50 {
        left = std::fs::read_dir(&archives)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default();
        if left.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(left.is_empty(), "archives left behind: {left:?}");
}

#[tokio::test]
async fn failed_packaging_is_500_and_still_stops_processing() {
    let server = start_server().await;
    server.seed("proj1", "kick.wav", b"RIFF");
    server.packer.fail.store(true, Ordering::SeqCst);
    let (_tx, mut rx) = connect(&server, "c1", "proj1").await;

    let resp = reqwest::Client::new()
        .post(server.http_url("/download?id=c1&place=proj1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "pack_failed");

    assert_eq!(recv_json(&mut rx).await["action"], "processingstart");
    assert_eq!(recv_json(&mut rx).await["action"], "processingstop");
    assert!(try_recv_json(&mut rx, Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn download_requires_place() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(server.http_url("/download?id=c1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}
