//! End-to-end tests for the download flow
//!
//! The fake tool streams bytes into `<output>.tmp` and renames it into
//! place, the way the real binary behaves, so these tests cover filename
//! derivation, argument order, progress polling, and the one-at-a-time
//! guard.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test download_flow
//! ```

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{client_with_tool, drain_events, wait_for_event};
use ipatool_dl::{AppIdentity, DownloadRequest, Error, Event, OwnershipKey};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Writes 64 KiB to the transient path, waits, grows it to 256 KiB, then
/// renames it into place
const STREAMING_SCRIPT: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then
    out="$arg"
  fi
  prev="$arg"
done
head -c 65536 /dev/zero > "$out.tmp"
sleep 1
head -c 262144 /dev/zero > "$out.tmp"
mv "$out.tmp" "$out"
echo '{"success":true,"purchased":false}'
"#;

#[tokio::test]
async fn download_streams_progress_and_finishes() {
    let (client, dir) = client_with_tool(STREAMING_SCRIPT);
    let mut events = client.subscribe();

    let output_path = dir.path().join("downloads").join("app.ipa");
    let request = DownloadRequest {
        identity: AppIdentity::from_track_id(361_309_726),
        output_path: Some(output_path.clone()),
        ..Default::default()
    };
    let output = client.download(request).await.expect("download succeeds");
    assert_eq!(output.success, Some(true));
    assert_eq!(std::fs::metadata(&output_path).unwrap().len(), 262_144);

    // The poller saw the transient file while the tool was writing.
    let progressed = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::DownloadProgress { bytes, .. } if *bytes > 0)
    })
    .await;
    assert!(progressed.is_some(), "no DownloadProgress observed");

    match wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::DownloadFinished { .. })
    })
    .await
    {
        Some(Event::DownloadFinished { path }) => assert_eq!(path, output_path),
        other => panic!("expected DownloadFinished, got {other:?}"),
    }

    assert!(!client.progress().is_active());
}

#[tokio::test]
async fn download_derives_a_filename_from_the_identity() {
    let (client, dir) = client_with_tool(STREAMING_SCRIPT);

    let request = DownloadRequest {
        identity: AppIdentity::from_bundle_id("com.example.pages"),
        ..Default::default()
    };
    client.download(request).await.expect("download succeeds");

    let derived = dir.path().join("downloads").join("com.example.pages.ipa");
    assert!(derived.is_file(), "missing {}", derived.display());
}

#[tokio::test]
async fn download_passes_arguments_in_contract_order() {
    let script = r#"#!/bin/sh
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
echo '{"success":true}'
"#;
    let (client, dir) = client_with_tool(script);

    let output_path = dir.path().join("out").join("pkg.ipa");
    let request = DownloadRequest {
        identity: AppIdentity {
            track_id: Some(7),
            bundle_id: Some("com.example.app".into()),
        },
        external_version_id: Some("850101".into()),
        output_path: Some(output_path.clone()),
        purchase: true,
    };
    client.download(request).await.expect("download succeeds");

    let recorded = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    let args: Vec<&str> = recorded.lines().collect();
    let output_str = output_path.to_string_lossy().into_owned();
    let expected = vec![
        "--format",
        "json",
        "--non-interactive",
        "download",
        "--app-id",
        "7",
        "--bundle-identifier",
        "com.example.app",
        "--external-version-id",
        "850101",
        "--output",
        output_str.as_str(),
        "--purchase",
    ];
    assert_eq!(args, expected);
}

#[tokio::test]
async fn a_download_in_flight_blocks_a_second_request() {
    let script = r#"#!/bin/sh
sleep 2
echo '{"success":true}'
"#;
    let (client, _dir) = client_with_tool(script);

    let background = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .download(DownloadRequest {
                    identity: AppIdentity::from_track_id(7),
                    ..Default::default()
                })
                .await
        })
    };

    // Wait for the first download to claim the progress slot.
    let mut waited = 0;
    while !client.progress().is_active() && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert!(client.progress().is_active(), "first download never started");

    let err = client
        .download(DownloadRequest {
            identity: AppIdentity::from_track_id(8),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("already in progress"),
        "unexpected error: {err}"
    );

    let first = background.await.unwrap();
    assert!(first.is_ok(), "first download failed: {first:?}");
}

#[tokio::test]
async fn a_purchased_download_marks_the_bundle_owned() {
    let script = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then
    out="$arg"
  fi
  prev="$arg"
done
: > "$out"
echo '{"success":true,"purchased":true}'
"#;
    let (client, _dir) = client_with_tool(script);

    let request = DownloadRequest {
        identity: AppIdentity::from_bundle_id("com.example.app"),
        purchase: true,
        ..Default::default()
    };
    let output = client.download(request).await.expect("download succeeds");
    assert_eq!(output.purchased, Some(true));
    assert!(
        client
            .ownership()
            .is_verified(&OwnershipKey::bundle("com.example.app"))
    );
}

#[tokio::test]
async fn a_failed_download_releases_the_guard() {
    let script = r#"#!/bin/sh
echo "temporarily unavailable" >&2
exit 1
"#;
    let (client, _dir) = client_with_tool(script);

    let request = DownloadRequest {
        identity: AppIdentity::from_track_id(7),
        ..Default::default()
    };
    let err = client.download(request.clone()).await.unwrap_err();
    assert!(err.to_string().contains("temporarily unavailable"));
    assert!(!client.progress().is_active());

    // The guard is free again: the retry reaches the tool instead of
    // being rejected as concurrent.
    let err = client.download(request).await.unwrap_err();
    assert!(err.to_string().contains("temporarily unavailable"));
    assert_eq!(client.journal().len(), 2);
}

#[tokio::test]
async fn a_download_without_a_payload_is_a_decoding_error() {
    let script = r#"#!/bin/sh
echo "download finished"
"#;
    let (client, _dir) = client_with_tool(script);
    let mut events = client.subscribe();

    let request = DownloadRequest {
        identity: AppIdentity::from_track_id(7),
        ..Default::default()
    };
    let err = client.download(request).await.unwrap_err();
    assert!(matches!(err, Error::DecodingFailed), "got {err:?}");

    // Exit 0 with no payload is not a success: nothing finished, and
    // the guard is free again.
    let finished = drain_events(&mut events)
        .into_iter()
        .any(|event| matches!(event, Event::DownloadFinished { .. }));
    assert!(!finished, "an undecodable run must not report completion");
    assert!(!client.progress().is_active());
}
