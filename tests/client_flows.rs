//! End-to-end tests for the client command flows
//!
//! A fake `ipatool` shell script stands in for the real binary, so these
//! tests cover resolution, argument assembly, journaling, decoding, and
//! event emission without a store account.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test client_flows
//! ```

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{client_with_tool, wait_for_event};
use ipatool_dl::{AppIdentity, Error, Event, OwnershipKey};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn search_decodes_apps_and_journals_the_run() {
    let script = r#"#!/bin/sh
case "$*" in
  *search*)
    echo "==> searching the catalog"
    echo '{"count":2,"apps":[{"id":11,"bundleID":"com.example.one","name":"One","version":"1.0"},{"id":22,"bundleID":"com.example.two","name":"Two","version":"2.0"}]}'
    ;;
  *list-versions*)
    echo "license is required" >&2
    exit 1
    ;;
esac
"#;
    let (client, _dir) = client_with_tool(script);
    let mut events = client.subscribe();

    let output = client.search("example", 5).await.expect("search succeeds");
    assert_eq!(output.count, Some(2));
    assert_eq!(output.apps()[0].name.as_deref(), Some("One"));
    assert_eq!(output.apps()[1].bundle_id.as_deref(), Some("com.example.two"));

    // The run is journaled with the term in place.
    let journaled = client.journal().entries().into_iter().any(|entry| {
        entry.succeeded()
            && entry.arguments.contains(&"search".to_string())
            && entry.arguments.contains(&"example".to_string())
    });
    assert!(journaled, "search invocation missing from the journal");

    let started = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::CommandStarted { subcommand } if subcommand == "search")
    })
    .await;
    assert!(started.is_some(), "no CommandStarted for the search");

    let finished = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::CommandFinished { subcommand, exit_code, .. }
            if subcommand == "search" && *exit_code == 0)
    })
    .await;
    assert!(finished.is_some(), "no CommandFinished for the search");
}

#[tokio::test]
async fn login_masks_credentials_in_the_journal() {
    let script = r#"#!/bin/sh
echo '{"email":"user@example.com","name":"User Example","success":true}'
"#;
    let (client, _dir) = client_with_tool(script);

    let auth = client
        .login("user@example.com", "hunter2", Some("123456"))
        .await
        .expect("login succeeds");
    assert_eq!(auth.success, Some(true));
    assert_eq!(auth.email.as_deref(), Some("user@example.com"));

    let entry = client.journal().latest().expect("login journaled");
    assert!(entry.arguments.contains(&"--auth-code".to_string()));
    assert!(
        entry.arguments.iter().all(|a| a != "hunter2" && a != "123456"),
        "credential values leaked into the journal: {:?}",
        entry.arguments
    );
    assert!(
        entry.arguments.iter().any(|a| a == "••••••"),
        "masked placeholder missing: {:?}",
        entry.arguments
    );
}

#[tokio::test]
async fn failures_surface_stderr_and_are_journaled_first() {
    let script = r#"#!/bin/sh
echo "partial stdout"
echo "failed to resolve account" >&2
exit 7
"#;
    let (client, _dir) = client_with_tool(script);
    let mut events = client.subscribe();

    let err = client.account_info().await.unwrap_err();
    match err {
        Error::CommandFailed(message) => {
            assert!(message.contains("failed to resolve account"), "{message}");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    // Journaled before the error was raised.
    let entry = client.journal().latest().expect("failed run journaled");
    assert_eq!(entry.exit_code, 7);
    assert!(!entry.succeeded());
    assert!(entry.stderr.contains("failed to resolve account"));

    let finished = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::CommandFinished { exit_code, .. } if *exit_code == 7)
    })
    .await;
    assert!(finished.is_some(), "failed run emitted no CommandFinished");
}

#[tokio::test]
async fn failures_fall_back_to_stdout_when_stderr_is_empty() {
    let script = r#"#!/bin/sh
echo "boom happened"
exit 1
"#;
    let (client, _dir) = client_with_tool(script);

    let err = client.account_info().await.unwrap_err();
    match err {
        Error::CommandFailed(message) => assert!(message.contains("boom happened"), "{message}"),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_output_is_a_decoding_error() {
    let script = r#"#!/bin/sh
echo "plain text, no payload"
"#;
    let (client, _dir) = client_with_tool(script);

    let err = client.account_info().await.unwrap_err();
    assert!(matches!(err, Error::DecodingFailed));
}

#[tokio::test]
async fn purchase_success_marks_the_bundle_owned() {
    let script = r#"#!/bin/sh
echo '{"success":true}'
"#;
    let (client, _dir) = client_with_tool(script);

    let output = client
        .purchase("com.example.app")
        .await
        .expect("purchase succeeds");
    assert_eq!(output.success, Some(true));
    assert!(
        client
            .ownership()
            .is_verified(&OwnershipKey::bundle("com.example.app"))
    );
}

#[tokio::test]
async fn version_listing_and_metadata_round_trip() {
    let script = r#"#!/bin/sh
case "$*" in
  *get-version-metadata*)
    echo '{"success":true,"externalVersionID":"850101","displayVersion":"2.4.1","releaseDate":"2023-07-11T09:00:00Z"}'
    ;;
  *list-versions*)
    echo '{"bundleID":"com.example.app","externalVersionIdentifiers":["850101","850100"],"success":true}'
    ;;
esac
"#;
    let (client, _dir) = client_with_tool(script);
    let identity = AppIdentity::from_bundle_id("com.example.app");

    let listing = client
        .list_versions(&identity)
        .await
        .expect("list-versions succeeds");
    assert_eq!(listing.identifiers(), ["850101", "850100"]);

    let versions = client
        .display_versions(&identity, listing.identifiers())
        .await;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions.get("850101").map(String::as_str), Some("2.4.1"));

    // One listing run plus one metadata run per identifier.
    assert_eq!(client.journal().len(), 3);
}
