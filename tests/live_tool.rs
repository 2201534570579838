//! End-to-end tests against a real `ipatool` binary
//!
//! These tests run the installed tool and are marked #[ignore] to keep
//! them out of normal CI.
//!
//! # Running the tests
//!
//! ```bash
//! # Run all live tests
//! cargo test --features live-tests --test live_tool -- --ignored --nocapture
//! ```
//!
//! # Required environment variables (.env file, sign-in test only)
//!
//! - `IPATOOL_EMAIL` - store account email
//! - `IPATOOL_PASSWORD` - store account password

#![cfg(feature = "live-tests")]

use ipatool_dl::{Config, Error, IpatoolClient};
use serial_test::serial;

fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    std::env::var("IPATOOL_EMAIL").is_ok() && std::env::var("IPATOOL_PASSWORD").is_ok()
}

/// The tool answers `auth info` whether or not anyone is signed in; both
/// outcomes prove resolution, spawning, and decoding work end to end.
#[tokio::test]
#[ignore]
#[serial]
async fn account_info_round_trips_through_the_real_binary() {
    let client = IpatoolClient::new(Config::default()).unwrap();

    match client.account_info().await {
        Err(Error::ExecutableNotFound) => {
            eprintln!("Skipping: ipatool binary not installed");
        }
        Ok(info) => {
            println!("Signed in as {:?}", info.email);
            assert_eq!(client.journal().len(), 1);
        }
        Err(e) => {
            println!("Tool reported an error (expected when signed out): {e}");
            assert_eq!(client.journal().len(), 1);
        }
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn live_sign_in_and_search() {
    if !has_live_credentials() {
        eprintln!("Skipping: IPATOOL_EMAIL/IPATOOL_PASSWORD not set in .env");
        return;
    }

    let client = IpatoolClient::new(Config::default()).unwrap();
    let email = std::env::var("IPATOOL_EMAIL").unwrap();
    let password = std::env::var("IPATOOL_PASSWORD").unwrap();

    let auth = client
        .login(&email, &password, None)
        .await
        .expect("sign-in should succeed with valid credentials");
    assert_eq!(auth.success, Some(true));

    let results = client.search("pages", 5).await.expect("search succeeds");
    assert!(results.apps().len() <= 5);
    println!("Found {} apps", results.apps().len());
}
