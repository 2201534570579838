//! # ipatool-dl
//!
//! Backend library for desktop frontends around the `ipatool` CLI.
//!
//! ## Design Philosophy
//!
//! ipatool-dl is designed to be:
//! - **Subprocess-driven** - The tool binary does the store work; this crate
//!   supervises it, decodes its output, and keeps an auditable journal
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use ipatool_dl::{Config, DownloadRequest, IpatoolClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IpatoolClient::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let results = client.search("pages", 10).await?;
//!     if let Some(app) = results.apps().first()
//!         && let Some(bundle_id) = app.bundle_id.clone()
//!     {
//!         let request = DownloadRequest {
//!             identity: ipatool_dl::AppIdentity::from_bundle_id(bundle_id),
//!             ..Default::default()
//!         };
//!         let output = client.download(request).await?;
//!         println!("Downloaded: {:?}", output.output);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// High-level client facade
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Tool resolution, invocation, and output decoding
pub mod executor;
/// Invocation journal
pub mod journal;
/// Store catalog lookups (artwork and size hints)
pub mod lookup;
/// Decoded tool output payloads
pub mod outputs;
/// License ownership verification
pub mod ownership;
/// Download progress tracking
pub mod progress;
/// FIFO admission semaphore
pub mod semaphore;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::IpatoolClient;
pub use config::{
    Config, DownloadConfig, LookupConfig, OutputFormat, ProgressConfig, ToolConfig, VerifyConfig,
};
pub use error::{Error, Result};
pub use executor::{ConfiguredExecutor, ExecutionResult, ToolBackend, ToolExecutor, decode_event};
pub use journal::{CommandJournal, JournalEntry};
pub use lookup::{AppHint, LookupClient};
pub use outputs::{
    AuthOutput, DownloadOutput, SearchOutput, StatusOutput, StoreApp, VersionListOutput,
    VersionMetadataOutput,
};
pub use ownership::{OwnershipKey, OwnershipStatus, OwnershipVerifier};
pub use progress::{ProgressSnapshot, ProgressState};
pub use semaphore::{AdmissionPermit, AdmissionSemaphore, OwnedAdmissionPermit};
pub use types::{AppIdentity, DownloadRequest, Event};

/// Helper function to run the client with graceful signal handling.
///
/// Waits for a termination signal and then calls the client's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use ipatool_dl::{Config, IpatoolClient, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = IpatoolClient::new(Config::default())?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(client).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(client: IpatoolClient) {
    wait_for_signal().await;
    client.shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
