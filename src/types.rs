//! Core types for ipatool-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Identifies an app in the store by numeric track id, bundle identifier,
/// or both
///
/// Operations that target a single app accept this pair; at least one of the
/// two identifiers must be present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    /// Numeric store identifier (trackId)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,

    /// Reverse-DNS bundle identifier (e.g. "com.example.app")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

impl AppIdentity {
    /// Identity from a numeric track id
    pub fn from_track_id(track_id: i64) -> Self {
        Self {
            track_id: Some(track_id),
            bundle_id: None,
        }
    }

    /// Identity from a bundle identifier
    pub fn from_bundle_id(bundle_id: impl Into<String>) -> Self {
        Self {
            track_id: None,
            bundle_id: Some(bundle_id.into()),
        }
    }

    /// Ensures at least one identifier is present
    pub fn validate(&self) -> Result<()> {
        let has_bundle = self
            .bundle_id
            .as_deref()
            .is_some_and(|b| !b.trim().is_empty());
        if self.track_id.is_none() && !has_bundle {
            return Err(Error::InvalidInput(
                "an app id or bundle identifier is required".into(),
            ));
        }
        Ok(())
    }

    /// Appends the tool's identifier flags, app id first
    pub fn push_args(&self, args: &mut Vec<String>) {
        if let Some(track_id) = self.track_id {
            args.push("--app-id".into());
            args.push(track_id.to_string());
        }
        if let Some(bundle_id) = self.bundle_id.as_deref()
            && !bundle_id.trim().is_empty()
        {
            args.push("--bundle-identifier".into());
            args.push(bundle_id.to_string());
        }
    }
}

/// Parameters for a package download
#[derive(Clone, Debug, Default)]
pub struct DownloadRequest {
    /// Which app to download
    pub identity: AppIdentity,

    /// Specific historical version to fetch (latest when None)
    pub external_version_id: Option<String>,

    /// Where to write the package; derived from the app name and the
    /// configured output directory when None
    pub output_path: Option<PathBuf>,

    /// Obtain a license first if the account does not hold one
    pub purchase: bool,
}

/// Event emitted during engine operation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A tool invocation started
    CommandStarted {
        /// First subcommand token (e.g. "search", "download")
        subcommand: String,
    },

    /// A tool subprocess exited
    CommandFinished {
        /// First subcommand token
        subcommand: String,
        /// Process exit code (-1 when terminated by signal)
        exit_code: i32,
        /// Wall-clock duration in milliseconds
        duration_ms: u64,
    },

    /// An ownership probe confirmed the account holds a license
    OwnershipConfirmed {
        /// Verified ownership key (rendered form, e.g. "bundle::com.example.app")
        key: String,
    },

    /// Ownership verification gave up on a key
    OwnershipCheckFailed {
        /// Ownership key that could not be verified
        key: String,
        /// User-visible failure message
        error: String,
    },

    /// On-disk size of an in-flight download changed
    DownloadProgress {
        /// Bytes currently on disk
        bytes: u64,
        /// Expected total size in bytes (0 = unknown)
        expected_bytes: u64,
    },

    /// A package download finished successfully
    DownloadFinished {
        /// Final package path
        path: PathBuf,
    },
}
