//! Typed payloads decoded from the tool's structured output
//!
//! With `--format json` the wrapped tool writes one JSON log line per
//! operation, interleaved with free-form diagnostics. These structs mirror
//! those lines field-for-field; everything is optional because the tool
//! omits fields freely between versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One app as reported by a `search` invocation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreApp {
    /// Numeric store identifier
    #[serde(default)]
    pub id: Option<i64>,

    /// Reverse-DNS bundle identifier
    #[serde(default, rename = "bundleID")]
    pub bundle_id: Option<String>,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Marketing version string
    #[serde(default)]
    pub version: Option<String>,

    /// Store price in the storefront currency
    #[serde(default)]
    pub price: Option<f64>,

    /// 512px artwork URL
    #[serde(default, rename = "artworkUrl512")]
    pub artwork_url_512: Option<String>,

    /// 100px artwork URL
    #[serde(default, rename = "artworkUrl100")]
    pub artwork_url_100: Option<String>,

    /// 60px artwork URL
    #[serde(default, rename = "artworkUrl60")]
    pub artwork_url_60: Option<String>,
}

impl StoreApp {
    /// Best available artwork URL, largest first
    pub fn artwork_url(&self) -> Option<Url> {
        [
            self.artwork_url_512.as_deref(),
            self.artwork_url_100.as_deref(),
            self.artwork_url_60.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(|raw| Url::parse(raw).ok())
    }
}

/// Result payload of a `search` invocation
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchOutput {
    /// Number of apps found
    #[serde(default)]
    pub count: Option<u64>,

    /// The matching apps
    #[serde(default)]
    pub apps: Option<Vec<StoreApp>>,
}

impl SearchOutput {
    /// The matching apps, empty when the tool omitted the list
    pub fn apps(&self) -> &[StoreApp] {
        self.apps.as_deref().unwrap_or_default()
    }
}

/// Result payload of `auth login` / `auth info`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthOutput {
    /// Account email address
    #[serde(default)]
    pub email: Option<String>,

    /// Account holder name
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the operation succeeded
    #[serde(default)]
    pub success: Option<bool>,
}

/// Minimal success/failure payload (`auth revoke`, `purchase`)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusOutput {
    /// Whether the operation succeeded
    #[serde(default)]
    pub success: Option<bool>,
}

/// Result payload of `list-versions`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VersionListOutput {
    /// Bundle identifier the versions belong to
    #[serde(default, rename = "bundleID")]
    pub bundle_id: Option<String>,

    /// Opaque historical version identifiers, oldest first
    #[serde(default, rename = "externalVersionIdentifiers")]
    pub external_version_identifiers: Option<Vec<String>>,

    /// Whether the operation succeeded
    #[serde(default)]
    pub success: Option<bool>,
}

impl VersionListOutput {
    /// The version identifiers, empty when the tool omitted the list
    pub fn identifiers(&self) -> &[String] {
        self.external_version_identifiers
            .as_deref()
            .unwrap_or_default()
    }
}

/// Result payload of a metadata query for one historical version
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VersionMetadataOutput {
    /// Whether the operation succeeded
    #[serde(default)]
    pub success: Option<bool>,

    /// The queried version identifier
    #[serde(default, rename = "externalVersionID")]
    pub external_version_id: Option<String>,

    /// Human-readable marketing version (e.g. "2.4.1")
    #[serde(default, rename = "displayVersion")]
    pub display_version: Option<String>,

    /// When this version was released
    #[serde(default, rename = "releaseDate")]
    pub release_date: Option<DateTime<Utc>>,
}

/// Result payload of a `download` invocation
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadOutput {
    /// Whether the download succeeded
    #[serde(default)]
    pub success: Option<bool>,

    /// Whether a license was obtained as part of the download
    #[serde(default)]
    pub purchased: Option<bool>,

    /// Path the tool wrote the package to
    #[serde(default)]
    pub output: Option<String>,
}
