//! Store catalog lookups via Apple's public iTunes endpoint.
//!
//! The wrapped tool reports names and sizes only sparsely, so the engine
//! enriches its own bookkeeping through the lookup API: display names and
//! package sizes for pending downloads, artwork URLs for search results.
//! Lookups are advisory; callers decide whether a miss is fatal.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::LookupConfig;
use crate::error::Result;
use crate::types::AppIdentity;

/// Timeout for a single lookup request in seconds
const LOOKUP_TIMEOUT_SECS: u64 = 30;

/// How many artwork batches are fetched in parallel
const ARTWORK_BATCH_CONCURRENCY: usize = 4;

/// Name and size hints for a single app
///
/// Used to pre-fill download bookkeeping (output filename, expected size)
/// before the tool itself reports anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppHint {
    /// Store display name, if the lookup returned one
    pub track_name: Option<String>,

    /// Reported package size in bytes, if present and parseable
    pub file_size_bytes: Option<i64>,
}

/// Client for the iTunes lookup endpoint
#[derive(Clone, Debug)]
pub struct LookupClient {
    http: reqwest::Client,
    config: LookupConfig,
}

impl LookupClient {
    /// Create a lookup client for the configured endpoint.
    pub fn new(config: LookupConfig) -> Result<Self> {
        // Lookups are advisory; a stuck request must not stall a download
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    /// Fetch name and size hints for one app.
    ///
    /// Tries a bundle-identifier lookup first, then falls back to the numeric
    /// track id. Network and decoding failures are logged and treated as a
    /// miss, so the return value is `None` whenever the store had no answer.
    pub async fn app_hint(&self, identity: &AppIdentity) -> Option<AppHint> {
        if let Some(bundle_id) = identity.bundle_id.as_deref()
            && !bundle_id.trim().is_empty()
            && let Some(hint) = self.hint_for_query(&[("bundleId", bundle_id)]).await
        {
            return Some(hint);
        }
        if let Some(track_id) = identity.track_id {
            let id = track_id.to_string();
            return self.hint_for_query(&[("id", id.as_str())]).await;
        }
        None
    }

    async fn hint_for_query(&self, params: &[(&str, &str)]) -> Option<AppHint> {
        let mut query = params.to_vec();
        query.push(("country", self.config.country.as_str()));

        match self.fetch(&query).await {
            Ok(response) => response.results.into_iter().next().map(|item| AppHint {
                track_name: item.track_name,
                file_size_bytes: item
                    .file_size_bytes
                    .and_then(|size| size.trim().parse().ok()),
            }),
            Err(e) => {
                debug!(error = %e, "Store lookup failed");
                None
            }
        }
    }

    /// Resolve artwork URLs for a set of track ids.
    ///
    /// Ids are sent comma-joined in batches of the configured size, and each
    /// returned app maps to its largest available artwork rendition.
    pub async fn artwork_by_track_ids(&self, track_ids: &[i64]) -> Result<HashMap<i64, Url>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let batches: Vec<String> = track_ids
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();

        let responses: Vec<Result<LookupResponse>> = stream::iter(batches)
            .map(|ids| async move { self.fetch(&[("id", ids.as_str())]).await })
            .buffer_unordered(ARTWORK_BATCH_CONCURRENCY)
            .collect()
            .await;

        let mut artwork = HashMap::new();
        for response in responses {
            for item in response?.results {
                if let Some(track_id) = item.track_id
                    && let Some(url) = item.artwork_url()
                {
                    artwork.insert(track_id, url);
                }
            }
        }
        Ok(artwork)
    }

    async fn fetch(&self, query: &[(&str, &str)]) -> Result<LookupResponse> {
        let response = self
            .http
            .get(&self.config.endpoint)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<LookupResponse>()
            .await?;
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupItem>,
}

/// One app entry in a lookup response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupItem {
    #[serde(default)]
    track_id: Option<i64>,

    #[serde(default)]
    track_name: Option<String>,

    /// The store reports sizes as decimal strings
    #[serde(default)]
    file_size_bytes: Option<String>,

    #[serde(default)]
    artwork_url_512: Option<String>,

    #[serde(default)]
    artwork_url_100: Option<String>,

    #[serde(default)]
    artwork_url_60: Option<String>,
}

impl LookupItem {
    /// Largest artwork rendition with a parseable URL
    fn artwork_url(&self) -> Option<Url> {
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
