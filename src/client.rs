//! High-level facade over the wrapped tool
//!
//! [`IpatoolClient`] wires the executor, the ownership verifier, store
//! catalog lookups, and download progress tracking together behind one
//! cloneable handle. Long-running work happens in spawned tasks that stop
//! when [`IpatoolClient::shutdown`] cancels the shared token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{Config, DownloadConfig, ProgressConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::executor::{ConfiguredExecutor, ToolBackend, ToolExecutor, decode_event};
use crate::journal::CommandJournal;
use crate::lookup::LookupClient;
use crate::outputs::{
    AuthOutput, DownloadOutput, SearchOutput, StatusOutput, StoreApp, VersionListOutput,
    VersionMetadataOutput,
};
use crate::ownership::{OwnershipKey, OwnershipVerifier};
use crate::progress::{ProgressState, SizePollerParams, spawn_size_poller};
use crate::semaphore::AdmissionSemaphore;
use crate::types::{AppIdentity, DownloadRequest, Event};

/// Event buffer per subscriber; a subscriber further behind lags and skips
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Store catalog lookups and cached artwork
#[derive(Clone)]
pub(crate) struct Catalog {
    /// HTTP client for the store lookup endpoint
    pub(crate) lookup: LookupClient,
    /// Artwork URLs by track id, filled in the background after searches
    pub(crate) artwork: Arc<Mutex<HashMap<i64, Url>>>,
}

/// Per-download progress tracking shared with the size poller
#[derive(Clone)]
pub(crate) struct DownloadTracking {
    /// Byte counters published while a download runs
    pub(crate) progress: Arc<ProgressState>,
    /// Cancellation token of the current size poller, replaced per download
    pub(crate) poller_token: Arc<Mutex<Option<CancellationToken>>>,
}

/// Main engine handle (cloneable - all fields are Arc-wrapped or cheap)
#[derive(Clone)]
pub struct IpatoolClient {
    /// Journal of every tool invocation, shared with the executor
    journal: Arc<CommandJournal>,
    /// Backend running subcommands under the current tool settings
    backend: ConfiguredExecutor,
    /// Runtime-mutable tool settings
    tool_config: Arc<RwLock<ToolConfig>>,
    /// License ownership verification
    verifier: OwnershipVerifier,
    /// Store catalog lookups and cached artwork
    catalog: Catalog,
    /// Download output settings
    download_config: DownloadConfig,
    /// Progress polling settings
    progress_config: ProgressConfig,
    /// Per-download progress tracking
    tracking: DownloadTracking,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Root cancellation token; child tokens gate every spawned task
    cancel_token: CancellationToken,
}

impl IpatoolClient {
    /// Creates an engine from the given configuration
    ///
    /// No subprocess is launched here. The tool binary is resolved again on
    /// every invocation, so it may be installed or moved afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the store lookup HTTP client cannot
    /// be constructed.
    pub fn new(config: Config) -> Result<Self> {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();

        let journal = Arc::new(CommandJournal::new());
        let executor = ToolExecutor::new(Arc::clone(&journal), event_tx.clone());
        let tool_config = Arc::new(RwLock::new(config.tool));
        let backend = ConfiguredExecutor::new(executor, Arc::clone(&tool_config));

        let semaphore = Arc::new(AdmissionSemaphore::new(config.verify.max_concurrent));
        let verifier = OwnershipVerifier::new(
            Arc::new(backend.clone()),
            semaphore,
            config.verify,
            event_tx.clone(),
            cancel_token.child_token(),
        );

        let catalog = Catalog {
            lookup: LookupClient::new(config.lookup)?,
            artwork: Arc::new(Mutex::new(HashMap::new())),
        };
        let tracking = DownloadTracking {
            progress: Arc::new(ProgressState::new()),
            poller_token: Arc::new(Mutex::new(None)),
        };

        Ok(Self {
            journal,
            backend,
            tool_config,
            verifier,
            catalog,
            download_config: config.download,
            progress_config: config.progress,
            tracking,
            event_tx,
            cancel_token,
        })
    }

    /// Subscribes to engine events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all
    /// events independently; one that falls more than 1000 events behind
    /// gets a `RecvError::Lagged` and skips ahead.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ipatool_dl::{Config, IpatoolClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = IpatoolClient::new(Config::default())?;
    ///
    ///     let mut events = client.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{event:?}");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The journal of past tool invocations
    ///
    /// Shared with the executor, so entries appear as soon as each
    /// subprocess exits. Cloning the Arc is cheap.
    pub fn journal(&self) -> Arc<CommandJournal> {
        Arc::clone(&self.journal)
    }

    /// The license ownership verifier
    pub fn ownership(&self) -> &OwnershipVerifier {
        &self.verifier
    }

    /// Byte counters of the download in flight, if any
    pub fn progress(&self) -> Arc<ProgressState> {
        Arc::clone(&self.tracking.progress)
    }

    /// Snapshot of the current tool settings
    pub async fn tool_config(&self) -> ToolConfig {
        self.tool_config.read().await.clone()
    }

    /// Replaces the tool settings
    ///
    /// The change applies from the next tool invocation onward; a
    /// subprocess already in flight keeps the settings it started with.
    pub async fn set_tool_config(&self, config: ToolConfig) {
        tracing::info!(
            format = ?config.output_format,
            non_interactive = config.non_interactive,
            verbose = config.verbose,
            "Tool settings updated"
        );
        *self.tool_config.write().await = config;
    }

    /// Best known artwork URL for an app
    ///
    /// Renditions carried on the result itself win; the tool usually omits
    /// them, so [`search`](Self::search) fills a cache from the store
    /// catalog in the background and that cache is consulted second.
    pub fn artwork_url(&self, app: &StoreApp) -> Option<Url> {
        app.artwork_url()
            .or_else(|| app.id.and_then(|id| self.lock_artwork().get(&id).cloned()))
    }

    /// Stops background work
    ///
    /// Cancels pending ownership checks, artwork lookups, and the progress
    /// poller. A subprocess already running is left to finish.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down ipatool client");
        self.cancel_token.cancel();
        self.tracking.progress.finish();
    }

    /// Searches the store catalog
    ///
    /// Every returned app is queued for background ownership verification
    /// and artwork enrichment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank term,
    /// [`Error::CommandFailed`] when the tool exits non-zero, or
    /// [`Error::DecodingFailed`] when its output carries no payload.
    pub async fn search(&self, term: &str, limit: u32) -> Result<SearchOutput> {
        let term = term.trim();
        if term.is_empty() {
            return Err(Error::InvalidInput("a search term is required".into()));
        }

        let args = vec![
            "search".to_string(),
            term.to_string(),
            "--limit".to_string(),
            limit.to_string(),
        ];
        let output: SearchOutput = self.run_and_decode(&args).await?;

        self.verifier.schedule_all(output.apps());
        self.spawn_artwork_enrichment(output.apps());
        Ok(output)
    }

    /// Signs in to the store account
    ///
    /// The auth code is only forwarded when non-blank, so a plain
    /// password-only sign-in passes `None` or an empty string alike.
    /// Credential values never reach the journal unmasked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the email or password is
    /// missing, or [`Error::CommandFailed`] with the tool's message when
    /// the store rejects the credentials.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        auth_code: Option<&str>,
    ) -> Result<AuthOutput> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::InvalidInput(
                "an email and password are required".into(),
            ));
        }

        let mut args = vec![
            "auth".to_string(),
            "login".to_string(),
            "--email".to_string(),
            email.trim().to_string(),
            "--password".to_string(),
            password.to_string(),
        ];
        if let Some(code) = auth_code
            && !code.trim().is_empty()
        {
            args.push("--auth-code".into());
            args.push(code.trim().to_string());
        }
        self.run_and_decode(&args).await
    }

    /// Queries the signed-in account
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] when no account is signed in.
    pub async fn account_info(&self) -> Result<AuthOutput> {
        self.run_and_decode(&["auth".to_string(), "info".to_string()])
            .await
    }

    /// Revokes the stored credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] when the tool cannot revoke them.
    pub async fn revoke_credentials(&self) -> Result<StatusOutput> {
        self.run_and_decode(&["auth".to_string(), "revoke".to_string()])
            .await
    }

    /// Obtains a license for an app
    ///
    /// A successful purchase marks the bundle as owned, so the verifier
    /// skips probing it again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank bundle identifier or
    /// [`Error::CommandFailed`] when the store declines.
    pub async fn purchase(&self, bundle_id: &str) -> Result<StatusOutput> {
        let bundle_id = bundle_id.trim();
        if bundle_id.is_empty() {
            return Err(Error::InvalidInput(
                "a bundle identifier is required".into(),
            ));
        }

        let args = vec![
            "purchase".to_string(),
            "--bundle-identifier".to_string(),
            bundle_id.to_string(),
        ];
        let output: StatusOutput = self.run_and_decode(&args).await?;
        if output.success == Some(true) {
            self.verifier.mark_verified(OwnershipKey::bundle(bundle_id));
        }
        Ok(output)
    }

    /// Lists the historical version identifiers of an app
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty identity or
    /// [`Error::CommandFailed`] when the account holds no license for the
    /// app.
    pub async fn list_versions(&self, identity: &AppIdentity) -> Result<VersionListOutput> {
        identity.validate()?;
        let mut args = vec!["list-versions".to_string()];
        identity.push_args(&mut args);
        self.run_and_decode(&args).await
    }

    /// Fetches metadata for one historical version
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty identity or blank
    /// version id, or [`Error::CommandFailed`] when the tool rejects the
    /// query.
    pub async fn version_metadata(
        &self,
        identity: &AppIdentity,
        external_version_id: &str,
    ) -> Result<VersionMetadataOutput> {
        identity.validate()?;
        let version_id = external_version_id.trim();
        if version_id.is_empty() {
            return Err(Error::InvalidInput(
                "an external version id is required".into(),
            ));
        }

        let mut args = vec![
            "get-version-metadata".to_string(),
            "--external-version-id".to_string(),
            version_id.to_string(),
        ];
        identity.push_args(&mut args);
        self.run_and_decode(&args).await
    }

    /// Resolves display versions for a set of historical version ids
    ///
    /// Best effort: ids whose metadata query fails or carries no display
    /// version are left out of the map.
    pub async fn display_versions(
        &self,
        identity: &AppIdentity,
        external_version_ids: &[String],
    ) -> HashMap<String, String> {
        let mut versions = HashMap::new();
        for version_id in external_version_ids {
            match self.version_metadata(identity, version_id).await {
                Ok(metadata) => {
                    if let Some(display) = metadata.display_version {
                        versions.insert(version_id.clone(), display);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        external_version_id = %version_id,
                        error = %e,
                        "Version metadata unavailable"
                    );
                }
            }
        }
        versions
    }

    /// Downloads a package to disk
    ///
    /// One download runs at a time. The output path defaults to the
    /// configured output directory with a filename derived from the store
    /// name. While the tool writes, the on-disk size is published as
    /// [`Event::DownloadProgress`]; [`Event::DownloadFinished`] follows a
    /// successful run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the identity is empty or a
    /// download is already running, [`Error::Io`] when the output
    /// directory cannot be created, [`Error::CommandFailed`] when the
    /// tool exits non-zero, or [`Error::DecodingFailed`] when its output
    /// carries no payload.
    pub async fn download(&self, request: DownloadRequest) -> Result<DownloadOutput> {
        request.identity.validate()?;
        if !self.tracking.progress.try_begin() {
            return Err(Error::InvalidInput(
                "a download is already in progress".into(),
            ));
        }

        let outcome = self.run_download(&request).await;
        self.end_download();

        let (path, output) = outcome?;
        self.emit(Event::DownloadFinished { path });
        Ok(output)
    }

    /// Body of [`download`](Self::download); the caller stops the poller
    /// and releases the progress claim on every exit path.
    async fn run_download(&self, request: &DownloadRequest) -> Result<(PathBuf, DownloadOutput)> {
        let hint = self.catalog.lookup.app_hint(&request.identity).await;

        let output_path = match &request.output_path {
            Some(path) => path.clone(),
            None => {
                let name = hint.as_ref().and_then(|h| h.track_name.as_deref());
                self.download_config
                    .output_dir
                    .join(derive_filename(name, &request.identity))
            }
        };
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create output directory '{}': {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        if let Some(expected) = hint.as_ref().and_then(|h| h.file_size_bytes)
            && let Ok(expected) = u64::try_from(expected)
        {
            self.tracking.progress.set_expected(expected);
        }

        let poller_token = self.cancel_token.child_token();
        if let Some(previous) = self.lock_poller().replace(poller_token.clone()) {
            previous.cancel();
        }
        spawn_size_poller(SizePollerParams {
            transient_path: transient_path_for(&output_path),
            final_path: output_path.clone(),
            state: Arc::clone(&self.tracking.progress),
            interval: self.progress_config.poll_interval,
            event_tx: self.event_tx.clone(),
            cancel_token: poller_token,
        });

        let mut args = vec!["download".to_string()];
        request.identity.push_args(&mut args);
        if let Some(version_id) = request.external_version_id.as_deref()
            && !version_id.trim().is_empty()
        {
            args.push("--external-version-id".into());
            args.push(version_id.trim().to_string());
        }
        args.push("--output".into());
        args.push(output_path.to_string_lossy().into_owned());
        if request.purchase {
            args.push("--purchase".into());
        }

        let output: DownloadOutput = self.run_and_decode(&args).await?;
        if output.purchased == Some(true)
            && let Some(bundle_id) = request.identity.bundle_id.as_deref()
            && !bundle_id.trim().is_empty()
        {
            self.verifier.mark_verified(OwnershipKey::bundle(bundle_id));
        }

        Ok((output_path, output))
    }

    /// Stops the size poller, then releases the download claim
    ///
    /// In that order: once the claim frees, a successor may register its
    /// own poller in the slot, which this cleanup must not cancel.
    fn end_download(&self) {
        if let Some(token) = self.lock_poller().take() {
            token.cancel();
        }
        self.tracking.progress.finish();
    }

    /// Runs a subcommand and decodes its JSON payload
    async fn run_and_decode<T: DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        let result = self.backend.run(args).await?;
        decode_event(&result.stdout)
    }

    /// Fetches artwork for apps missing from the cache, in the background
    ///
    /// Returns the spawned task, or `None` when every id is already
    /// cached. Failures are logged and dropped; artwork is decoration.
    fn spawn_artwork_enrichment(&self, apps: &[StoreApp]) -> Option<tokio::task::JoinHandle<()>> {
        let missing: Vec<i64> = {
            let cache = self.lock_artwork();
            apps.iter()
                .filter_map(|app| app.id)
                .filter(|id| !cache.contains_key(id))
                .collect()
        };
        if missing.is_empty() {
            return None;
        }

        let client = self.clone();
        let cancel_token = self.cancel_token.child_token();
        Some(tokio::spawn(async move {
            let fetched = tokio::select! {
                result = client.catalog.lookup.artwork_by_track_ids(&missing) => result,
                _ = cancel_token.cancelled() => return,
            };
            match fetched {
                Ok(urls) => {
                    client.lock_artwork().extend(urls);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Artwork lookup failed");
                }
            }
        }))
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn lock_artwork(&self) -> MutexGuard<'_, HashMap<i64, Url>> {
        self.catalog
            .artwork
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_poller(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.tracking
            .poller_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Derives an output filename from the best known app name
///
/// Falls back from the store name to the bundle identifier to a numeric id
/// stem, so the package is named after the app whenever anything is known
/// about it.
fn derive_filename(track_name: Option<&str>, identity: &AppIdentity) -> String {
    if let Some(stem) = track_name.and_then(sanitize_stem) {
        return format!("{stem}.ipa");
    }
    if let Some(stem) = identity.bundle_id.as_deref().and_then(sanitize_stem) {
        return format!("{stem}.ipa");
    }
    if let Some(track_id) = identity.track_id {
        return format!("App-{track_id}.ipa");
    }
    "ipatool-download.ipa".to_string()
}

/// Reduces a raw name to a filename stem
///
/// Characters outside `[A-Za-z0-9._-]` become hyphens; a name that is
/// blank after trimming yields no stem.
fn sanitize_stem(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let stem = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    Some(stem)
}

/// The in-flight path the tool streams into before its final rename
fn transient_path_for(path: &Path) -> PathBuf {
    let mut transient = path.as_os_str().to_os_string();
    transient.push(".tmp");
    PathBuf::from(transient)
}
