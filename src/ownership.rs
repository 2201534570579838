//! Ownership verification: does the signed-in account hold a license?
//!
//! The wrapped tool has no dedicated "do I own this app" query, but its
//! `list-versions` subcommand fails with a distinctive "license is required"
//! message when the account lacks one. The verifier exploits that: it probes
//! `list-versions` by bundle identifier, then by numeric app id, and treats a
//! decodable version list as proof of ownership.
//!
//! Checks are idempotent per ownership key and capacity-limited through an
//! [`AdmissionSemaphore`]. Each scheduled check runs passes over the probe
//! list with a fixed overall budget carried across the inter-pass delay, so
//! a flaky network produces a bounded number of subprocess spawns and then a
//! single user-visible failure.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::VerifyConfig;
use crate::error::Error;
use crate::executor::{ToolBackend, decode_event};
use crate::outputs::{StoreApp, VersionListOutput};
use crate::semaphore::AdmissionSemaphore;
use crate::types::Event;

/// Terminal message shown when every probe pass has been spent
const VERIFY_FAILED_MESSAGE: &str =
    "Couldn't verify ownership. Check your network connection and try again.";

/// Identity an ownership fact is recorded under
///
/// Bundle identifiers are preferred over numeric ids and normalized to
/// lowercase so differently-cased mentions of one app collapse to one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OwnershipKey {
    /// Keyed by bundle identifier (lowercased)
    Bundle(String),
    /// Keyed by numeric store id
    Track(i64),
}

impl OwnershipKey {
    /// Key from a bundle identifier
    pub fn bundle(bundle_id: impl AsRef<str>) -> Self {
        OwnershipKey::Bundle(bundle_id.as_ref().to_lowercase())
    }

    /// Key from a numeric store id
    pub fn track(track_id: i64) -> Self {
        OwnershipKey::Track(track_id)
    }

    /// The key for a search result, preferring the bundle identifier
    pub fn for_app(app: &StoreApp) -> Option<Self> {
        if let Some(bundle_id) = app.bundle_id.as_deref()
            && !bundle_id.is_empty()
        {
            return Some(Self::bundle(bundle_id));
        }
        app.id.map(Self::track)
    }
}

impl fmt::Display for OwnershipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipKey::Bundle(bundle_id) => write!(f, "bundle::{bundle_id}"),
            OwnershipKey::Track(track_id) => write!(f, "track::{track_id}"),
        }
    }
}

/// Where a key currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipStatus {
    /// Never checked, or the last check gave up
    Unknown,
    /// A check is in flight (including the delay between passes)
    Pending,
    /// A probe or purchase confirmed the license
    Verified,
}

#[derive(Default)]
struct OwnershipState {
    verified: HashSet<OwnershipKey>,
    pending: HashSet<OwnershipKey>,
}

enum PassOutcome {
    Confirmed,
    Exhausted,
    Cancelled,
}

/// Schedules and runs ownership checks
///
/// Cloning is cheap; clones share the verified/pending sets, the admission
/// semaphore, and the cancellation token.
#[derive(Clone)]
pub struct OwnershipVerifier {
    backend: Arc<dyn ToolBackend>,
    semaphore: Arc<AdmissionSemaphore>,
    config: VerifyConfig,
    state: Arc<Mutex<OwnershipState>>,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

impl OwnershipVerifier {
    /// Creates a verifier probing through `backend`, limited by `semaphore`
    pub fn new(
        backend: Arc<dyn ToolBackend>,
        semaphore: Arc<AdmissionSemaphore>,
        config: VerifyConfig,
        event_tx: broadcast::Sender<Event>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            backend,
            semaphore,
            config,
            state: Arc::new(Mutex::new(OwnershipState::default())),
            event_tx,
            cancel_token,
        }
    }

    /// Current status of a key
    pub fn status(&self, key: &OwnershipKey) -> OwnershipStatus {
        let state = self.lock();
        if state.verified.contains(key) {
            OwnershipStatus::Verified
        } else if state.pending.contains(key) {
            OwnershipStatus::Pending
        } else {
            OwnershipStatus::Unknown
        }
    }

    /// Whether a key has been confirmed
    pub fn is_verified(&self, key: &OwnershipKey) -> bool {
        self.lock().verified.contains(key)
    }

    /// Whether a search result maps to a confirmed key
    pub fn is_app_verified(&self, app: &StoreApp) -> bool {
        OwnershipKey::for_app(app).is_some_and(|key| self.is_verified(&key))
    }

    /// Snapshot of all confirmed keys
    pub fn verified_keys(&self) -> Vec<OwnershipKey> {
        self.lock().verified.iter().cloned().collect()
    }

    /// Records a license obtained out of band (a completed purchase)
    ///
    /// Emits [`Event::OwnershipConfirmed`] when the key was not already
    /// verified. Any in-flight check for the key stands down on its next
    /// pass.
    pub fn mark_verified(&self, key: OwnershipKey) -> bool {
        let newly = {
            let mut state = self.lock();
            state.pending.remove(&key);
            state.verified.insert(key.clone())
        };
        if newly {
            tracing::info!(key = %key, "Ownership confirmed");
            self.emit(Event::OwnershipConfirmed {
                key: key.to_string(),
            });
        }
        newly
    }

    /// Spawns a background check for one search result
    ///
    /// Returns None when the app carries no usable identifier or a check for
    /// its key is already pending or verified.
    pub fn schedule_check(&self, app: &StoreApp) -> Option<JoinHandle<()>> {
        let key = OwnershipKey::for_app(app)?;
        let probes = Self::probes_for(app);
        if probes.is_empty() || !self.begin_check(&key) {
            return None;
        }
        let verifier = self.clone();
        Some(tokio::spawn(async move {
            verifier.run_check(key, probes).await;
        }))
    }

    /// Spawns background checks for a batch of search results
    pub fn schedule_all(&self, apps: &[StoreApp]) -> Vec<JoinHandle<()>> {
        apps.iter().filter_map(|app| self.schedule_check(app)).collect()
    }

    /// Runs a check inline, awaiting its outcome
    pub async fn check_now(&self, app: &StoreApp) {
        let Some(key) = OwnershipKey::for_app(app) else {
            return;
        };
        let probes = Self::probes_for(app);
        if probes.is_empty() || !self.begin_check(&key) {
            return;
        }
        self.run_check(key, probes).await;
    }

    /// The ordered probe list for an app: bundle identifier first, then
    /// numeric id
    fn probes_for(app: &StoreApp) -> Vec<Vec<String>> {
        let mut probes = Vec::new();
        if let Some(bundle_id) = app.bundle_id.as_deref()
            && !bundle_id.is_empty()
        {
            probes.push(vec![
                "list-versions".into(),
                "--bundle-identifier".into(),
                bundle_id.to_string(),
            ]);
        }
        if let Some(track_id) = app.id {
            probes.push(vec![
                "list-versions".into(),
                "--app-id".into(),
                track_id.to_string(),
            ]);
        }
        probes
    }

    /// Atomically claims a key for checking; false when it is already
    /// pending or verified
    fn begin_check(&self, key: &OwnershipKey) -> bool {
        let mut state = self.lock();
        if state.verified.contains(key) || state.pending.contains(key) {
            return false;
        }
        state.pending.insert(key.clone());
        true
    }

    /// Drives passes over the probe list until confirmation, budget
    /// exhaustion, or cancellation
    ///
    /// The key stays pending for the whole run, including the delay between
    /// passes, so a concurrent schedule for the same key stays a no-op. The
    /// admission permit is held only while probes actually run.
    async fn run_check(&self, key: OwnershipKey, probes: Vec<Vec<String>>) {
        let mut remaining_passes = self.config.recheck_budget.max(1);

        loop {
            // A purchase may have settled the question while we waited.
            if self.is_verified(&key) {
                return;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
                _ = self.cancel_token.cancelled() => {
                    self.clear_pending(&key);
                    return;
                }
            };
            let outcome = self.run_probe_pass(&key, &probes).await;
            drop(permit);

            match outcome {
                PassOutcome::Confirmed => {
                    self.mark_verified(key);
                    return;
                }
                PassOutcome::Cancelled => {
                    self.clear_pending(&key);
                    return;
                }
                PassOutcome::Exhausted => {
                    remaining_passes -= 1;
                    if remaining_passes == 0 {
                        self.clear_pending(&key);
                        tracing::warn!(key = %key, "Ownership verification gave up");
                        self.emit(Event::OwnershipCheckFailed {
                            key: key.to_string(),
                            error: VERIFY_FAILED_MESSAGE.into(),
                        });
                        return;
                    }
                    tracing::debug!(
                        key = %key,
                        remaining_passes = remaining_passes,
                        "Ownership probes inconclusive, will retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.recheck_delay) => {}
                        _ = self.cancel_token.cancelled() => {
                            self.clear_pending(&key);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One pass over the probe list
    ///
    /// Each probe gets up to `probe_attempts` tries with a short delay
    /// between them. A "license is required" failure is a definitive answer
    /// for that probe: move straight to the next one without burning its
    /// remaining tries.
    async fn run_probe_pass(&self, key: &OwnershipKey, probes: &[Vec<String>]) -> PassOutcome {
        let attempts = self.config.probe_attempts.max(1);

        'probes: for probe in probes {
            for attempt in 1..=attempts {
                if self.cancel_token.is_cancelled() {
                    return PassOutcome::Cancelled;
                }

                let failure: Error = match self.backend.run(probe).await {
                    Ok(result) => match decode_event::<VersionListOutput>(&result.stdout) {
                        Ok(_) => return PassOutcome::Confirmed,
                        Err(e) => e,
                    },
                    Err(e) if e.indicates_missing_license() => {
                        tracing::debug!(key = %key, "Probe reports no license, trying next probe");
                        continue 'probes;
                    }
                    Err(e) => e,
                };

                tracing::debug!(
                    key = %key,
                    attempt = attempt,
                    error = %failure,
                    "Ownership probe attempt failed"
                );

                if attempt < attempts {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.probe_retry_delay) => {}
                        _ = self.cancel_token.cancelled() => return PassOutcome::Cancelled,
                    }
                }
            }
        }

        PassOutcome::Exhausted
    }

    fn clear_pending(&self, key: &OwnershipKey) {
        self.lock().pending.remove(key);
    }

    fn emit(&self, event: Event) {
        // Send failures just mean nobody is subscribed.
        self.event_tx.send(event).ok();
    }

    fn lock(&self) -> MutexGuard<'_, OwnershipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
