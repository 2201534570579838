//! Tool invocation: binary resolution, argument assembly, redaction, journaling
//!
//! [`ToolExecutor`] is the single chokepoint for running the wrapped binary.
//! Every invocation is journaled (with credentials masked) whether it
//! succeeds or fails, then classified: non-zero exit becomes
//! [`Error::CommandFailed`] carrying stderr, or stdout when stderr is empty.

mod decode;
mod process;

pub use decode::decode_event;
pub use process::{ExecutionResult, run_tool};

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::journal::{CommandJournal, JournalEntry};
use crate::types::Event;

/// Masked replacement for credential values in the journal
const REDACTED: &str = "••••••";

/// Flags whose following value is a credential
const SENSITIVE_FLAGS: [&str; 3] = ["--password", "--auth-code", "--keychain-passphrase"];

/// Well-known install locations checked before falling back to PATH
const CANDIDATE_PATHS: [&str; 4] = [
    "/opt/homebrew/bin/ipatool",
    "/usr/local/bin/ipatool",
    "/usr/bin/ipatool",
    "/opt/local/bin/ipatool",
];

/// Abstraction over "run one tool subcommand"
///
/// The ownership verifier talks to the tool through this seam so its retry
/// and budget behavior is testable against a scripted backend.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Runs one subcommand to completion
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutableNotFound`] when the binary cannot be
    /// located, [`Error::CommandFailed`] on non-zero exit, or
    /// [`Error::Io`](crate::Error::Io) when spawning fails.
    async fn run(&self, subcommand: &[String]) -> Result<ExecutionResult>;
}

/// Runs the wrapped tool and journals every invocation
#[derive(Clone)]
pub struct ToolExecutor {
    journal: Arc<CommandJournal>,
    event_tx: broadcast::Sender<Event>,
}

impl ToolExecutor {
    /// Creates an executor recording into the given journal and announcing
    /// invocations on the given event channel
    pub fn new(journal: Arc<CommandJournal>, event_tx: broadcast::Sender<Event>) -> Self {
        Self { journal, event_tx }
    }

    /// The journal this executor records into
    pub fn journal(&self) -> &Arc<CommandJournal> {
        &self.journal
    }

    /// Locates a runnable tool binary
    ///
    /// Resolution order: the configured explicit path, then well-known
    /// install locations, then a PATH search (when `search_path` is on).
    /// Whatever is found must actually be executable.
    pub fn resolve_executable(config: &ToolConfig) -> Result<PathBuf> {
        if let Some(path) = &config.tool_path {
            return if is_executable(path) {
                Ok(path.clone())
            } else {
                Err(Error::ExecutableNotFound)
            };
        }

        for candidate in CANDIDATE_PATHS {
            let path = Path::new(candidate);
            if is_executable(path) {
                return Ok(path.to_path_buf());
            }
        }

        if config.search_path
            && let Ok(found) = which::which("ipatool")
            && is_executable(&found)
        {
            return Ok(found);
        }

        Err(Error::ExecutableNotFound)
    }

    /// Assembles the full argument list for a subcommand
    ///
    /// Global flags come first, in a fixed order, so journal entries stay
    /// comparable across runs: `--format`, `--non-interactive`, `--verbose`,
    /// `--keychain-passphrase`, then the subcommand tokens. A blank
    /// passphrase is not forwarded.
    pub fn build_arguments(config: &ToolConfig, subcommand: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(subcommand.len() + 6);
        args.push("--format".into());
        args.push(config.output_format.as_flag().into());
        if config.non_interactive {
            args.push("--non-interactive".into());
        }
        if config.verbose {
            args.push("--verbose".into());
        }
        if let Some(passphrase) = config.keychain_passphrase.as_deref()
            && !passphrase.trim().is_empty()
        {
            args.push("--keychain-passphrase".into());
            args.push(passphrase.into());
        }
        args.extend(subcommand.iter().cloned());
        args
    }

    /// Masks credential values for journaling
    ///
    /// The token following each sensitive flag is replaced; a sensitive flag
    /// appearing as the final token has no value to mask and is left alone.
    pub fn redact_arguments(arguments: &[String]) -> Vec<String> {
        let mut redacted = arguments.to_vec();
        let mut index = 0;
        while index < redacted.len() {
            if SENSITIVE_FLAGS.contains(&redacted[index].as_str()) && index + 1 < redacted.len() {
                redacted[index + 1] = REDACTED.into();
                index += 2;
            } else {
                index += 1;
            }
        }
        redacted
    }

    /// Runs one subcommand under the given tool settings
    ///
    /// The run is journaled before any error is returned, so failed
    /// invocations are visible in the log view too.
    pub async fn execute(
        &self,
        subcommand: &[String],
        config: &ToolConfig,
    ) -> Result<ExecutionResult> {
        let executable = Self::resolve_executable(config)?;
        let arguments = Self::build_arguments(config, subcommand);
        let name = subcommand.first().cloned().unwrap_or_default();

        tracing::debug!(
            executable = %executable.display(),
            subcommand = %name,
            "Running tool"
        );
        self.emit(Event::CommandStarted {
            subcommand: name.clone(),
        });

        let started_at = Utc::now();
        let result = run_tool(&executable, &arguments).await?;

        self.journal.record(JournalEntry {
            executable: executable.display().to_string(),
            arguments: Self::redact_arguments(&arguments),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            timestamp: started_at,
            duration: result.duration,
        });
        self.emit(Event::CommandFinished {
            subcommand: name,
            exit_code: result.exit_code,
            duration_ms: result.duration.as_millis() as u64,
        });

        if !result.succeeded() {
            let message = if result.stderr.is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            tracing::warn!(
                exit_code = result.exit_code,
                duration_ms = result.duration.as_millis() as u64,
                "Tool exited non-zero"
            );
            return Err(Error::CommandFailed(message));
        }

        tracing::debug!(
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "Tool finished"
        );
        Ok(result)
    }

    fn emit(&self, event: Event) {
        // Send failures just mean nobody is subscribed.
        self.event_tx.send(event).ok();
    }
}

/// [`ToolBackend`] over shared, runtime-mutable tool settings
///
/// Each invocation snapshots the current settings, so a settings change
/// applies from the next subprocess onward without disturbing one already
/// in flight.
#[derive(Clone)]
pub struct ConfiguredExecutor {
    executor: ToolExecutor,
    config: Arc<RwLock<ToolConfig>>,
}

impl ConfiguredExecutor {
    /// Binds an executor to shared tool settings
    pub fn new(executor: ToolExecutor, config: Arc<RwLock<ToolConfig>>) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl ToolBackend for ConfiguredExecutor {
    async fn run(&self, subcommand: &[String]) -> Result<ExecutionResult> {
        let config = self.config.read().await.clone();
        self.executor.execute(subcommand, &config).await
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
