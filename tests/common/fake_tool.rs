//! Fake ipatool binaries for end-to-end tests
//!
//! Each helper writes a small shell script standing in for the real tool,
//! so tests drive the whole subprocess path without a store account.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use ipatool_dl::{
    Config, DownloadConfig, IpatoolClient, LookupConfig, ProgressConfig, ToolConfig, VerifyConfig,
};

/// Lookup endpoint that refuses connections immediately
///
/// Catalog lookups are advisory; pointing them here keeps tests offline.
pub const UNREACHABLE_LOOKUP: &str = "http://127.0.0.1:1/lookup";

/// Writes an executable shell script posing as the tool
pub fn fake_tool(dir: &Path, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ipatool");
    std::fs::write(&path, script).expect("write fake tool");
    let mut permissions = std::fs::metadata(&path)
        .expect("stat fake tool")
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod fake tool");
    path
}

/// Config pinned to a fake tool, with fast timings and offline lookups
pub fn test_config(tool_path: PathBuf, dir: &Path) -> Config {
    Config {
        tool: ToolConfig {
            tool_path: Some(tool_path),
            search_path: false,
            ..Default::default()
        },
        verify: VerifyConfig {
            probe_retry_delay: Duration::from_millis(10),
            recheck_delay: Duration::from_millis(20),
            ..Default::default()
        },
        progress: ProgressConfig {
            poll_interval: Duration::from_millis(50),
        },
        download: DownloadConfig {
            output_dir: dir.join("downloads"),
        },
        lookup: LookupConfig {
            endpoint: UNREACHABLE_LOOKUP.to_string(),
            ..Default::default()
        },
    }
}

/// Client driving a fake tool script; keep the `TempDir` alive for the test
pub fn client_with_tool(script: &str) -> (IpatoolClient, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let tool = fake_tool(dir.path(), script);
    let client = IpatoolClient::new(test_config(tool, dir.path())).expect("create client");
    (client, dir)
}
