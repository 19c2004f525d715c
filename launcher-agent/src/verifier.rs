//! File integrity verification against the server manifest.
//!
//! The manifest is fetched fresh from the server on every pass, never
//! cached. Verification compares declared byte sizes against disk; the
//! declared hash field is carried on the wire but not checked. Repair
//! re-downloads each broken file from the single-file endpoint,
//! sequentially and non-transactionally.

use crate::transfer;
use crate::utils::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One expected installed file, as declared by `GET /api/client-manifest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    /// Path relative to the install directory
    pub path: String,

    /// Expected size in bytes — the only integrity check performed
    pub size: u64,

    /// Declared content hash. Present on the wire but not verified.
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientManifest {
    pub files: Vec<ManifestFile>,
}

/// Result of one verification scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    /// Required files absent from disk
    pub missing: Vec<String>,

    /// Files present with a size differing from the manifest
    pub corrupted: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.corrupted.is_empty()
    }

    /// All paths needing repair, missing first.
    pub fn broken_paths(&self) -> Vec<String> {
        self.missing
            .iter()
            .chain(self.corrupted.iter())
            .cloned()
            .collect()
    }
}

/// States of a verification run. Scanning has no partial state; it
/// restarts from entry zero on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Idle,
    Scanning,
    NoIssues,
    IssuesFound,
    Repairing,
    RepairComplete,
    RepairFailed,
}

/// Callback fired once per repaired file (not per byte)
pub type FileCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Fetch the authoritative file manifest from the server.
pub async fn fetch_manifest(client: &reqwest::Client, base_url: &str) -> Result<ClientManifest> {
    let url = format!("{}/api/client-manifest", base_url.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| UpdateError::Network(format!("{}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(UpdateError::Network(format!(
            "{} returned HTTP {}",
            url,
            resp.status()
        )));
    }

    resp.json()
        .await
        .map_err(|e| UpdateError::MalformedResponse(e.to_string()))
}

/// Compare the manifest against disk reality.
///
/// Absent and required → missing; present with a size mismatch →
/// corrupted; absent and optional → silently skipped.
pub fn verify(manifest: &ClientManifest, install_dir: &Path) -> VerifyReport {
    let mut report = VerifyReport::default();

    for entry in &manifest.files {
        let path = install_dir.join(&entry.path);
        match std::fs::metadata(&path) {
            Err(_) => {
                if entry.required {
                    report.missing.push(entry.path.clone());
                }
            }
            Ok(meta) => {
                if meta.len() != entry.size {
                    report.corrupted.push(entry.path.clone());
                }
            }
        }
    }

    if report.is_clean() {
        info!(
            "Verified {} manifest entries in {}: no issues",
            manifest.files.len(),
            install_dir.display()
        );
    } else {
        warn!(
            "Verified {} manifest entries in {}: {} missing, {} corrupted",
            manifest.files.len(),
            install_dir.display(),
            report.missing.len(),
            report.corrupted.len()
        );
    }
    report
}

/// Re-download each path from the single-file endpoint, overwriting the
/// local copy. Sequential; a failure partway leaves earlier repairs in
/// place. Returns the number of files repaired.
pub async fn repair(
    client: &reqwest::Client,
    base_url: &str,
    paths: &[String],
    install_dir: &Path,
    on_file: Option<FileCallback>,
) -> Result<usize> {
    let base = base_url.trim_end_matches('/');
    let cancel = CancellationToken::new();
    let mut repaired = 0usize;

    for path in paths {
        if let Some(cb) = on_file.as_ref() {
            cb(path);
        }
        let url = format!("{}/api/download-file/{}", base, path);
        let dest = install_dir.join(path);
        transfer::fetch(client, &url, &dest, None, &cancel).await?;
        repaired += 1;
        info!("Repaired {}", path);
    }

    Ok(repaired)
}

/// One verification run with its state machine:
/// `Idle → Scanning → (NoIssues | IssuesFound) →
/// [Repairing → (RepairComplete | RepairFailed)]`.
pub struct VerificationRun {
    state: VerifyState,
}

impl VerificationRun {
    pub fn new() -> Self {
        VerificationRun {
            state: VerifyState::Idle,
        }
    }

    pub fn state(&self) -> VerifyState {
        self.state
    }

    /// Fetch a fresh manifest and scan the install directory.
    pub async fn scan(
        &mut self,
        client: &reqwest::Client,
        base_url: &str,
        install_dir: &Path,
    ) -> Result<VerifyReport> {
        self.state = VerifyState::Scanning;
        let manifest = match fetch_manifest(client, base_url).await {
            Ok(manifest) => manifest,
            Err(e) => {
                self.state = VerifyState::Idle;
                return Err(e);
            }
        };

        let report = verify(&manifest, install_dir);
        self.state = if report.is_clean() {
            VerifyState::NoIssues
        } else {
            VerifyState::IssuesFound
        };
        Ok(report)
    }

    /// Repair everything the last scan flagged.
    pub async fn repair(
        &mut self,
        client: &reqwest::Client,
        base_url: &str,
        report: &VerifyReport,
        install_dir: &Path,
        on_file: Option<FileCallback>,
    ) -> Result<usize> {
        self.state = VerifyState::Repairing;
        match repair(client, base_url, &report.broken_paths(), install_dir, on_file).await {
            Ok(count) => {
                self.state = VerifyState::RepairComplete;
                Ok(count)
            }
            Err(e) => {
                self.state = VerifyState::RepairFailed;
                Err(e)
            }
        }
    }
}

impl Default for VerificationRun {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path as AxumPath, routing::get, Json, Router};
    use tempfile::tempdir;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn manifest() -> ClientManifest {
        ClientManifest {
            files: vec![
                ManifestFile {
                    path: "a.txt".to_string(),
                    size: 10,
                    hash: "abc123".to_string(),
                    required: true,
                },
                ManifestFile {
                    path: "b.txt".to_string(),
                    size: 20,
                    hash: "def456".to_string(),
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn test_size_mismatch_is_corrupted_and_optional_absence_is_skipped() {
        let dir = tempdir().unwrap();
        // a.txt present but 5 bytes instead of 10; b.txt absent but optional
        std::fs::write(dir.path().join("a.txt"), b"12345").unwrap();

        let report = verify(&manifest(), dir.path());
        assert_eq!(report.corrupted, vec!["a.txt".to_string()]);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn test_required_absence_is_missing() {
        let dir = tempdir().unwrap();
        let report = verify(&manifest(), dir.path());
        assert_eq!(report.missing, vec!["a.txt".to_string()]);
        assert!(report.corrupted.is_empty());
    }

    #[test]
    fn test_matching_sizes_are_clean() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![0u8; 20]).unwrap();

        let report = verify(&manifest(), dir.path());
        assert!(report.is_clean());
    }

    #[test]
    fn test_hash_is_not_checked() {
        let dir = tempdir().unwrap();
        // Right size, content that cannot match the declared hash
        std::fs::write(dir.path().join("a.txt"), vec![0xFFu8; 10]).unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![0xFFu8; 20]).unwrap();

        assert!(verify(&manifest(), dir.path()).is_clean());
    }

    fn mock_server_router() -> Router {
        Router::new()
            .route(
                "/api/client-manifest",
                get(|| async {
                    Json(serde_json::json!({
                        "files": [
                            {"path": "a.txt", "size": 10, "hash": "abc123", "required": true},
                            {"path": "b.txt", "size": 20, "hash": "def456", "required": false}
                        ]
                    }))
                }),
            )
            .route(
                "/api/download-file/{file}",
                get(|AxumPath(file): AxumPath<String>| async move {
                    match file.as_str() {
                        "a.txt" => Ok(vec![b'a'; 10]),
                        "b.txt" => Ok(vec![b'b'; 20]),
                        _ => Err(axum::http::StatusCode::NOT_FOUND),
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_repair_refetches_broken_files() {
        let base = serve(mock_server_router()).await;
        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"12345").unwrap();

        let manifest = fetch_manifest(&client, &base).await.unwrap();
        let report = verify(&manifest, dir.path());
        assert_eq!(report.corrupted, vec!["a.txt".to_string()]);

        let repaired = repair(&client, &base, &report.broken_paths(), dir.path(), None)
            .await
            .unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), vec![b'a'; 10]);

        // A fresh scan now comes back clean
        assert!(verify(&manifest, dir.path()).is_clean());
    }

    #[tokio::test]
    async fn test_run_state_machine_transitions() {
        let base = serve(mock_server_router()).await;
        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();

        let mut run = VerificationRun::new();
        assert_eq!(run.state(), VerifyState::Idle);

        // Missing required file → IssuesFound
        let report = run.scan(&client, &base, dir.path()).await.unwrap();
        assert_eq!(run.state(), VerifyState::IssuesFound);

        let sink: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = sink.clone();
        let cb: FileCallback = Arc::new(move |path| seen.lock().unwrap().push(path.to_string()));

        run.repair(&client, &base, &report, dir.path(), Some(cb))
            .await
            .unwrap();
        assert_eq!(run.state(), VerifyState::RepairComplete);
        assert_eq!(*sink.lock().unwrap(), vec!["a.txt".to_string()]);

        // Second scan restarts from zero and finds nothing
        run.scan(&client, &base, dir.path()).await.unwrap();
        assert_eq!(run.state(), VerifyState::NoIssues);
    }

    #[tokio::test]
    async fn test_failed_repair_sets_repair_failed() {
        let base = serve(mock_server_router()).await;
        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();

        let mut run = VerificationRun::new();
        let report = VerifyReport {
            missing: vec!["no-such-file.bin".to_string()],
            corrupted: vec![],
        };

        let err = run
            .repair(&client, &base, &report, dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Transfer(_)));
        assert_eq!(run.state(), VerifyState::RepairFailed);
    }
}
