//! Update-cycle orchestration.
//!
//! One logical flow: resolve → fetch patch → validate archive → install →
//! persist version state. Manual triggers and the background timer share
//! this code path and are serialized by a single in-flight guard; a
//! trigger that loses the race is rejected immediately, never queued.

use crate::archive;
use crate::config::Config;
use crate::installer::{self, PhaseCallback};
use crate::resolver::{self, VersionInfo};
use crate::state::{AgentPaths, InstalledState};
use crate::transfer::{self, ProgressCallback};
use crate::utils::{Result, UpdateError};
use crate::verifier::{self, VerificationRun, VerifyReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Interval between automatic update checks in watch mode.
pub const AUTO_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Initial version written by a full-client install.
const INITIAL_VERSION: &str = "1.0.0";

/// Fire-and-forget notification hooks for one cycle.
#[derive(Clone, Default)]
pub struct CycleCallbacks {
    /// Integer download percentage
    pub on_progress: Option<ProgressCallback>,

    /// `(phase, detail, percent)` for multi-step phases
    pub on_phase: Option<PhaseCallback>,
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    UpToDate,
    Updated { version: String },
}

/// The update agent: owns the HTTP client, the state directory layout,
/// and the in-flight-cycle guard.
pub struct Updater {
    client: reqwest::Client,
    base_url: String,
    paths: AgentPaths,
    config_path: PathBuf,
    in_flight: Mutex<()>,
}

impl Updater {
    pub fn new(base_url: impl Into<String>, paths: AgentPaths, config_path: PathBuf) -> Self {
        Updater {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            paths,
            config_path,
            in_flight: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::from_file(&self.config_path)
    }

    /// The installed version: the version-state file when present, the
    /// config's cached field otherwise.
    fn installed_version(&self, config: &Config) -> Result<String> {
        if let Some(state) = InstalledState::load(&self.paths.version_file())? {
            return Ok(state.version);
        }
        if config.current_version.is_empty() {
            return Err(UpdateError::Config(
                "no installed client: run a full install first".to_string(),
            ));
        }
        Ok(config.current_version.clone())
    }

    /// Ask the server whether an update is needed. Read-only.
    pub async fn check(&self) -> Result<VersionInfo> {
        let config = self.load_config()?;
        let local = self.installed_version(&config)?;
        resolver::resolve(&self.client, &local, &self.base_url).await
    }

    /// Run one full update cycle.
    ///
    /// Fails with `UpdateInProgress` when another cycle (manual or timer)
    /// holds the guard.
    pub async fn run_cycle(
        &self,
        callbacks: &CycleCallbacks,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| UpdateError::UpdateInProgress)?;

        let mut config = self.load_config()?;
        let local = self.installed_version(&config)?;
        let info = resolver::resolve(&self.client, &local, &self.base_url).await?;

        if !info.needs_update {
            return Ok(UpdateOutcome::UpToDate);
        }

        let patch = info
            .pending_patch()
            .ok_or_else(|| UpdateError::NoPatchAvailable(info.server_version.clone()))?
            .clone();
        info!(
            "Updating {} -> {} ({} changes listed)",
            local,
            patch.version,
            patch.changes.len()
        );

        let archive_path = self
            .paths
            .downloads_dir()
            .join(format!("patch-{}.zip", patch.version));

        self.phase(callbacks, "Downloading", "patch.zip", 0);
        transfer::fetch(
            &self.client,
            &patch.url,
            &archive_path,
            callbacks.on_progress.clone(),
            cancel,
        )
        .await?;
        self.phase(callbacks, "Downloading", "patch.zip", 100);

        // Never extract an archive that fails validation.
        archive::validate(&archive_path).await?;

        let report = installer::install(
            &archive_path,
            &config.install_path,
            &self.paths.backups_dir(),
            callbacks.on_phase.clone(),
        )
        .await?;
        debug!("Extracted {} entries", report.entries_extracted);

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            debug!("Leaving downloaded archive in place: {}", e);
        }

        InstalledState::updated(&patch.version).save(&self.paths.version_file())?;
        config.current_version = patch.version.clone();
        config.save(&self.config_path)?;

        Ok(UpdateOutcome::Updated {
            version: patch.version,
        })
    }

    /// Download and install the full client into `install_path`, then
    /// record the initial installed state.
    pub async fn install_full_client(
        &self,
        install_path: &Path,
        callbacks: &CycleCallbacks,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| UpdateError::UpdateInProgress)?;

        let mut config = self.load_config()?;
        let url = format!("{}/api/full-client", self.base_url);
        let archive_path = self.paths.downloads_dir().join("full-client.zip");

        self.phase(callbacks, "Downloading", "full-client.zip", 0);
        transfer::fetch(
            &self.client,
            &url,
            &archive_path,
            callbacks.on_progress.clone(),
            cancel,
        )
        .await?;
        self.phase(callbacks, "Downloading", "full-client.zip", 100);

        archive::validate(&archive_path).await?;

        self.phase(callbacks, "Installing", "Extracting files...", 0);
        installer::install(
            &archive_path,
            install_path,
            &self.paths.backups_dir(),
            callbacks.on_phase.clone(),
        )
        .await?;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            debug!("Leaving downloaded archive in place: {}", e);
        }

        InstalledState::installed(INITIAL_VERSION).save(&self.paths.version_file())?;

        config.install_path = install_path.to_path_buf();
        config.client_path = install_path.join("client.exe");
        config.current_version = INITIAL_VERSION.to_string();
        config.is_installed = true;
        config.save(&self.config_path)?;

        self.phase(callbacks, "Installing", "Finalizing...", 100);
        info!(
            "Full client installed at {} (version {})",
            install_path.display(),
            INITIAL_VERSION
        );
        Ok(())
    }

    /// Scan the installation against a fresh server manifest.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let config = self.load_config()?;
        let mut run = VerificationRun::new();
        run.scan(&self.client, &self.base_url, &config.install_path)
            .await
    }

    /// Scan, then repair everything flagged. Returns the repaired count.
    pub async fn verify_and_repair(&self, on_file: Option<verifier::FileCallback>) -> Result<usize> {
        let config = self.load_config()?;
        let mut run = VerificationRun::new();
        let report = run
            .scan(&self.client, &self.base_url, &config.install_path)
            .await?;
        if report.is_clean() {
            return Ok(0);
        }
        run.repair(
            &self.client,
            &self.base_url,
            &report,
            &config.install_path,
            on_file,
        )
        .await
    }

    fn phase(&self, callbacks: &CycleCallbacks, phase: &str, detail: &str, percent: u8) {
        if let Some(cb) = callbacks.on_phase.as_ref() {
            cb(phase, detail, percent);
        }
    }
}

/// Background task that runs an automatic cycle on a fixed interval
/// until `cancel` fires. Shares the updater's in-flight guard with
/// manual cycles, so the two can never install concurrently.
pub fn spawn_auto_update(
    updater: Arc<Updater>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match updater.run_cycle(&CycleCallbacks::default(), &cancel).await {
                Ok(UpdateOutcome::UpToDate) => debug!("Automatic check: client is up to date"),
                Ok(UpdateOutcome::Updated { version }) => {
                    info!("Automatic update to {} complete", version);
                }
                Err(UpdateError::UpdateInProgress) => {
                    debug!("Automatic check skipped: a cycle is already running");
                }
                Err(e) => error!("Automatic update failed: {}", e),
            }
        }
    })
}
