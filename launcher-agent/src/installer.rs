//! Patch installation: backup snapshot plus extraction over a live
//! installation directory.
//!
//! Extraction is last-writer-wins and not transactional across the file
//! set: a failure partway leaves the target in a mixed state, reported as
//! `PartialInstall` so the caller can run the integrity verifier. Before
//! anything is overwritten, the pre-existing copy of every affected file
//! is placed in a timestamp-named backup snapshot.

use crate::utils::{Result, UpdateError};
use chrono::Utc;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use zip::ZipArchive;

/// Callback for multi-step phase notifications: `(phase, detail, percent)`
pub type PhaseCallback = Arc<dyn Fn(&str, &str, u8) + Send + Sync>;

/// Result of a completed installation.
#[derive(Debug)]
pub struct InstallReport {
    pub entries_extracted: usize,

    /// Snapshot directory holding pre-update copies of overwritten files.
    pub backup_dir: PathBuf,
}

/// Extract `archive_path` into `target_dir`, overwriting existing files.
///
/// A backup snapshot is created under `backups_dir` before extraction
/// begins. Returns `Ok` only if every entry extracted without error.
pub async fn install(
    archive_path: &Path,
    target_dir: &Path,
    backups_dir: &Path,
    on_phase: Option<PhaseCallback>,
) -> Result<InstallReport> {
    let archive_path = archive_path.to_path_buf();
    let target_dir = target_dir.to_path_buf();
    let backups_dir = backups_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        install_sync(&archive_path, &target_dir, &backups_dir, on_phase)
    })
    .await
    .map_err(|e| UpdateError::FileSystem(std::io::Error::other(e)))?
}

fn install_sync(
    archive_path: &Path,
    target_dir: &Path,
    backups_dir: &Path,
    on_phase: Option<PhaseCallback>,
) -> Result<InstallReport> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| UpdateError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;

    // Resolve every entry to a path inside the target before touching
    // anything. An entry that escapes the target rejects the whole
    // archive, not just the entry.
    let mut entries: Vec<(usize, String, PathBuf)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            UpdateError::CorruptArchive(format!("entry '{}' escapes the target directory", entry.name()))
        })?;
        entries.push((i, entry.name().to_string(), relative));
    }

    std::fs::create_dir_all(target_dir)?;
    let backup_dir = snapshot_overwritten(&entries, target_dir, backups_dir)?;

    let total = entries.len();
    let mut completed = 0usize;
    for (index, name, relative) in &entries {
        let percent = if total > 0 {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        } else {
            100
        };
        if let Some(cb) = on_phase.as_ref() {
            cb("Installing", name, percent);
        }

        if let Err(e) = extract_entry(&mut archive, *index, name, &target_dir.join(relative)) {
            warn!(
                "Extraction failed on '{}' after {} of {} entries; target is mixed",
                name, completed, total
            );
            return Err(UpdateError::PartialInstall {
                completed,
                total,
                failed_entry: name.clone(),
                source: e,
            });
        }
        completed += 1;
    }

    if let Some(cb) = on_phase.as_ref() {
        cb("Installing", "Finalizing", 100);
    }

    info!(
        "Installed {} entries into {} (backup at {})",
        completed,
        target_dir.display(),
        backup_dir.display()
    );
    Ok(InstallReport {
        entries_extracted: completed,
        backup_dir,
    })
}

/// Create the timestamp-named snapshot directory and copy into it every
/// target file the archive is about to overwrite.
fn snapshot_overwritten(
    entries: &[(usize, String, PathBuf)],
    target_dir: &Path,
    backups_dir: &Path,
) -> Result<PathBuf> {
    let backup_dir = backups_dir.join(Utc::now().format("%Y%m%d-%H%M%S%.3f").to_string());
    std::fs::create_dir_all(&backup_dir)?;

    for (_, _, relative) in entries {
        let existing = target_dir.join(relative);
        if existing.is_file() {
            let saved = backup_dir.join(relative);
            if let Some(parent) = saved.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&existing, &saved)?;
        }
    }
    Ok(backup_dir)
}

fn extract_entry(
    archive: &mut ZipArchive<File>,
    index: usize,
    name: &str,
    out_path: &Path,
) -> std::io::Result<()> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| std::io::Error::other(format!("{}: {}", name, e)))?;

    if entry.is_dir() {
        std::fs::create_dir_all(out_path)?;
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out_file = File::create(out_path)?;
    std::io::copy(&mut entry, &mut out_file)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode() {
            std::fs::set_permissions(out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}
