//! Patch archive validation.
//!
//! Every downloaded archive is checked here before the installer is
//! allowed to touch it: if the zip central directory cannot be parsed,
//! the update cycle fails loudly instead of partially applying corrupt
//! content.

use crate::utils::{Result, UpdateError};
use std::fs::File;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Result of a successful archive validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub entry_count: usize,
    pub entry_names: Vec<String>,
}

/// Confirm that `archive_path` is a well-formed zip archive.
pub async fn validate(archive_path: &Path) -> Result<ValidationResult> {
    let path = archive_path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || validate_sync(&path))
        .await
        .map_err(|e| UpdateError::FileSystem(std::io::Error::other(e)))??;

    debug!(
        "Validated archive {}: {} entries",
        archive_path.display(),
        result.entry_count
    );
    Ok(result)
}

pub(crate) fn validate_sync(archive_path: &Path) -> Result<ValidationResult> {
    let file = File::open(archive_path)?;
    let archive = ZipArchive::new(file)
        .map_err(|e| UpdateError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;

    let entry_names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
    Ok(ValidationResult {
        entry_count: entry_names.len(),
        entry_names,
    })
}
