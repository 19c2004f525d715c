//! Version resolution against the update server.
//!
//! Asks `GET /api/version` what the server is shipping and decides
//! whether this installation needs an update. Version comparison is
//! byte-for-byte string inequality — there is no semver ordering; the
//! server is trusted to only advertise versions that supersede ours.

use crate::utils::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One downloadable patch advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchDescriptor {
    pub version: String,

    /// Absolute URL of the patch archive.
    pub url: String,

    /// Human-readable changelog lines.
    #[serde(default)]
    pub changes: Vec<String>,

    #[serde(default)]
    pub required: bool,
}

/// Outcome of a version check.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub current_version: String,
    pub server_version: String,
    pub needs_update: bool,
    pub patches: Vec<PatchDescriptor>,
}

impl VersionInfo {
    /// The patch this cycle would apply. Only `patches[0]` is ever
    /// installed; pending-patch chains are not supported.
    pub fn pending_patch(&self) -> Option<&PatchDescriptor> {
        if self.needs_update {
            self.patches.first()
        } else {
            None
        }
    }
}

/// Wire shape of `GET /api/version`. The server also reports a
/// `needsUpdate` flag relative to its own idea of the deployed version;
/// we recompute it from the locally installed version instead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    server_version: String,
    #[serde(default)]
    patches: Vec<PatchDescriptor>,
}

/// Check the server's advertised version against `local_version`.
///
/// Read-only: performs the network call and nothing else.
pub async fn resolve(
    client: &reqwest::Client,
    local_version: &str,
    base_url: &str,
) -> Result<VersionInfo> {
    let url = format!("{}/api/version", base_url.trim_end_matches('/'));
    debug!("Checking version at {}", url);

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

    let body: VersionResponse = resp
        .json()
        .await
        .map_err(|e| UpdateError::MalformedResponse(e.to_string()))?;

    let needs_update = local_version != body.server_version;
    info!(
        "Version check: local={} server={} needs_update={}",
        local_version, body.server_version, needs_update
    );

    Ok(VersionInfo {
        current_version: local_version.to_string(),
        server_version: body.server_version,
        needs_update,
        patches: body.patches,
    })
}
