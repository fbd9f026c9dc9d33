use std::path::{Path, PathBuf};

use hark_core::{HarkError, HarkResult};
use tracing::{debug, warn};

use crate::plugin::PluginManifest;

pub const MANIFEST_FILE: &str = "plugin.json";

pub const KNOWN_FRAMEWORKS: [&str; 5] = ["react", "vue", "angular", "svelte", "vanilla"];

/// `MAJOR.MINOR.PATCH` with optional `-pre` and `+build` parts.
pub fn is_semver(version: &str) -> bool {
    let (rest, build) = match version.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (version, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let numbers: Vec<&str> = core.split('.').collect();
    if numbers.len() != 3 {
        return false;
    }
    let numeric_ok = numbers.iter().all(|n| {
        !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && (n.len() == 1 || !n.starts_with('0'))
    });
    if !numeric_ok {
        return false;
    }

    let idents_ok = |s: &str| {
        s.split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    };
    pre.map_or(true, idents_ok) && build.map_or(true, idents_ok)
}

pub fn validate_manifest(manifest: &PluginManifest) -> HarkResult<()> {
    if manifest.name.trim().is_empty() {
        return Err(HarkError::validation("Plugin manifest is missing 'name'"));
    }
    if manifest.version.trim().is_empty() {
        return Err(HarkError::validation(format!(
            "Plugin '{}' manifest is missing 'version'",
            manifest.name
        )));
    }
    if manifest.description.trim().is_empty() {
        return Err(HarkError::validation(format!(
            "Plugin '{}' manifest is missing 'description'",
            manifest.name
        )));
    }
    if !is_semver(&manifest.version) {
        return Err(HarkError::validation(format!(
            "Plugin '{}' has invalid version '{}'",
            manifest.name, manifest.version
        )));
    }
    if let Some(framework) = &manifest.framework {
        if !KNOWN_FRAMEWORKS.contains(&framework.as_str()) {
            return Err(HarkError::validation(format!(
                "Plugin '{}' uses unsupported framework '{framework}'",
                manifest.name
            ))
            .with_data(serde_json::json!({ "supported": KNOWN_FRAMEWORKS })));
        }
    }
    Ok(())
}

/// Read and validate `<dir>/plugin.json`.
pub async fn load_manifest(dir: &Path) -> HarkResult<PluginManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
        HarkError::validation(format!("Cannot read {}", path.display())).with_source(e.into())
    })?;
    let manifest: PluginManifest = serde_json::from_str(&raw).map_err(|e| {
        HarkError::validation(format!("Malformed {}: {e}", path.display())).with_source(e.into())
    })?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Immediate subdirectories of `root` that contain a manifest, sorted by path.
///
/// A missing root yields an empty list.
pub async fn discover(root: &Path) -> HarkResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %root.display(), "plugins directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(HarkError::configuration(format!(
                "Cannot read plugins directory {}",
                root.display()
            ))
            .with_source(e.into()))
        }
    };

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| HarkError::configuration("Failed to list plugins directory").with_source(e.into()))?
    {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if tokio::fs::try_exists(path.join(MANIFEST_FILE)).await.unwrap_or(false) {
            found.push(path);
        } else {
            debug!(dir = %path.display(), "skipping directory without {MANIFEST_FILE}");
        }
    }
    found.sort();
    Ok(found)
}
