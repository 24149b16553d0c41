//! Prefix installation from a bootstrap tarball.
//!
//! ```text
//! <prefix>-staging/   extract tarball, apply SYMLINKS.txt, chmod executables
//!        │
//!        └── rename ──→ <prefix>/
//! ```
//!
//! The staging directory is removed if any phase fails or the install is
//! cancelled, so a half-extracted tree never lands on the prefix path.
//! Cancellation is polled between archive entries and before the rename.

use flate2::read::GzDecoder;
use provisio_shared::constants::install as install_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A prefix counts as installed once it is a non-empty directory.
pub fn is_installed(prefix: &Path) -> bool {
    fs::read_dir(prefix)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Install `artifact` into `prefix`. No-op when the prefix is already populated.
///
/// Returns `Cancelled` once `cancelled()` reports true, with staging removed
/// and the prefix untouched.
pub fn install_prefix(
    artifact: &Path,
    prefix: &Path,
    log: &(dyn Fn(&str) + Send + Sync),
    cancelled: &(dyn Fn() -> bool + Send + Sync),
) -> ProvisionResult<()> {
    if is_installed(prefix) {
        log(&format!("Prefix {} already installed", prefix.display()));
        return Ok(());
    }

    let staging = staging_path(prefix)?;
    remove_dir_if_exists(&staging)?;
    remove_dir_if_exists(prefix)?;
    fs::create_dir_all(&staging)?;
    let mut guard = StagingGuard::new(staging.clone());

    log(&format!("Extracting {}", artifact.display()));
    extract_tarball(artifact, &staging, cancelled)?;

    let manifest = staging.join(install_const::SYMLINKS_FILE);
    if manifest.is_file() {
        let text = fs::read_to_string(&manifest)?;
        let links = parse_symlink_manifest(&text)?;
        log(&format!("Creating {} symlinks", links.len()));
        create_symlinks(&staging, &links)?;
        fs::remove_file(&manifest)?;
    }

    let marked = mark_executables(&staging)?;
    tracing::debug!(count = marked, "Marked prefix executables");

    if cancelled() {
        return Err(ProvisionError::Cancelled);
    }
    if let Some(parent) = prefix.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&staging, prefix).map_err(|e| {
        ProvisionError::Storage(format!(
            "Failed to move staging into {}: {}",
            prefix.display(),
            e
        ))
    })?;
    guard.disarm();

    log(&format!("Installed prefix at {}", prefix.display()));
    Ok(())
}

fn staging_path(prefix: &Path) -> ProvisionResult<PathBuf> {
    let name = prefix.file_name().ok_or_else(|| {
        ProvisionError::Config(format!("prefix {} has no final component", prefix.display()))
    })?;
    let mut staging = name.to_owned();
    staging.push("-");
    staging.push(install_const::STAGING_SUFFIX);
    Ok(prefix.with_file_name(staging))
}

fn remove_dir_if_exists(path: &Path) -> ProvisionResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::Storage(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

fn extract_tarball(
    artifact: &Path,
    dest: &Path,
    cancelled: &(dyn Fn() -> bool + Send + Sync),
) -> ProvisionResult<()> {
    let file = fs::File::open(artifact).map_err(|e| {
        ProvisionError::Storage(format!("Failed to open {}: {}", artifact.display(), e))
    })?;
    let extract_err = |e: std::io::Error| {
        ProvisionError::Storage(format!(
            "Failed to extract {}: {}",
            artifact.display(),
            e
        ))
    };

    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    for entry in archive.entries().map_err(extract_err)? {
        if cancelled() {
            tracing::info!(dest = %dest.display(), "Extraction cancelled");
            return Err(ProvisionError::Cancelled);
        }
        let mut entry = entry.map_err(extract_err)?;
        entry.unpack_in(dest).map_err(extract_err)?;
    }
    Ok(())
}

/// Parse `target←linkpath` lines. Blank lines are ignored; anything else without
/// the separator, or a link path escaping the prefix, is an error.
pub fn parse_symlink_manifest(text: &str) -> ProvisionResult<Vec<(String, PathBuf)>> {
    let mut links = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (target, link) = line
            .split_once(install_const::SYMLINK_SEPARATOR)
            .ok_or_else(|| {
                ProvisionError::Storage(format!("Malformed symlink line: {}", line))
            })?;

        let link = Path::new(link.trim());
        let link: PathBuf = link
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        let escapes = link
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if target.is_empty() || link.as_os_str().is_empty() || escapes {
            return Err(ProvisionError::Storage(format!(
                "Malformed symlink line: {}",
                line
            )));
        }

        links.push((target.to_string(), link));
    }
    Ok(links)
}

fn create_symlinks(root: &Path, links: &[(String, PathBuf)]) -> ProvisionResult<()> {
    for (target, link) in links {
        let link_path = root.join(link);
        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, &link_path).map_err(|e| {
            ProvisionError::Storage(format!(
                "Failed to link {} -> {}: {}",
                link_path.display(),
                target,
                e
            ))
        })?;
    }
    Ok(())
}

fn is_executable_path(relative: &str) -> bool {
    install_const::EXECUTABLE_PATHS.iter().any(|pattern| {
        if pattern.ends_with('/') {
            relative.starts_with(pattern)
        } else {
            relative == *pattern
        }
    })
}

fn mark_executables(root: &Path) -> ProvisionResult<usize> {
    let mut marked = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| ProvisionError::Storage(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if is_executable_path(&relative.to_string_lossy()) {
            fs::set_permissions(
                entry.path(),
                fs::Permissions::from_mode(install_const::EXECUTABLE_MODE),
            )?;
            marked += 1;
        }
    }
    Ok(marked)
}

/// Removes the staging directory unless disarmed.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(path = %self.path.display(), "Install failed, removing staging directory");
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!("Failed to remove staging directory: {}", e);
        }
    }
}
