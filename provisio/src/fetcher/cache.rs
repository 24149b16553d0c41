//! Artifact cache layout and checksum verification.

use super::arch::ArchitectureTag;
use provisio_shared::constants::cache as cache_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A downloaded artifact owned by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub expected_checksum: Option<String>,
    pub verified: bool,
}

/// Deterministic on-disk layout for cached artifacts.
///
/// ```text
/// <cache-root>/
/// ├── bootstrap-aarch64.tar.gz          # verified artifact
/// ├── bootstrap-aarch64.tar.gz.part     # in-progress download
/// └── bootstrap-aarch64.tar.gz.version  # version the artifact came from
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    file_name_template: String,
}

impl ArtifactCache {
    pub fn new(cache_root: impl Into<PathBuf>, file_name_template: impl Into<String>) -> Self {
        Self {
            root: cache_root.into(),
            file_name_template: file_name_template.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, tag: ArchitectureTag) -> PathBuf {
        let name = self
            .file_name_template
            .replace(cache_const::ARCH_PLACEHOLDER, tag.as_str());
        self.root.join(name)
    }

    pub fn partial_path(&self, tag: ArchitectureTag) -> PathBuf {
        with_suffix(&self.artifact_path(tag), cache_const::PARTIAL_SUFFIX)
    }

    pub fn version_path(&self, tag: ArchitectureTag) -> PathBuf {
        with_suffix(&self.artifact_path(tag), cache_const::VERSION_SUFFIX)
    }

    pub fn prepare(&self) -> ProvisionResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            ProvisionError::Storage(format!(
                "Failed to create cache directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Version recorded next to the cached artifact, if any.
    pub fn cached_version(&self, tag: ArchitectureTag) -> Option<String> {
        fs::read_to_string(self.version_path(tag))
            .ok()
            .map(|v| v.trim().to_string())
    }

    pub fn write_version(&self, tag: ArchitectureTag, version: &str) -> ProvisionResult<()> {
        fs::write(self.version_path(tag), version)?;
        Ok(())
    }

    /// Look up a reusable artifact for `tag`.
    ///
    /// A stale version or a checksum mismatch deletes the file and reports a miss.
    pub fn locate(
        &self,
        tag: ArchitectureTag,
        expected_checksum: Option<&str>,
        version: &str,
    ) -> ProvisionResult<Option<CachedArtifact>> {
        let path = self.artifact_path(tag);
        if !path.is_file() {
            return Ok(None);
        }

        match self.cached_version(tag) {
            Some(cached) if cached == version => {}
            cached => {
                tracing::info!(
                    path = %path.display(),
                    cached_version = ?cached,
                    version = %version,
                    "Cached artifact is outdated, removing"
                );
                self.clear(tag)?;
                return Ok(None);
            }
        }

        let Some(expected) = expected_checksum else {
            tracing::debug!(path = %path.display(), "Using cached artifact without checksum");
            return Ok(Some(CachedArtifact {
                path,
                expected_checksum: None,
                verified: false,
            }));
        };

        let actual = sha256_file(&path)?;
        if !checksum_matches(expected, &actual) {
            tracing::warn!(
                path = %path.display(),
                expected = %expected,
                actual = %actual,
                "Cached artifact failed verification, removing"
            );
            self.clear(tag)?;
            return Ok(None);
        }

        tracing::info!(path = %path.display(), "Using verified cached artifact");
        Ok(Some(CachedArtifact {
            path,
            expected_checksum: Some(expected.to_string()),
            verified: true,
        }))
    }

    /// Remove the artifact, its partial download and its version sidecar.
    pub fn clear(&self, tag: ArchitectureTag) -> ProvisionResult<()> {
        for path in [
            self.artifact_path(tag),
            self.partial_path(tag),
            self.version_path(tag),
        ] {
            remove_if_exists(&path)?;
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn remove_if_exists(path: &Path) -> ProvisionResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::Storage(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> ProvisionResult<String> {
    let mut file = fs::File::open(path).map_err(|e| {
        ProvisionError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    hash_reader(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn hash_reader(reader: &mut impl Read, hasher: &mut Sha256) -> ProvisionResult<()> {
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

/// Case-insensitive hex comparison.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
