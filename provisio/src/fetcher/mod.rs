//! Artifact fetching: architecture detection, cache, download, install.

mod arch;
mod cache;
mod download;
mod install;
mod progress;
mod transport;

pub use arch::{ArchitectureTag, detect_architecture, detect_from};
pub use cache::{ArtifactCache, CachedArtifact, checksum_matches, sha256_file};
pub use install::{install_prefix, is_installed, parse_symlink_manifest};
pub use progress::{DownloadProgress, ProgressThrottle, ProgressUpdate};
pub use transport::{ByteStream, HttpResponse, HttpTransport, ReqwestTransport};

use crate::config::ArtifactConfig;
use download::{DownloadInput, run_download};
use provisio_shared::constants::cache as cache_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Log callback shared with blocking install work.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Polled by blocking install work; true aborts with `Cancelled`.
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Owns the artifact cache and every filesystem mutation of it.
pub struct ArtifactFetcher {
    config: ArtifactConfig,
    cache: ArtifactCache,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for ArtifactFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactFetcher")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

impl ArtifactFetcher {
    pub fn new(
        config: ArtifactConfig,
        cache_dir: impl Into<PathBuf>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let cache = ArtifactCache::new(cache_dir, config.file_name_template.clone());
        Self {
            config,
            cache,
            transport,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn detect_architecture(&self) -> ProvisionResult<ArchitectureTag> {
        detect_architecture(&self.config.abi_overrides)
    }

    /// Download URL for `tag`, with `{arch}` and `{version}` substituted.
    pub fn url_for(&self, tag: ArchitectureTag) -> String {
        self.config
            .url_template
            .replace(cache_const::ARCH_PLACEHOLDER, tag.as_str())
            .replace("{version}", &self.config.version)
    }

    /// Configured checksum for `tag`; empty or absent disables verification.
    pub fn expected_checksum(&self, tag: ArchitectureTag) -> Option<&str> {
        self.config
            .checksums
            .get(tag.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Verified cached artifact for `tag`. Hashing runs on the blocking pool.
    pub async fn locate_cached(
        &self,
        tag: ArchitectureTag,
    ) -> ProvisionResult<Option<CachedArtifact>> {
        let cache = self.cache.clone();
        let expected = self.expected_checksum(tag).map(str::to_string);
        let version = self.config.version.clone();
        tokio::task::spawn_blocking(move || cache.locate(tag, expected.as_deref(), &version))
            .await
            .map_err(|e| ProvisionError::Internal(format!("cache lookup panicked: {}", e)))?
    }

    /// Download the artifact for `tag`, reporting every chunk.
    ///
    /// Throttling is the caller's concern. Callers may retry by calling again;
    /// a leftover partial file is resumed.
    pub async fn download(
        &self,
        tag: ArchitectureTag,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> ProvisionResult<CachedArtifact> {
        let url = self.url_for(tag);
        run_download(
            DownloadInput {
                transport: self.transport.as_ref(),
                cache: &self.cache,
                tag,
                url: &url,
                expected_checksum: self.expected_checksum(tag),
                version: &self.config.version,
            },
            on_progress,
        )
        .await
    }

    /// Install `artifact_path` into `prefix` on the blocking pool.
    ///
    /// Resolves only after the blocking work has finished, including when
    /// `cancelled` cut it short.
    pub async fn install(
        &self,
        artifact_path: &Path,
        prefix: &Path,
        log: LogFn,
        cancelled: CancelFn,
    ) -> ProvisionResult<()> {
        let artifact = artifact_path.to_path_buf();
        let prefix = prefix.to_path_buf();
        tokio::task::spawn_blocking(move || {
            install_prefix(&artifact, &prefix, log.as_ref(), cancelled.as_ref())
        })
        .await
        .map_err(|e| ProvisionError::Internal(format!("install task panicked: {}", e)))?
    }

    pub fn is_installed(&self, prefix: &Path) -> bool {
        is_installed(prefix)
    }

    /// Drop every cached file for `tag`, forcing a fresh download.
    pub fn clear_cached(&self, tag: ArchitectureTag) -> ProvisionResult<()> {
        tracing::debug!(arch = %tag, "Clearing cached artifact");
        self.cache.clear(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StaticTransport, sha256_hex};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_fetcher(
        dir: &TempDir,
        checksum: Option<&str>,
        transport: Arc<StaticTransport>,
    ) -> ArtifactFetcher {
        let mut checksums = HashMap::new();
        if let Some(sum) = checksum {
            checksums.insert("aarch64".to_string(), sum.to_string());
        }
        let config = ArtifactConfig {
            url_template: "https://artifacts.test/{version}/bootstrap-{arch}.tar.gz".into(),
            version: "v1".into(),
            checksums,
            file_name_template: "bootstrap-{arch}.tar.gz".into(),
            abi_overrides: vec!["arm64".into()],
        };
        ArtifactFetcher::new(config, dir.path(), transport)
    }

    #[test]
    fn test_url_and_checksum_lookup() {
        let dir = TempDir::new().unwrap();
        let fetcher = create_test_fetcher(&dir, Some(""), StaticTransport::serving(b"x"));
        let tag = fetcher.detect_architecture().unwrap();
        assert_eq!(tag, ArchitectureTag::Aarch64);
        assert_eq!(
            fetcher.url_for(tag),
            "https://artifacts.test/v1/bootstrap-aarch64.tar.gz"
        );
        assert_eq!(fetcher.expected_checksum(tag), None);
    }

    #[tokio::test]
    async fn test_download_verifies_and_caches() {
        let dir = TempDir::new().unwrap();
        let body = b"bootstrap payload".to_vec();
        let transport = StaticTransport::serving(&body);
        let fetcher = create_test_fetcher(&dir, Some(&sha256_hex(&body)), transport.clone());
        let tag = ArchitectureTag::Aarch64;

        let mut reports = Vec::new();
        let artifact = fetcher
            .download(tag, &mut |done, total| reports.push((done, total)))
            .await
            .unwrap();

        assert!(artifact.verified);
        assert_eq!(fs::read(&artifact.path).unwrap(), body);
        assert_eq!(reports.first(), Some(&(0, Some(body.len() as u64))));
        assert_eq!(reports.last(), Some(&(body.len() as u64, Some(body.len() as u64))));
        assert!(!fetcher.cache().partial_path(tag).exists());

        let cached = fetcher.locate_cached(tag).await.unwrap().unwrap();
        assert_eq!(cached.path, artifact.path);
    }

    #[tokio::test]
    async fn test_unknown_length_reports_final_total() {
        let dir = TempDir::new().unwrap();
        let body = b"payload without a length".to_vec();
        let fetcher = create_test_fetcher(
            &dir,
            Some(&sha256_hex(&body)),
            StaticTransport::serving_unsized(&body),
        );

        let mut reports = Vec::new();
        fetcher
            .download(ArchitectureTag::Aarch64, &mut |done, total| reports.push((done, total)))
            .await
            .unwrap();

        let len = body.len() as u64;
        assert_eq!(reports.first(), Some(&(0, None)));
        assert_eq!(reports.last(), Some(&(len, Some(len))));
        assert!(reports[..reports.len() - 1].iter().all(|(_, total)| total.is_none()));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_deletes_download() {
        let dir = TempDir::new().unwrap();
        let transport = StaticTransport::serving(b"tampered");
        let fetcher = create_test_fetcher(&dir, Some(&sha256_hex(b"genuine")), transport);
        let tag = ArchitectureTag::Aarch64;

        let err = fetcher.download(tag, &mut |_, _| {}).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ChecksumMismatch { .. }));
        assert!(!fetcher.cache().partial_path(tag).exists());
        assert!(!fetcher.cache().artifact_path(tag).exists());
        assert!(fetcher.locate_cached(tag).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let dir = TempDir::new().unwrap();
        let transport = StaticTransport::failing_with(404);
        let fetcher = create_test_fetcher(&dir, None, transport);

        let err = fetcher
            .download(ArchitectureTag::Aarch64, &mut |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DownloadFailed { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_truncated_transfer_resumes() {
        let dir = TempDir::new().unwrap();
        let body = b"0123456789abcdef".to_vec();
        let transport = StaticTransport::serving(&body);
        transport.truncate_next_at(6);
        let fetcher = create_test_fetcher(&dir, Some(&sha256_hex(&body)), transport.clone());
        let tag = ArchitectureTag::Aarch64;

        let err = fetcher.download(tag, &mut |_, _| {}).await.unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert_eq!(fs::read(fetcher.cache().partial_path(tag)).unwrap(), b"012345");

        let artifact = fetcher.download(tag, &mut |_, _| {}).await.unwrap();
        assert_eq!(fs::read(&artifact.path).unwrap(), body);
        assert_eq!(transport.range_requests(), vec![None, Some(6)]);
    }

    #[tokio::test]
    async fn test_clear_cached_removes_everything() {
        let dir = TempDir::new().unwrap();
        let fetcher = create_test_fetcher(&dir, None, StaticTransport::serving(b"abc"));
        let tag = ArchitectureTag::Aarch64;
        fetcher.download(tag, &mut |_, _| {}).await.unwrap();

        fetcher.clear_cached(tag).unwrap();
        assert!(!fetcher.cache().artifact_path(tag).exists());
        assert!(!fetcher.cache().version_path(tag).exists());
    }
}
