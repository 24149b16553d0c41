//! Resumable streaming download into the artifact cache.

use super::arch::ArchitectureTag;
use super::cache::{
    ArtifactCache, CachedArtifact, checksum_matches, hash_reader, remove_if_exists, sha256_file,
};
use super::transport::{HttpResponse, HttpTransport};
use futures::StreamExt;
use provisio_shared::constants::http as http_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Inputs of a single download attempt.
pub(crate) struct DownloadInput<'a> {
    pub transport: &'a dyn HttpTransport,
    pub cache: &'a ArtifactCache,
    pub tag: ArchitectureTag,
    pub url: &'a str,
    pub expected_checksum: Option<&'a str>,
    pub version: &'a str,
}

/// Stream `url` into the cache for `tag`.
///
/// Resumes from a leftover partial file with a range request. The partial file
/// survives network errors and truncation so the next attempt can resume; a
/// checksum mismatch deletes it.
pub(crate) async fn run_download(
    input: DownloadInput<'_>,
    on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
) -> ProvisionResult<CachedArtifact> {
    let DownloadInput {
        transport,
        cache,
        tag,
        url,
        expected_checksum,
        version,
    } = input;

    cache.prepare()?;
    let partial = cache.partial_path(tag);
    let dest = cache.artifact_path(tag);

    let existing = tokio::fs::metadata(&partial)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    let range_start = (existing > 0).then_some(existing);

    tracing::info!(url = %url, arch = %tag, resume_from = ?range_start, "Downloading artifact");

    let HttpResponse {
        status,
        content_length,
        mut body,
    } = transport.get(url, range_start).await?;

    let (mut file, start, total, mut hasher) = match status {
        http_const::STATUS_PARTIAL_CONTENT if range_start.is_some() => {
            tracing::debug!(offset = existing, "Server honored range request, resuming");
            let hasher = hash_existing(partial.clone()).await?;
            let file = OpenOptions::new().append(true).open(&partial).await?;
            (file, existing, content_length.map(|len| existing + len), hasher)
        }
        http_const::STATUS_OK => {
            if range_start.is_some() {
                tracing::debug!("Server ignored range request, restarting download");
            }
            let file = File::create(&partial).await?;
            (file, 0, content_length, Sha256::new())
        }
        other => {
            return Err(ProvisionError::download(format!(
                "unexpected HTTP status {} from {}",
                other, url
            )));
        }
    };

    let mut transferred = start;
    on_progress(transferred, total);

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        transferred += chunk.len() as u64;
        on_progress(transferred, total);
    }
    file.flush().await?;
    drop(file);

    if let Some(total) = total
        && transferred != total
    {
        return Err(ProvisionError::download(format!(
            "truncated transfer: received {} of {} bytes",
            transferred, total
        )));
    }
    if total.is_none() {
        // Length was never announced; the finished size is the total.
        on_progress(transferred, Some(transferred));
    }

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected_checksum
        && !checksum_matches(expected, &actual)
    {
        tracing::warn!(expected = %expected, actual = %actual, "Downloaded artifact failed verification");
        remove_if_exists(&partial)?;
        return Err(ProvisionError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    tokio::fs::rename(&partial, &dest).await.map_err(|e| {
        ProvisionError::Storage(format!(
            "Failed to move download into {}: {}",
            dest.display(),
            e
        ))
    })?;
    cache.write_version(tag, version)?;

    let verified = match expected_checksum {
        Some(expected) => {
            let actual = hash_file(dest.clone()).await?;
            if !checksum_matches(expected, &actual) {
                cache.clear(tag)?;
                return Err(ProvisionError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
            true
        }
        None => false,
    };

    tracing::info!(path = %dest.display(), bytes = transferred, verified, "Artifact downloaded");

    Ok(CachedArtifact {
        path: dest,
        expected_checksum: expected_checksum.map(str::to_string),
        verified,
    })
}

async fn hash_file(path: PathBuf) -> ProvisionResult<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| ProvisionError::Internal(format!("hash task panicked: {}", e)))?
}

async fn hash_existing(path: PathBuf) -> ProvisionResult<Sha256> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        hash_reader(&mut file, &mut hasher)?;
        Ok::<_, ProvisionError>(hasher)
    })
    .await
    .map_err(|e| ProvisionError::Internal(format!("hash task panicked: {}", e)))?
}
