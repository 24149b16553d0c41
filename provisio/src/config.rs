use crate::chain::ChainConfig;
use provisio_shared::constants::cache as cache_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where artifacts come from and how they are verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Download URL; `{arch}` and `{version}` are substituted.
    pub url_template: String,
    /// Version tag recorded next to cached artifacts; a change invalidates the cache.
    pub version: String,
    /// SHA-256 per architecture tag. Empty or missing skips verification.
    pub checksums: HashMap<String, String>,
    pub file_name_template: String,
    /// ABI identifiers tried before the host's compile-time architecture.
    pub abi_overrides: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            url_template:
                "https://github.com/provisio-dev/bootstraps/releases/download/{version}/bootstrap-{arch}.tar.gz"
                    .to_string(),
            version: "v1.0.0".to_string(),
            checksums: HashMap::new(),
            file_name_template: "bootstrap-{arch}.tar.gz".to_string(),
            abi_overrides: Vec::new(),
        }
    }
}

/// Top-level provisioning options.
///
/// Loaded from JSON; every field has a default so partial files are valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionOptions {
    /// Working directory for chain commands.
    pub home_dir: PathBuf,
    /// Installed runtime prefix.
    pub prefix_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Daily-rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
    pub artifact: ArtifactConfig,
    pub chain: ChainConfig,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("provisio");
        Self::with_base_dir(base)
    }
}

impl ProvisionOptions {
    /// Default options rooted at `base` (`home/`, `usr/`, `cache/`).
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            home_dir: base.join("home"),
            prefix_dir: base.join("usr"),
            cache_dir: base.join("cache"),
            log_dir: None,
            artifact: ArtifactConfig::default(),
            chain: ChainConfig::default(),
        }
    }

    /// Load options from a JSON file.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let options: Self = serde_json::from_str(&text).map_err(|e| {
            ProvisionError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        options.sanitize()?;
        Ok(options)
    }

    /// Validate before anything touches the filesystem or network.
    pub fn sanitize(&self) -> ProvisionResult<()> {
        for (name, dir) in [
            ("home_dir", &self.home_dir),
            ("prefix_dir", &self.prefix_dir),
            ("cache_dir", &self.cache_dir),
        ] {
            if !dir.is_absolute() {
                return Err(ProvisionError::Config(format!(
                    "{} must be absolute path, got: {}",
                    name,
                    dir.display()
                )));
            }
        }

        if !self.artifact.url_template.contains(cache_const::ARCH_PLACEHOLDER) {
            return Err(ProvisionError::Config(format!(
                "artifact.url_template must contain {}",
                cache_const::ARCH_PLACEHOLDER
            )));
        }
        if !self
            .artifact
            .file_name_template
            .contains(cache_const::ARCH_PLACEHOLDER)
        {
            return Err(ProvisionError::Config(format!(
                "artifact.file_name_template must contain {}",
                cache_const::ARCH_PLACEHOLDER
            )));
        }

        self.chain.validate()
    }
}
