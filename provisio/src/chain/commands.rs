//! Commands and sentinel heuristics of the install chain.
//!
//! The execution surface only reports exit codes and raw text, so tool
//! presence and success are inferred from substrings. Every sentinel lives
//! here and is configurable; call sites never match text themselves.

use crate::correlator::CommandResult;
use provisio_shared::constants::chain as chain_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult, excerpt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Commands and sentinels driving [`super::DependencyInstallChain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Shell used to run each command (`<shell> -c <command>`).
    pub shell: String,
    /// Per-command timeout; `None` waits forever.
    pub command_timeout_secs: Option<u64>,

    pub tool_probe: String,
    /// Matched against probe stdout.
    pub tool_not_found_sentinels: Vec<String>,
    /// Matched against probe stderr.
    pub module_missing_sentinels: Vec<String>,

    pub tool_install_primary: String,
    /// Narrower install attempted when the primary exits non-zero.
    pub tool_install_fallback: Option<String>,

    pub library_probe: Option<String>,
    pub library_missing_sentinels: Vec<String>,

    /// Run before the target install, joined with `&&`.
    pub target_prelude: Vec<String>,
    /// Installs the pre-staged artifact; `{artifact}` is replaced by its path.
    pub target_artifact_install: String,
    pub target_install: String,
    pub target_artifact: Option<PathBuf>,

    pub verify_command: String,
    pub verify_success_marker: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            command_timeout_secs: Some(chain_const::DEFAULT_COMMAND_TIMEOUT_SECS),
            tool_probe: "python -m pip --version 2>&1 || echo 'PIP_NOT_FOUND'".to_string(),
            tool_not_found_sentinels: vec!["PIP_NOT_FOUND".to_string()],
            module_missing_sentinels: vec!["No module named pip".to_string()],
            tool_install_primary: "pkg install -y python-pip autoconf automake libtool make \
                clang cmake patchelf python-numpy python-pandas python-scipy \
                python-scikit-learn python-cryptography python-lxml python-pillow"
                .to_string(),
            tool_install_fallback: Some(
                "pkg install -y python-pip autoconf automake libtool make clang cmake patchelf"
                    .to_string(),
            ),
            library_probe: Some(
                "python -c \"import numpy; import pandas; print('numpy and pandas available')\" \
                2>&1 || echo 'NUMPY_PANDAS_NOT_FOUND'"
                    .to_string(),
            ),
            library_missing_sentinels: vec![
                "NUMPY_PANDAS_NOT_FOUND".to_string(),
                "No module named".to_string(),
            ],
            target_prelude: vec!["python -m pip install --upgrade pip wheel setuptools".to_string()],
            target_artifact_install: "python -m pip install \"{artifact}\"".to_string(),
            target_install: "python -m pip install --prefer-binary \"droidrun[google]\"".to_string(),
            target_artifact: None,
            verify_command: "python -c \"import droidrun; print('droidrun installed successfully')\""
                .to_string(),
            verify_success_marker: "droidrun installed successfully".to_string(),
        }
    }
}

fn contains_any(text: &str, sentinels: &[String]) -> bool {
    sentinels
        .iter()
        .any(|s| !s.is_empty() && text.contains(s.as_str()))
}

impl ChainConfig {
    pub fn validate(&self) -> ProvisionResult<()> {
        for (name, value) in [
            ("shell", &self.shell),
            ("tool_probe", &self.tool_probe),
            ("tool_install_primary", &self.tool_install_primary),
            ("target_install", &self.target_install),
            ("verify_command", &self.verify_command),
            ("verify_success_marker", &self.verify_success_marker),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::Config(format!("chain.{} must not be empty", name)));
            }
        }
        Ok(())
    }

    /// Tool probe passed: exit 0 and no "not found" / "module missing" sentinel.
    pub fn tool_present(&self, result: &CommandResult) -> bool {
        result.succeeded()
            && !contains_any(&result.stdout, &self.tool_not_found_sentinels)
            && !contains_any(&result.stderr, &self.module_missing_sentinels)
    }

    pub fn libraries_present(&self, result: &CommandResult) -> bool {
        result.succeeded()
            && !contains_any(&result.stdout, &self.library_missing_sentinels)
            && !contains_any(&result.stderr, &self.library_missing_sentinels)
    }

    /// Smoke test passed: exit 0 and the success marker on stdout.
    pub fn verified(&self, result: &CommandResult) -> bool {
        result.succeeded() && result.stdout.contains(&self.verify_success_marker)
    }

    /// Full target install command, including the artifact when present.
    pub fn target_command(&self, artifact: Option<&Path>) -> String {
        let mut parts: Vec<String> = self
            .target_prelude
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .collect();
        if let Some(artifact) = artifact {
            parts.push(
                self.target_artifact_install
                    .replace("{artifact}", &artifact.to_string_lossy()),
            );
        }
        parts.push(self.target_install.clone());
        parts.join(" && ")
    }

    pub fn command_timeout(&self) -> Option<std::time::Duration> {
        self.command_timeout_secs
            .map(std::time::Duration::from_secs)
    }
}

/// Short diagnostic text for a failed command.
pub fn failure_excerpt(result: &CommandResult) -> String {
    let text = match &result.error_message {
        Some(message) => message.as_str(),
        None if !result.stderr.trim().is_empty() => result.stderr.trim(),
        None => result.stdout.trim(),
    };
    excerpt(text, chain_const::STDERR_EXCERPT_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_present_on_clean_probe() {
        let config = ChainConfig::default();
        assert!(config.tool_present(&CommandResult::exited(0, "pip 23.0", "")));
    }

    #[test]
    fn test_tool_absent_on_sentinels() {
        let config = ChainConfig::default();
        assert!(!config.tool_present(&CommandResult::exited(0, "PIP_NOT_FOUND\n", "")));
        assert!(!config.tool_present(&CommandResult::exited(
            0,
            "",
            "/usr/bin/python: No module named pip"
        )));
        assert!(!config.tool_present(&CommandResult::exited(127, "pip 23.0", "")));
        assert!(!config.tool_present(&CommandResult::surface_error(5, "lost session")));
    }

    #[test]
    fn test_sentinels_are_configurable() {
        let config = ChainConfig {
            tool_not_found_sentinels: vec!["MISSING".into()],
            ..Default::default()
        };
        assert!(config.tool_present(&CommandResult::exited(0, "PIP_NOT_FOUND", "")));
        assert!(!config.tool_present(&CommandResult::exited(0, "MISSING", "")));
    }

    #[test]
    fn test_verified_requires_marker() {
        let config = ChainConfig::default();
        assert!(config.verified(&CommandResult::exited(
            0,
            "droidrun installed successfully\n",
            ""
        )));
        assert!(!config.verified(&CommandResult::exited(0, "", "")));
    }

    #[test]
    fn test_target_command_with_artifact() {
        let config = ChainConfig::default();
        let command = config.target_command(Some(Path::new("/home/pkg.whl")));
        assert_eq!(
            command,
            "python -m pip install --upgrade pip wheel setuptools && \
             python -m pip install \"/home/pkg.whl\" && \
             python -m pip install --prefer-binary \"droidrun[google]\""
        );
        assert!(!config.target_command(None).contains(".whl"));
    }

    #[test]
    fn test_failure_excerpt_is_bounded() {
        let long = "e".repeat(2000);
        let result = CommandResult::exited(1, "", long);
        assert_eq!(failure_excerpt(&result).len(), chain_const::STDERR_EXCERPT_CHARS);

        let result = CommandResult::exited(1, "only stdout", "");
        assert_eq!(failure_excerpt(&result), "only stdout");
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let config = ChainConfig {
            verify_command: " ".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ProvisionError::Config(_))));
    }
}
