//! Dependency install chain.
//!
//! ```text
//! CheckingTool ──present──────────────────────┐
//!      │ absent                               ▼
//!      └──→ InstallingTool ──ok (primary|fallback)──→ VerifyingLibraries
//!                 │ both fail                         │ (best-effort)
//!                 ▼                                   ▼
//!          ToolInstallFailed                   InstallingTarget ──fail──→ TargetInstallFailed
//!                                                     │
//!                                                     ▼
//!                                                 Verifying ──fail──→ VerificationFailed
//!                                                     │
//!                                                     ▼
//!                                                 Completed
//! ```
//!
//! Exactly one command is in flight at a time.

mod commands;

pub use commands::{ChainConfig, failure_excerpt};

use crate::correlator::{CommandCorrelator, CommandOutcome, CommandResult};
use crate::util::normalize_non_interactive;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Named phases of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainPhase {
    CheckingTool,
    InstallingTool,
    VerifyingLibraries,
    InstallingTarget,
    Verifying,
    Completed,
}

/// Transient state, rebuilt on every chain run.
#[derive(Debug, Clone)]
pub struct InstallChainState {
    pub phase: ChainPhase,
    pub pending_artifact_path: Option<PathBuf>,
    pub last_outcome: Option<CommandOutcome>,
    /// Phases entered, in order.
    pub visited: Vec<ChainPhase>,
}

impl InstallChainState {
    fn new(pending_artifact_path: Option<PathBuf>) -> Self {
        Self {
            phase: ChainPhase::CheckingTool,
            pending_artifact_path,
            last_outcome: None,
            visited: Vec::new(),
        }
    }
}

/// Where chain commands run.
#[derive(Debug, Clone)]
pub struct ChainEnvironment {
    pub prefix: PathBuf,
    pub home: PathBuf,
}

impl ChainEnvironment {
    /// Environment overrides: `PREFIX`, `HOME`, and `PATH` with the prefix first.
    pub fn vars(&self) -> BTreeMap<String, String> {
        let bin = self.prefix.join("bin");
        let path = match std::env::var("PATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", bin.display(), existing),
            _ => format!("{}:/usr/bin:/bin", bin.display()),
        };

        let mut vars = BTreeMap::new();
        vars.insert("PREFIX".to_string(), self.prefix.display().to_string());
        vars.insert("HOME".to_string(), self.home.display().to_string());
        vars.insert("PATH".to_string(), path);
        vars
    }
}

/// Walks the tool → libraries → target → verify sequence over the correlator.
#[derive(Debug, Clone)]
pub struct DependencyInstallChain {
    config: ChainConfig,
    correlator: CommandCorrelator,
    env: ChainEnvironment,
}

impl DependencyInstallChain {
    pub fn new(config: ChainConfig, correlator: CommandCorrelator, env: ChainEnvironment) -> Self {
        Self {
            config,
            correlator,
            env,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Run the chain to completion or to its first hard failure.
    pub async fn run(&self, log: &(dyn Fn(&str) + Send + Sync)) -> ProvisionResult<InstallChainState> {
        tokio::fs::create_dir_all(&self.env.home).await?;

        let artifact = self.staged_artifact(log);
        let mut state = InstallChainState::new(artifact);

        loop {
            state.visited.push(state.phase);
            let next = match state.phase {
                ChainPhase::CheckingTool => self.check_tool(&mut state, log).await?,
                ChainPhase::InstallingTool => self.install_tool(&mut state, log).await?,
                ChainPhase::VerifyingLibraries => self.verify_libraries(&mut state, log).await?,
                ChainPhase::InstallingTarget => self.install_target(&mut state, log).await?,
                ChainPhase::Verifying => self.verify(&mut state, log).await?,
                ChainPhase::Completed => {
                    log("Dependency installation complete");
                    return Ok(state);
                }
            };
            tracing::debug!(from = ?state.phase, to = ?next, "Install chain transition");
            state.phase = next;
        }
    }

    fn staged_artifact(&self, log: &(dyn Fn(&str) + Send + Sync)) -> Option<PathBuf> {
        let path = self.config.target_artifact.as_ref()?;
        if path.is_file() {
            Some(path.clone())
        } else {
            log(&format!(
                "Target artifact {} not found, installing from index only",
                path.display()
            ));
            None
        }
    }

    async fn check_tool(
        &self,
        state: &mut InstallChainState,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<ChainPhase> {
        let result = self.execute(state, &self.config.tool_probe, log).await?;
        if self.config.tool_present(&result) {
            log("Package manager already available, skipping tool install");
            Ok(ChainPhase::VerifyingLibraries)
        } else {
            log("Package manager not found, installing");
            Ok(ChainPhase::InstallingTool)
        }
    }

    async fn install_tool(
        &self,
        state: &mut InstallChainState,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<ChainPhase> {
        let primary = self
            .execute(state, &self.config.tool_install_primary, log)
            .await?;
        if primary.succeeded() {
            return Ok(ChainPhase::VerifyingLibraries);
        }

        let Some(fallback) = self.config.tool_install_fallback.as_deref() else {
            return Err(tool_install_failed(&primary));
        };

        log(&format!(
            "Primary tool install failed (exit code {}), retrying with reduced package set",
            primary.exit_code
        ));
        let fallback = self.execute(state, fallback, log).await?;
        if fallback.succeeded() {
            Ok(ChainPhase::VerifyingLibraries)
        } else {
            Err(tool_install_failed(&fallback))
        }
    }

    async fn verify_libraries(
        &self,
        state: &mut InstallChainState,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<ChainPhase> {
        let Some(probe) = self.config.library_probe.as_deref() else {
            return Ok(ChainPhase::InstallingTarget);
        };

        match self.execute(state, probe, log).await {
            Ok(result) if self.config.libraries_present(&result) => {
                log("Optional native libraries available");
            }
            Ok(_) => {
                log("Optional native libraries missing, target install will build them");
            }
            Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
            Err(e) => {
                tracing::warn!("Library probe failed: {}", e);
                log(&format!("Library probe failed: {}", e));
            }
        }
        Ok(ChainPhase::InstallingTarget)
    }

    async fn install_target(
        &self,
        state: &mut InstallChainState,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<ChainPhase> {
        let command = self
            .config
            .target_command(state.pending_artifact_path.as_deref());
        let result = self.execute(state, &command, log).await?;
        if result.succeeded() {
            Ok(ChainPhase::Verifying)
        } else {
            Err(ProvisionError::TargetInstallFailed {
                exit_code: result.exit_code,
                stderr_excerpt: failure_excerpt(&result),
            })
        }
    }

    async fn verify(
        &self,
        state: &mut InstallChainState,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<ChainPhase> {
        let result = self.execute(state, &self.config.verify_command, log).await?;
        if self.config.verified(&result) {
            Ok(ChainPhase::Completed)
        } else {
            Err(ProvisionError::VerificationFailed(format!(
                "exit code {}, expected '{}' in output: {}",
                result.exit_code,
                self.config.verify_success_marker,
                failure_excerpt(&result)
            )))
        }
    }

    /// Run one command through the correlator and unwrap its outcome.
    async fn execute(
        &self,
        state: &mut InstallChainState,
        command: &str,
        log: &(dyn Fn(&str) + Send + Sync),
    ) -> ProvisionResult<CommandResult> {
        let command = normalize_non_interactive(command);
        log(&format!("$ {}", command));

        let outcome = self
            .correlator
            .run(
                command.clone(),
                self.env.home.clone(),
                self.env.vars(),
                self.config.command_timeout(),
            )
            .await?;
        state.last_outcome = Some(outcome.clone());

        match outcome {
            CommandOutcome::Completed(result) => {
                log_output(&result, log);
                Ok(result)
            }
            CommandOutcome::TimedOut => Err(ProvisionError::TimedOut(format!(
                "command did not finish: {}",
                command
            ))),
            CommandOutcome::Cancelled => Err(ProvisionError::Cancelled),
        }
    }

    pub fn home(&self) -> &Path {
        &self.env.home
    }
}

fn tool_install_failed(result: &CommandResult) -> ProvisionError {
    ProvisionError::ToolInstallFailed {
        exit_code: result.exit_code,
        stderr_excerpt: failure_excerpt(result),
    }
}

fn log_output(result: &CommandResult, log: &(dyn Fn(&str) + Send + Sync)) {
    for line in result.stdout.lines().chain(result.stderr.lines()) {
        if !line.trim().is_empty() {
            log(line);
        }
    }
    if let Some(message) = &result.error_message {
        log(message);
    }
    log(&format!("exit code {}", result.exit_code));
}
