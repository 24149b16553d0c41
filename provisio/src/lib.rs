//! Provisio: provisions a self-contained runtime prefix.
//!
//! A session walks a fixed list of steps: detect the host architecture,
//! fetch and verify a bootstrap artifact, install it into a prefix, then
//! install dependencies by running commands on an execution surface whose
//! results arrive asynchronously.
//!
//! ```ignore
//! let options = ProvisionOptions::load(Path::new("provisio.json"))?;
//! let orchestrator = ProvisioningOrchestrator::builder(options).build()?;
//! match orchestrator.start().await {
//!     Some(SessionOutcome::Completed) => {}
//!     other => eprintln!("provisioning did not complete: {:?}", other),
//! }
//! ```

pub mod chain;
pub mod config;
pub mod correlator;
pub mod fetcher;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod surface;
pub mod util;

#[cfg(test)]
mod test_support;

pub use chain::{ChainConfig, ChainPhase, DependencyInstallChain, InstallChainState};
pub use config::{ArtifactConfig, ProvisionOptions};
pub use correlator::{CommandCorrelator, CommandOutcome, CommandResult, CorrelationToken};
pub use fetcher::{ArchitectureTag, ArtifactFetcher, CachedArtifact, DownloadProgress};
pub use ledger::{Step, StepAction, StepId, StepLedger, StepStatus};
pub use logging::init_logging;
pub use orchestrator::{
    NullSink, OrchestratorBuilder, ProvisionSink, ProvisioningOrchestrator, RunState,
    SessionOutcome, TracingSink,
};
pub use surface::{ExecutionSurface, LocalShellSurface};

pub use provisio_shared::{ErrorKind, ProvisionError, ProvisionResult};
