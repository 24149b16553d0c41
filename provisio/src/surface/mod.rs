//! Execution surface: where dispatched commands actually run.

mod local;

pub use local::LocalShellSurface;

use crate::correlator::{CommandRequest, CorrelationToken, ResultSender};
use provisio_shared::errors::ProvisionResult;

/// Opaque collaborator that runs shell commands out of band.
///
/// `submit` only hands the request off; the result comes back later through
/// `reply`, possibly more than once. Implementations never block on the
/// command itself.
pub trait ExecutionSurface: Send + Sync {
    /// Accept a command. Fails with `ProcessStartFailed` if it cannot be launched.
    fn submit(&self, request: CommandRequest, reply: ResultSender) -> ProvisionResult<()>;

    /// Best-effort termination of the command behind `token`.
    fn cancel(&self, token: CorrelationToken);
}
