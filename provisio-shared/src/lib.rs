//! Types shared between the provisio library and its tooling.

pub mod constants;
pub mod errors;

pub use errors::{ErrorKind, ProvisionError, ProvisionResult};
