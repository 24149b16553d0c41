//! Local shell surface built on `tokio::process`.

use super::ExecutionSurface;
use crate::correlator::{CommandRequest, CommandResult, CorrelationToken, ResultSender};
use crate::util::kill_process_group;
use parking_lot::Mutex;
use provisio_shared::constants::chain as chain_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Error code reported when waiting on the child failed.
const ERR_WAIT_FAILED: i32 = 1;

/// Runs each request as `<shell> -c <command>` on the local host.
///
/// Each command leads its own process group so cancelling it also stops the
/// processes the shell spawned.
#[derive(Debug, Clone)]
pub struct LocalShellSurface {
    shell: String,
    running: Arc<Mutex<HashMap<CorrelationToken, u32>>>,
}

impl LocalShellSurface {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }
}

impl ExecutionSurface for LocalShellSurface {
    fn submit(&self, request: CommandRequest, reply: ResultSender) -> ProvisionResult<()> {
        let token = request.token;
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
            .map_err(|e| {
                ProvisionError::ProcessStartFailed(format!(
                    "{} in {}: {}",
                    self.shell,
                    request.workdir.display(),
                    e
                ))
            })?;

        if let Some(pid) = child.id() {
            tracing::debug!(token = %token, pid, "Spawned command");
            self.running.lock().insert(token, pid);
        }

        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let result = match child.wait_with_output().await {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    match (output.status.code(), output.status.signal()) {
                        (Some(code), _) => CommandResult::exited(code, stdout, stderr),
                        (None, signal) => {
                            let signal = signal.unwrap_or_default();
                            CommandResult {
                                stdout,
                                stderr,
                                exit_code: chain_const::UNKNOWN_EXIT_CODE,
                                error_code: Some(signal),
                                error_message: Some(format!("terminated by signal {}", signal)),
                            }
                        }
                    }
                }
                Err(e) => CommandResult::surface_error(ERR_WAIT_FAILED, e.to_string()),
            };

            running.lock().remove(&token);
            reply.deliver(result);
        });

        Ok(())
    }

    fn cancel(&self, token: CorrelationToken) {
        let pid = self.running.lock().remove(&token);
        if let Some(pid) = pid {
            tracing::info!(token = %token, pid, "Killing command");
            if !kill_process_group(pid) {
                tracing::warn!(token = %token, pid, "Failed to kill command");
            }
        }
    }
}
