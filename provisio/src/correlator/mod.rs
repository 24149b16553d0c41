//! Asynchronous command correlation.
//!
//! Results from the execution surface arrive out of band, possibly more than
//! once and possibly after a timeout already fired. Each dispatch registers a
//! one-shot continuation under a fresh token; a delivery removes the entry
//! *before* resolving it, so a token resolves at most once and any later
//! delivery for it is an inert lookup miss.
//!
//! ```text
//! dispatch ──→ pending[token] = tx ──→ surface.submit(request, ResultSender{token})
//!                                                │
//! wait() ←── rx ←── pending.remove(token) ←──────┘ deliver(result)
//! ```

mod types;

pub use types::{CommandOutcome, CommandRequest, CommandResult, CorrelationToken};

use crate::surface::ExecutionSurface;
use chrono::Utc;
use parking_lot::Mutex;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

struct PendingCommand {
    command: String,
    issued_at: Instant,
    reply: oneshot::Sender<CommandOutcome>,
    timer: Option<AbortHandle>,
}

struct CorrelatorInner {
    next_token: AtomicU64,
    pending: Mutex<HashMap<CorrelationToken, PendingCommand>>,
    stale_deliveries: AtomicU64,
}

impl CorrelatorInner {
    fn resolve(&self, token: CorrelationToken, outcome: CommandOutcome) -> ProvisionResult<()> {
        let entry = self.pending.lock().remove(&token);
        let Some(entry) = entry else {
            self.stale_deliveries.fetch_add(1, Ordering::Relaxed);
            return Err(ProvisionError::UnknownCorrelationToken(token.as_u64()));
        };
        if let Some(timer) = &entry.timer {
            timer.abort();
        }

        tracing::debug!(
            token = %token,
            command = %entry.command,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            outcome = outcome_label(&outcome),
            "Resolving command"
        );
        if entry.reply.send(outcome).is_err() {
            tracing::debug!(token = %token, "Command waiter already gone");
        }
        Ok(())
    }
}

fn outcome_label(outcome: &CommandOutcome) -> &'static str {
    match outcome {
        CommandOutcome::Completed(_) => "completed",
        CommandOutcome::TimedOut => "timed_out",
        CommandOutcome::Cancelled => "cancelled",
    }
}

/// Delivery channel handed to the surface together with a request.
///
/// Cloneable and safe to invoke any number of times; only the first delivery
/// for its token has an effect.
#[derive(Clone)]
pub struct ResultSender {
    token: CorrelationToken,
    inner: Weak<CorrelatorInner>,
}

impl std::fmt::Debug for ResultSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSender")
            .field("token", &self.token)
            .finish()
    }
}

impl ResultSender {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Deliver `result`. Returns whether it resolved a pending continuation.
    pub fn deliver(&self, result: CommandResult) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            tracing::debug!(token = %self.token, "Correlator dropped, discarding result");
            return false;
        };
        deliver_to(&inner, self.token, result).is_ok()
    }
}

fn deliver_to(
    inner: &CorrelatorInner,
    token: CorrelationToken,
    result: CommandResult,
) -> ProvisionResult<()> {
    inner
        .resolve(token, CommandOutcome::Completed(result))
        .inspect_err(|e| tracing::debug!(token = %token, "Dropping result: {}", e))
}

/// Handle to await the outcome of one dispatched command.
#[derive(Debug)]
pub struct PendingResult {
    token: CorrelationToken,
    rx: oneshot::Receiver<CommandOutcome>,
}

impl PendingResult {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub async fn wait(self) -> CommandOutcome {
        self.rx.await.unwrap_or(CommandOutcome::Cancelled)
    }
}

/// Matches asynchronously delivered results to the commands that requested them.
#[derive(Clone)]
pub struct CommandCorrelator {
    inner: Arc<CorrelatorInner>,
    surface: Arc<dyn ExecutionSurface>,
}

impl std::fmt::Debug for CommandCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl CommandCorrelator {
    pub fn new(surface: Arc<dyn ExecutionSurface>) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                next_token: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                stale_deliveries: AtomicU64::new(0),
            }),
            surface,
        }
    }

    /// Register a continuation and hand `command` to the surface.
    ///
    /// A surface that rejects the submission leaves nothing pending.
    pub fn dispatch(
        &self,
        command: impl Into<String>,
        workdir: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
    ) -> ProvisionResult<PendingResult> {
        let token = CorrelationToken(self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        let command = command.into();
        let (tx, rx) = oneshot::channel();

        self.inner.pending.lock().insert(
            token,
            PendingCommand {
                command: command.clone(),
                issued_at: Instant::now(),
                reply: tx,
                timer: None,
            },
        );

        let request = CommandRequest {
            token,
            command,
            workdir: workdir.into(),
            env,
            issued_at: Utc::now(),
        };
        tracing::debug!(token = %token, command = %request.command, "Dispatching command");

        let reply = ResultSender {
            token,
            inner: Arc::downgrade(&self.inner),
        };
        if let Err(e) = self.surface.submit(request, reply) {
            self.inner.pending.lock().remove(&token);
            tracing::warn!(token = %token, "Surface rejected command: {}", e);
            return Err(e);
        }

        Ok(PendingResult { token, rx })
    }

    /// Resolve `token` with `result`.
    ///
    /// Unknown or already-resolved tokens yield `UnknownCorrelationToken`, which
    /// callers log and drop.
    pub fn on_result_delivered(
        &self,
        token: CorrelationToken,
        result: CommandResult,
    ) -> ProvisionResult<()> {
        deliver_to(&self.inner, token, result)
    }

    /// Resolve `token` with `TimedOut` unless a result arrives within `after`.
    ///
    /// The timer is aborted as soon as the token resolves some other way.
    pub fn timeout(&self, token: CorrelationToken, after: Duration) {
        let inner = Arc::downgrade(&self.inner);
        let surface = Arc::clone(&self.surface);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.resolve(token, CommandOutcome::TimedOut).is_ok() {
                tracing::warn!(token = %token, timeout_secs = after.as_secs(), "Command timed out");
                surface.cancel(token);
            }
        })
        .abort_handle();

        let mut pending = self.inner.pending.lock();
        match pending.get_mut(&token) {
            Some(entry) => {
                if let Some(previous) = entry.timer.replace(timer) {
                    previous.abort();
                }
            }
            None => timer.abort(),
        }
    }

    /// Dispatch and wait, with an optional timeout.
    pub async fn run(
        &self,
        command: impl Into<String>,
        workdir: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> ProvisionResult<CommandOutcome> {
        let pending = self.dispatch(command, workdir, env)?;
        if let Some(after) = timeout {
            self.timeout(pending.token(), after);
        }
        Ok(pending.wait().await)
    }

    /// Evict `token`, resolving its waiter with `Cancelled` and stopping the process.
    pub fn evict(&self, token: CorrelationToken) -> bool {
        let evicted = self.inner.resolve(token, CommandOutcome::Cancelled).is_ok();
        if evicted {
            self.surface.cancel(token);
        }
        evicted
    }

    /// Evict every pending token. Returns how many were evicted.
    pub fn evict_all(&self) -> usize {
        let tokens: Vec<CorrelationToken> = self.inner.pending.lock().keys().copied().collect();
        tokens.into_iter().filter(|token| self.evict(*token)).count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Deliveries dropped because their token was unknown or already resolved.
    pub fn stale_deliveries(&self) -> u64 {
        self.inner.stale_deliveries.load(Ordering::Relaxed)
    }
}
