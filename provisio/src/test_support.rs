//! In-memory fakes shared by unit tests.

use crate::correlator::{CommandRequest, CommandResult, CorrelationToken, ResultSender};
use crate::fetcher::{HttpResponse, HttpTransport};
use crate::ledger::Step;
use crate::orchestrator::ProvisionSink;
use crate::surface::ExecutionSurface;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Log callback plus the lines it collected.
pub(crate) fn collecting_log() -> (
    Arc<dyn Fn(&str) + Send + Sync>,
    Arc<Mutex<Vec<String>>>,
) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let log: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |line: &str| {
        sink.lock().push(line.to_string());
    });
    (log, lines)
}

/// In-memory gzip tarball holding `files`.
pub(crate) fn tarball_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Sink that keeps everything it receives.
#[derive(Default)]
pub(crate) struct RecordingSink {
    progress: Mutex<Vec<(Option<u8>, u64, Option<u64>)>>,
    logs: Mutex<Vec<String>>,
    steps: Mutex<Vec<Step>>,
}

impl RecordingSink {
    pub(crate) fn progress(&self) -> Vec<(Option<u8>, u64, Option<u64>)> {
        self.progress.lock().clone()
    }

    pub(crate) fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub(crate) fn steps(&self) -> Vec<Step> {
        self.steps.lock().clone()
    }
}

impl ProvisionSink for RecordingSink {
    fn on_progress(&self, percent: Option<u8>, transferred: u64, total: Option<u64>) {
        self.progress.lock().push((percent, transferred, total));
    }

    fn on_log(&self, line: &str) {
        self.logs.lock().push(line.to_string());
    }

    fn on_step_changed(&self, step: &Step) {
        self.steps.lock().push(step.clone());
    }
}

/// Serves fixed bodies with range support.
pub(crate) struct StaticTransport {
    bodies: Mutex<VecDeque<Vec<u8>>>,
    status: Option<u16>,
    truncate_next: Mutex<Option<usize>>,
    requests: Mutex<Vec<Option<u64>>>,
    gate: Option<Arc<Semaphore>>,
    announce_length: bool,
}

impl StaticTransport {
    fn build(bodies: Vec<Vec<u8>>, status: Option<u16>, gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(bodies.into()),
            status,
            truncate_next: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            gate,
            announce_length: true,
        })
    }

    pub(crate) fn serving(body: &[u8]) -> Arc<Self> {
        Self::build(vec![body.to_vec()], None, None)
    }

    /// Serve each body once in order; the last one repeats.
    pub(crate) fn serving_sequence(bodies: Vec<Vec<u8>>) -> Arc<Self> {
        Self::build(bodies, None, None)
    }

    /// Serve `body` without a Content-Length.
    pub(crate) fn serving_unsized(body: &[u8]) -> Arc<Self> {
        let mut transport = Self::build(vec![body.to_vec()], None, None);
        if let Some(inner) = Arc::get_mut(&mut transport) {
            inner.announce_length = false;
        }
        transport
    }

    pub(crate) fn failing_with(status: u16) -> Arc<Self> {
        Self::build(vec![Vec::new()], Some(status), None)
    }

    /// Each request waits for a permit on `gate`.
    pub(crate) fn gated(body: &[u8], gate: Arc<Semaphore>) -> Arc<Self> {
        Self::build(vec![body.to_vec()], None, Some(gate))
    }

    pub(crate) fn truncate_next_at(&self, len: usize) {
        *self.truncate_next.lock() = Some(len);
    }

    pub(crate) fn range_requests(&self) -> Vec<Option<u64>> {
        self.requests.lock().clone()
    }

    fn next_body(&self) -> Vec<u8> {
        let mut bodies = self.bodies.lock();
        if bodies.len() > 1 {
            bodies.pop_front().unwrap_or_default()
        } else {
            bodies.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl HttpTransport for StaticTransport {
    async fn get(&self, _url: &str, range_start: Option<u64>) -> ProvisionResult<HttpResponse> {
        self.requests.lock().push(range_start);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ProvisionError::download(e.to_string()))?;
            permit.forget();
        }

        if let Some(status) = self.status {
            return Ok(HttpResponse {
                status,
                content_length: None,
                body: futures::stream::empty().boxed(),
            });
        }

        let body = self.next_body();
        let (status, mut served) = match range_start {
            Some(start) if (start as usize) < body.len() => (206, body[start as usize..].to_vec()),
            _ => (200, body),
        };
        let content_length = self.announce_length.then_some(served.len() as u64);
        if let Some(len) = self.truncate_next.lock().take() {
            served.truncate(len);
        }

        let chunks: Vec<ProvisionResult<Vec<u8>>> =
            served.chunks(4).map(|c| Ok(c.to_vec())).collect();
        Ok(HttpResponse {
            status,
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Reply for commands containing `pattern`.
#[derive(Debug, Clone)]
pub(crate) struct SurfaceRule {
    pattern: String,
    result: CommandResult,
    deliveries: usize,
}

impl SurfaceRule {
    pub(crate) fn new(pattern: &str, result: CommandResult) -> Self {
        Self {
            pattern: pattern.to_string(),
            result,
            deliveries: 1,
        }
    }

    /// Deliver the same result `times` times, like a redelivering channel.
    pub(crate) fn delivered_times(mut self, times: usize) -> Self {
        self.deliveries = times;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceMode {
    Reply,
    Silent,
    Reject,
}

/// Execution surface answering from a rule table. First matching rule wins;
/// unmatched commands succeed with empty output.
pub(crate) struct ScriptedSurface {
    rules: Vec<SurfaceRule>,
    mode: SurfaceMode,
    commands: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<CorrelationToken>>,
}

impl ScriptedSurface {
    fn build(rules: Vec<SurfaceRule>, mode: SurfaceMode) -> Arc<Self> {
        Arc::new(Self {
            rules,
            mode,
            commands: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new(rules: Vec<SurfaceRule>) -> Arc<Self> {
        Self::build(rules, SurfaceMode::Reply)
    }

    /// Accepts commands and never answers.
    pub(crate) fn silent() -> Arc<Self> {
        Self::build(Vec::new(), SurfaceMode::Silent)
    }

    /// Refuses every submission.
    pub(crate) fn rejecting() -> Arc<Self> {
        Self::build(Vec::new(), SurfaceMode::Reject)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<CorrelationToken> {
        self.cancelled.lock().clone()
    }
}

impl ExecutionSurface for ScriptedSurface {
    fn submit(&self, request: CommandRequest, reply: ResultSender) -> ProvisionResult<()> {
        match self.mode {
            SurfaceMode::Reject => {
                return Err(ProvisionError::ProcessStartFailed("scripted rejection".into()));
            }
            SurfaceMode::Silent => {
                self.commands.lock().push(request.command);
                return Ok(());
            }
            SurfaceMode::Reply => {}
        }

        let rule = self
            .rules
            .iter()
            .find(|rule| request.command.contains(&rule.pattern))
            .cloned()
            .unwrap_or_else(|| SurfaceRule::new("", CommandResult::exited(0, "", "")));
        self.commands.lock().push(request.command);

        tokio::spawn(async move {
            for _ in 0..rule.deliveries {
                reply.deliver(rule.result.clone());
                tokio::task::yield_now().await;
            }
        });
        Ok(())
    }

    fn cancel(&self, token: CorrelationToken) {
        self.cancelled.lock().push(token);
    }
}
