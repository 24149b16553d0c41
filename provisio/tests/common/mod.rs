//! Fakes shared by integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use provisio::correlator::{CommandRequest, CommandResult, CorrelationToken, ResultSender};
use provisio::fetcher::{HttpResponse, HttpTransport};
use provisio::{ExecutionSurface, ProvisionOptions, ProvisionResult};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Options rooted at `base` for an arm64 host with one checksum configured.
pub fn create_test_options(base: &Path, checksum: &str) -> ProvisionOptions {
    let mut options = ProvisionOptions::with_base_dir(base);
    options.artifact.url_template = "https://mirror.test/{version}/bootstrap-{arch}.tar.gz".into();
    options.artifact.abi_overrides = vec!["arm64".into()];
    options
        .artifact
        .checksums
        .insert("aarch64".into(), checksum.into());
    options
}

/// Serves bodies in order; the last one repeats. Honors range requests.
pub struct SequenceTransport {
    bodies: Mutex<VecDeque<Vec<u8>>>,
    truncate_next: Mutex<Option<usize>>,
    requests: Mutex<Vec<(String, Option<u64>)>>,
}

impl SequenceTransport {
    pub fn new(bodies: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(bodies.into()),
            truncate_next: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn truncate_next_at(&self, len: usize) {
        *self.truncate_next.lock() = Some(len);
    }

    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for SequenceTransport {
    async fn get(&self, url: &str, range_start: Option<u64>) -> ProvisionResult<HttpResponse> {
        self.requests.lock().push((url.to_string(), range_start));
        let body = {
            let mut bodies = self.bodies.lock();
            if bodies.len() > 1 {
                bodies.pop_front().unwrap_or_default()
            } else {
                bodies.front().cloned().unwrap_or_default()
            }
        };

        let (status, mut served) = match range_start {
            Some(start) if (start as usize) < body.len() => (206, body[start as usize..].to_vec()),
            _ => (200, body),
        };
        let content_length = Some(served.len() as u64);
        if let Some(len) = self.truncate_next.lock().take() {
            served.truncate(len);
        }

        let chunks: Vec<ProvisionResult<Vec<u8>>> =
            served.chunks(16).map(|c| Ok(c.to_vec())).collect();
        Ok(HttpResponse {
            status,
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Answers each command from a rule table, redelivering every result
/// `deliveries` times the way a broadcast channel might.
pub struct BroadcastSurface {
    rules: Vec<(String, CommandResult)>,
    deliveries: usize,
    commands: Mutex<Vec<String>>,
}

impl BroadcastSurface {
    pub fn new(rules: Vec<(&str, CommandResult)>, deliveries: usize) -> Arc<Self> {
        Arc::new(Self {
            rules: rules
                .into_iter()
                .map(|(pattern, result)| (pattern.to_string(), result))
                .collect(),
            deliveries,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl ExecutionSurface for BroadcastSurface {
    fn submit(&self, request: CommandRequest, reply: ResultSender) -> ProvisionResult<()> {
        let result = self
            .rules
            .iter()
            .find(|(pattern, _)| request.command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| CommandResult::exited(0, "", ""));
        self.commands.lock().push(request.command);

        let deliveries = self.deliveries;
        tokio::spawn(async move {
            for _ in 0..deliveries {
                reply.deliver(result.clone());
                tokio::task::yield_now().await;
            }
        });
        Ok(())
    }

    fn cancel(&self, _token: CorrelationToken) {}
}

/// Keeps every request; the test delivers results by hand.
#[derive(Default)]
pub struct HeldSurface {
    held: Mutex<Vec<(CommandRequest, ResultSender)>>,
    cancelled: Mutex<Vec<CorrelationToken>>,
}

impl HeldSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn held(&self) -> Vec<(CommandRequest, ResultSender)> {
        self.held.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<CorrelationToken> {
        self.cancelled.lock().clone()
    }
}

impl ExecutionSurface for HeldSurface {
    fn submit(&self, request: CommandRequest, reply: ResultSender) -> ProvisionResult<()> {
        self.held.lock().push((request, reply));
        Ok(())
    }

    fn cancel(&self, token: CorrelationToken) {
        self.cancelled.lock().push(token);
    }
}
