// File: burst.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{
    CredentialMode, EngineCapabilities, EngineConfig, ScanConfig, Strategy, TestType,
};
use crate::errors::{ScanError, ScanResult};
use crate::probe::{elapsed_ms, ProbeExecutor, ProbeResult, ProbeTarget};
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::join_all;
use log::{debug, info, trace, warn};
use reqwest::{Body, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

type BodyChunk = Result<Bytes, std::io::Error>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HspaAggregates {
    pub protocol: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_requests: usize,
    pub timings: Vec<f64>,
}

/// All probe outcomes of one burst, in dispatch order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BurstResult {
    pub url: String,
    pub duration: f64,
    pub auth_mode: CredentialMode,
    pub strategy: Strategy,
    pub results: Vec<ProbeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hspa: Option<HspaAggregates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl BurstResult {
    pub fn new(
        test_type: TestType,
        config: &ScanConfig,
        strategy: Strategy,
        results: Vec<ProbeResult>,
        duration: f64,
    ) -> Self {
        let hspa = match test_type {
            TestType::Hspa => {
                let success_count = results.iter().filter(|r| r.ok).count();
                Some(HspaAggregates {
                    protocol: config.protocol().unwrap_or("unknown").to_string(),
                    success_count,
                    failure_count: results.len() - success_count,
                    total_requests: results.len(),
                    timings: results.iter().map(|r| r.duration).collect(),
                })
            }
            TestType::Toctou => None,
        };

        Self {
            url: config.url().to_string(),
            duration,
            auth_mode: config.credential_mode(),
            strategy,
            results,
            hspa,
            warnings: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> Vec<&ProbeResult> {
        self.results.iter().filter(|r| !r.ok).collect()
    }

    pub fn successes(&self) -> Vec<&ProbeResult> {
        self.results.iter().filter(|r| r.ok).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.ok).count()
    }

    pub fn success_count(&self) -> usize {
        self.total() - self.failure_count()
    }

    pub fn protocol(&self) -> &str {
        self.hspa
            .as_ref()
            .map(|h| h.protocol.as_str())
            .unwrap_or("unknown")
    }
}

/// Message handed from the probe engine to the analyzers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BurstSummary {
    pub test_type: TestType,
    pub result: BurstResult,
}

impl BurstSummary {
    pub fn new(test_type: TestType, result: BurstResult) -> Self {
        Self { test_type, result }
    }
}

/// Write side of one probe's streaming request body.
#[derive(Debug)]
pub struct HeldBody {
    index: usize,
    sender: UnboundedSender<BodyChunk>,
}

impl HeldBody {
    #[cfg(feature = "streaming")]
    pub fn channel(index: usize) -> (Self, Body) {
        let (held, receiver) = Self::pair(index);
        (held, Body::wrap_stream(receiver))
    }

    fn pair(index: usize) -> (Self, UnboundedReceiver<BodyChunk>) {
        let (sender, receiver) = unbounded();
        (Self { index, sender }, receiver)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn push(&self, chunk: Bytes) {
        if self.sender.unbounded_send(Ok(chunk)).is_err() {
            trace!("Probe {} stream already closed", self.index);
        }
    }

    fn finish(self, last: Bytes) {
        self.push(last);
        self.sender.close_channel();
    }
}

/// Writes the withheld byte and closes every stream, with no suspension
/// point between two probes.
pub fn release_all(held: Vec<HeldBody>, last: &Bytes) {
    for stream in held {
        stream.finish(last.clone());
    }
}

/// Splits a payload into everything but the final byte, and the final byte.
pub fn split_last_byte(payload: &[u8]) -> (Bytes, Bytes) {
    match payload.split_last() {
        Some((last, initial)) => (Bytes::copy_from_slice(initial), Bytes::copy_from_slice(&[*last])),
        None => (Bytes::new(), Bytes::new()),
    }
}

pub struct BurstScheduler {
    executor: ProbeExecutor,
    engine: EngineConfig,
    capabilities: EngineCapabilities,
}

impl BurstScheduler {
    pub fn new(engine: EngineConfig) -> ScanResult<Self> {
        let executor = ProbeExecutor::new(&engine)?;
        Ok(Self {
            executor,
            engine,
            capabilities: EngineCapabilities::detect(),
        })
    }

    pub fn with_capabilities(mut self, capabilities: EngineCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn executor(&self) -> &ProbeExecutor {
        &self.executor
    }

    /// Dispatches exactly `concurrency` probes and waits for all of them.
    pub async fn run(&self, test_type: TestType, config: &ScanConfig) -> ScanResult<BurstResult> {
        config.validate()?;

        let method = Method::from_bytes(config.method().as_bytes())
            .map_err(|_| ScanError::InvalidConfig(format!("invalid method {}", config.method())))?;
        if method != Method::GET {
            warn!(
                "Non-GET method ({}) requested for {} burst, make sure the endpoint is safe to replay",
                method, test_type
            );
        }

        let mut warnings = Vec::new();
        let strategy = self.effective_strategy(config.strategy(), &mut warnings);

        info!(
            "Starting {} burst: url={}, concurrency={}, auth={}, strategy={}",
            test_type,
            config.url(),
            config.concurrency(),
            config.credential_mode(),
            strategy
        );

        let started = Instant::now();
        let results = match strategy {
            Strategy::Standard => self.run_standard(test_type, config, method).await,
            Strategy::LastByteSync => self.run_last_byte_sync(test_type, config).await,
        };
        let duration = elapsed_ms(started);

        debug!(
            "{} burst finished in {:.2}ms, {} results",
            test_type,
            duration,
            results.len()
        );

        let mut burst = BurstResult::new(test_type, config, strategy, results, duration);
        burst.warnings = warnings;
        Ok(burst)
    }

    fn effective_strategy(&self, requested: Strategy, warnings: &mut Vec<String>) -> Strategy {
        if requested == Strategy::LastByteSync
            && !(self.capabilities.streaming_bodies && cfg!(feature = "streaming"))
        {
            let message =
                "Streaming request bodies are not supported here, falling back to standard strategy"
                    .to_string();
            warn!("{}", message);
            warnings.push(message);
            return Strategy::Standard;
        }
        requested
    }

    async fn run_standard(
        &self,
        test_type: TestType,
        config: &ScanConfig,
        method: Method,
    ) -> Vec<ProbeResult> {
        let body = config.custom_body().map(|b| Bytes::from(b.to_string()));
        let method = if body.is_some() { Method::POST } else { method };
        let target = Arc::new(ProbeTarget::from_config(test_type, config, method));
        let delay = Duration::from_millis(config.delay_ms());

        let mut handles = Vec::with_capacity(config.concurrency());
        for index in 0..config.concurrency() {
            if !delay.is_zero() && index > 0 {
                tokio::time::sleep(delay).await;
            }

            let executor = self.executor.clone();
            let target = Arc::clone(&target);
            let body = body.clone();
            handles.push(tokio::spawn(async move {
                executor.execute(index, &target, body.map(Body::from)).await
            }));
        }

        collect_results(handles).await
    }

    #[cfg(feature = "streaming")]
    async fn run_last_byte_sync(&self, test_type: TestType, config: &ScanConfig) -> Vec<ProbeResult> {
        let target = Arc::new(ProbeTarget::from_config(test_type, config, Method::POST));
        let payload = match config.custom_body() {
            Some(body) => body.as_bytes().to_vec(),
            None => vec![b'X'; self.engine.filler_size.max(1)],
        };
        let (initial, last) = split_last_byte(&payload);

        let mut held = Vec::with_capacity(config.concurrency());
        let mut handles = Vec::with_capacity(config.concurrency());
        for index in 0..config.concurrency() {
            let (stream, body) = HeldBody::channel(index);
            held.push(stream);

            let executor = self.executor.clone();
            let target = Arc::clone(&target);
            handles.push(tokio::spawn(async move {
                executor.execute(index, &target, Some(body)).await
            }));
        }

        if !initial.is_empty() {
            for stream in &held {
                stream.push(initial.clone());
            }
        }
        debug!(
            "[SPA] pushed {} initial bytes to {} streams",
            initial.len(),
            held.len()
        );

        tokio::time::sleep(self.engine.propagation_window).await;

        debug!("[SPA] releasing last byte to {} streams", held.len());
        release_all(held, &last);

        collect_results(handles).await
    }

    #[cfg(not(feature = "streaming"))]
    async fn run_last_byte_sync(&self, test_type: TestType, config: &ScanConfig) -> Vec<ProbeResult> {
        warn!("Built without streaming support, running standard strategy instead");
        self.run_standard(test_type, config, Method::POST).await
    }
}

/// Join barrier. Output order is dispatch order, whatever the completion order.
async fn collect_results(handles: Vec<JoinHandle<ProbeResult>>) -> Vec<ProbeResult> {
    join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| {
            joined.unwrap_or_else(|e| {
                warn!("Probe task {} did not complete: {}", index, e);
                ProbeResult::network_failure(index, 0.0, format!("Probe task failed: {}", e))
            })
        })
        .collect()
}
