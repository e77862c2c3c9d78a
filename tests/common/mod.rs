// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use webrace::burst::BurstScheduler;
use webrace::config::{EngineConfig, ScanConfig};
use webrace::finding::Finding;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn engine(timeout_ms: u64) -> EngineConfig {
    EngineConfig {
        probe_timeout: Duration::from_millis(timeout_ms),
        propagation_window: Duration::from_millis(50),
        ..Default::default()
    }
}

pub fn scheduler(timeout_ms: u64) -> BurstScheduler {
    BurstScheduler::new(engine(timeout_ms)).expect("client builds")
}

pub fn scan_config(server: &MockServer, path: &str, concurrency: usize) -> ScanConfig {
    let mut config = ScanConfig::new(&format!("{}{}", server.uri(), path));
    config.set_concurrency(concurrency);
    config
}

/// Probe index parsed back out of the cache-busting query parameter.
pub fn probe_index(request: &Request) -> Option<usize> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k.starts_with("_webrace_probe_"))
        .and_then(|(_, v)| v.split('_').next().and_then(|i| i.parse().ok()))
}

/// Answers later probes first: probe `i` of `n` is delayed `(n - i) * step`.
pub struct ReverseDelay {
    pub total: usize,
    pub step: Duration,
}

impl Respond for ReverseDelay {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let index = probe_index(request).unwrap_or(0);
        let delay = self.step * (self.total.saturating_sub(index)) as u32;
        ResponseTemplate::new(200)
            .set_body_string(format!("probe {}", index))
            .set_delay(delay)
    }
}

/// Inconsistent resource state: every other response shows a different body.
#[derive(Default)]
pub struct Alternating {
    counter: AtomicUsize,
}

impl Respond for Alternating {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_string(format!("{{\"stock\": {}}}", n % 2))
    }
}

pub fn rate_limited() -> ResponseTemplate {
    ResponseTemplate::new(429)
        .set_body_string("Too Many Requests")
        .append_header("retry-after", "30")
}

pub fn secure_headers(template: ResponseTemplate) -> ResponseTemplate {
    template
        .append_header("content-security-policy", "default-src 'self'; frame-ancestors 'none'")
        .append_header("strict-transport-security", "max-age=31536000")
}

/// Hashes listed in a race condition finding's details.
pub fn sample_hashes(finding: &Finding) -> Vec<&str> {
    finding
        .details
        .as_deref()
        .and_then(|d| d.split("Sample Hashes: ").nth(1))
        .map(|s| s.split(", ").collect())
        .unwrap_or_default()
}
