// File: probe.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{CredentialMode, EngineConfig, ScanConfig, TestType};
use crate::errors::ScanResult;
use crate::fingerprint::{
    body_snippet, content_hash, extract_fingerprint_headers, is_text_like, FingerprintHeaders,
};
use log::{debug, trace};
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE};
use reqwest::{Body, Method};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::time::{Duration, Instant};

pub const TIMEOUT_ERROR: &str = "Request timed out";

/// Outcome of one dispatched request. `status == 0` means the request never
/// produced an HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub status: u16,
    pub ok: bool,
    pub duration: f64,
    pub hash: Option<String>,
    pub body_snippet: Option<String>,
    #[serde(default)]
    pub headers: FingerprintHeaders,
    pub error: Option<String>,
    pub index: usize,
}

impl ProbeResult {
    pub fn network_failure(index: usize, duration: f64, error: String) -> Self {
        Self {
            status: 0,
            ok: false,
            duration,
            hash: None,
            body_snippet: None,
            headers: FingerprintHeaders::new(),
            error: Some(error),
            index,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status == 0 && self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Everything a single probe needs to build its request.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub url: String,
    pub test_type: TestType,
    pub method: Method,
    pub credentials: CredentialMode,
    pub cookie: Option<String>,
    pub authorization: Option<String>,
}

impl ProbeTarget {
    pub fn from_config(test_type: TestType, config: &ScanConfig, method: Method) -> Self {
        Self {
            url: config.url().to_string(),
            test_type,
            method,
            credentials: config.credential_mode(),
            cookie: config.cookie().map(str::to_string),
            authorization: config.authorization().map(str::to_string),
        }
    }

    /// Target URL with a per-probe cache-busting parameter.
    pub fn probe_url(&self, index: usize) -> ScanResult<String> {
        let mut url = url::Url::parse(&self.url)?;
        url.query_pairs_mut().append_pair(
            &format!("_webrace_probe_{}", self.test_type),
            &format!("{}_{}", index, chrono::Utc::now().timestamp_millis()),
        );
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProbeExecutor {
    pub fn new(engine: &EngineConfig) -> ScanResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(engine.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(engine.max_redirects))
            .build()?;
        Ok(Self {
            client,
            timeout: engine.probe_timeout,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one probe to completion. Never fails: every outcome becomes a
    /// [`ProbeResult`].
    pub async fn execute(&self, index: usize, target: &ProbeTarget, body: Option<Body>) -> ProbeResult {
        let started = Instant::now();

        let url = match target.probe_url(index) {
            Ok(url) => url,
            Err(e) => return ProbeResult::network_failure(index, elapsed_ms(started), e.to_string()),
        };

        let mut request = self
            .client
            .request(target.method.clone(), &url)
            .header(CACHE_CONTROL, "no-store");

        if target.credentials == CredentialMode::Include {
            if let Some(cookie) = &target.cookie {
                request = request.header(COOKIE, cookie.as_str());
            }
            if let Some(authorization) = &target.authorization {
                request = request.header(AUTHORIZATION, authorization.as_str());
            }
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        trace!("Probe {} dispatching {} {}", index, target.method, url);

        let outcome = tokio::time::timeout(self.timeout, async {
            let response = request.send().await?;
            let duration = elapsed_ms(started);
            Ok::<_, reqwest::Error>(read_response(response, duration, index).await)
        })
        .await;

        match outcome {
            Ok(Ok(result)) => {
                trace!(
                    "Probe {} finished: status={} duration={:.2}ms",
                    index,
                    result.status,
                    result.duration
                );
                result
            }
            Ok(Err(e)) if e.is_timeout() => {
                debug!("Probe {} timed out in client", index);
                ProbeResult::network_failure(index, elapsed_ms(started), TIMEOUT_ERROR.to_string())
            }
            Ok(Err(e)) => {
                let message = error_chain(&e);
                debug!("Probe {} failed: {}", index, message);
                ProbeResult::network_failure(index, elapsed_ms(started), message)
            }
            Err(_) => {
                debug!("Probe {} exceeded {:?}", index, self.timeout);
                ProbeResult::network_failure(index, elapsed_ms(started), TIMEOUT_ERROR.to_string())
            }
        }
    }
}

async fn read_response(response: reqwest::Response, duration: f64, index: usize) -> ProbeResult {
    let status = response.status();
    let headers = extract_fingerprint_headers(response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).to_string());

    let mut hash = None;
    let mut snippet = None;

    if is_text_like(content_type.as_deref()) {
        match response.text().await {
            Ok(body) => {
                hash = content_hash(&body);
                snippet = Some(body_snippet(&body));
            }
            Err(e) => debug!("Probe {} could not read body: {}", index, e),
        }
    }

    ProbeResult {
        status: status.as_u16(),
        ok: status.is_success(),
        duration,
        hash,
        body_snippet: snippet,
        headers,
        error: None,
        index,
    }
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
