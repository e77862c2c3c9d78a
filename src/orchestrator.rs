// File: orchestrator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::analyzers::analyze_summary;
use crate::burst::{BurstScheduler, BurstSummary};
use crate::config::{CredentialMode, ScanConfig, TestType};
use crate::errors::ScanResult;
use crate::finding::{Finding, FindingSink};
use crate::passive::{observe, TlsObservation};
use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, COOKIE};
use reqwest::Version;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOCTOU_CONCURRENCY: usize = 15;
pub const DEFAULT_HSPA_CONCURRENCY: usize = 100;
pub const UNKNOWN_PROTOCOL: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ActiveScanOptions {
    pub enabled: bool,
    pub toctou_concurrency: usize,
    pub hspa_concurrency: usize,
    pub passive_checks: bool,
}

impl Default for ActiveScanOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            toctou_concurrency: DEFAULT_TOCTOU_CONCURRENCY,
            hspa_concurrency: DEFAULT_HSPA_CONCURRENCY,
            passive_checks: true,
        }
    }
}

/// Everything one scan of a target produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub target: String,
    pub protocol: String,
    pub skipped: bool,
    pub findings: Vec<Finding>,
    pub summaries: Vec<BurstSummary>,
    pub warnings: Vec<String>,
}

impl ScanOutcome {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            protocol: UNKNOWN_PROTOCOL.to_string(),
            ..Default::default()
        }
    }
}

/// Label of a negotiated HTTP version, as an ALPN-style identifier.
pub fn protocol_label(version: Version) -> &'static str {
    if version == Version::HTTP_2 {
        "h2"
    } else if version == Version::HTTP_3 {
        "h3"
    } else if version == Version::HTTP_10 {
        "http/1.0"
    } else if version == Version::HTTP_09 {
        "http/0.9"
    } else {
        "http/1.1"
    }
}

pub fn supports_multiplexing(protocol: &str) -> bool {
    protocol.starts_with("h2") || protocol.starts_with("h3")
}

/// Runs the passive checks and both burst scenarios against one target.
pub struct ActiveScan {
    scheduler: BurstScheduler,
    options: ActiveScanOptions,
}

impl ActiveScan {
    pub fn new(scheduler: BurstScheduler, options: ActiveScanOptions) -> Self {
        Self { scheduler, options }
    }

    pub fn options(&self) -> &ActiveScanOptions {
        &self.options
    }

    pub async fn run<S: FindingSink + ?Sized>(
        &self,
        base: &ScanConfig,
        sink: &mut S,
    ) -> ScanResult<ScanOutcome> {
        base.validate()?;

        let target = base.url().to_string();
        let mut outcome = ScanOutcome::new(&target);

        if !self.options.enabled && !self.options.passive_checks {
            info!("Active scanning is disabled, skipping {}", target);
            outcome.skipped = true;
            return Ok(outcome);
        }

        sink.reset(&target);

        let protocol = match self.baseline(base).await {
            Ok((protocol, passive)) => {
                for finding in passive {
                    Self::emit(sink, &mut outcome, finding);
                }
                protocol
            }
            Err(e) => {
                let message = format!("Baseline request to {} failed: {}", target, e);
                warn!("{}", message);
                outcome.warnings.push(message);
                UNKNOWN_PROTOCOL.to_string()
            }
        };
        outcome.protocol = protocol.clone();

        if !self.options.enabled {
            info!("Active scanning is disabled, passive checks only for {}", target);
            outcome.skipped = true;
            return Ok(outcome);
        }

        info!(
            "[Active Scan] Initiating scan for: {} (Protocol: {}, AuthMode: {})",
            target,
            protocol,
            base.credential_mode()
        );

        let mut toctou = base.clone();
        toctou.set_concurrency(self.options.toctou_concurrency);
        self.scenario(TestType::Toctou, &toctou, sink, &mut outcome)
            .await?;

        if supports_multiplexing(&protocol) {
            let mut hspa = base.clone();
            hspa.set_concurrency(self.options.hspa_concurrency);
            hspa.set_protocol(Some(protocol));
            self.scenario(TestType::Hspa, &hspa, sink, &mut outcome)
                .await?;
        } else {
            debug!("Protocol {} is not multiplexed, skipping HSPA", protocol);
        }

        Ok(outcome)
    }

    async fn scenario<S: FindingSink + ?Sized>(
        &self,
        test_type: TestType,
        config: &ScanConfig,
        sink: &mut S,
        outcome: &mut ScanOutcome,
    ) -> ScanResult<()> {
        let burst = self.scheduler.run(test_type, config).await?;
        outcome.warnings.extend(burst.warnings.iter().cloned());

        let summary = BurstSummary::new(test_type, burst);
        let findings = analyze_summary(&summary);
        debug!("{} analysis produced {} findings", test_type, findings.len());

        for finding in findings {
            Self::emit(sink, outcome, finding);
        }
        outcome.summaries.push(summary);
        Ok(())
    }

    /// Single request that stands in for the page load: passive findings plus
    /// the negotiated protocol.
    async fn baseline(&self, config: &ScanConfig) -> ScanResult<(String, Vec<Finding>)> {
        let executor = self.scheduler.executor();
        let mut request = executor
            .client()
            .get(config.url())
            .header(CACHE_CONTROL, "no-store")
            .timeout(executor.timeout());

        if config.credential_mode() == CredentialMode::Include {
            if let Some(cookie) = config.cookie() {
                request = request.header(COOKIE, cookie);
            }
            if let Some(authorization) = config.authorization() {
                request = request.header(AUTHORIZATION, authorization);
            }
        }

        let response = request.send().await?;
        let protocol = protocol_label(response.version()).to_string();
        let url = response.url().to_string();
        debug!(
            "Baseline {} answered {} over {}",
            url,
            response.status(),
            protocol
        );

        let passive = if self.options.passive_checks {
            observe(response.headers(), &TlsObservation::from_scheme(&url), &url)
        } else {
            Vec::new()
        };
        Ok((protocol, passive))
    }

    fn emit<S: FindingSink + ?Sized>(sink: &mut S, outcome: &mut ScanOutcome, finding: Finding) {
        sink.record(&outcome.target, finding.clone());
        outcome.findings.push(finding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::finding::FindingStore;

    #[test]
    fn test_protocol_labels() {
        assert_eq!(protocol_label(Version::HTTP_2), "h2");
        assert_eq!(protocol_label(Version::HTTP_3), "h3");
        assert_eq!(protocol_label(Version::HTTP_11), "http/1.1");
        assert_eq!(protocol_label(Version::HTTP_10), "http/1.0");
    }

    #[test]
    fn test_multiplexing_gate() {
        assert!(supports_multiplexing("h2"));
        assert!(supports_multiplexing("h3-29"));
        assert!(!supports_multiplexing("http/1.1"));
        assert!(!supports_multiplexing(UNKNOWN_PROTOCOL));
    }

    #[test]
    fn test_default_options() {
        let options = ActiveScanOptions::default();
        assert!(options.enabled);
        assert_eq!(options.toctou_concurrency, 15);
        assert_eq!(options.hspa_concurrency, 100);
    }

    #[tokio::test]
    async fn test_disabled_scan_sends_nothing() {
        let scheduler = BurstScheduler::new(EngineConfig::default()).unwrap();
        let scan = ActiveScan::new(
            scheduler,
            ActiveScanOptions {
                enabled: false,
                passive_checks: false,
                ..Default::default()
            },
        );
        let mut store = FindingStore::new();
        let outcome = scan
            .run(&ScanConfig::new("http://127.0.0.1:1/"), &mut store)
            .await
            .unwrap();
        assert!(outcome.skipped);
        assert!(outcome.summaries.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let scheduler = BurstScheduler::new(EngineConfig::default()).unwrap();
        let scan = ActiveScan::new(scheduler, ActiveScanOptions::default());
        let mut store = FindingStore::new();
        let result = scan.run(&ScanConfig::new("ftp://example.com/"), &mut store).await;
        assert!(result.is_err());
    }
}
