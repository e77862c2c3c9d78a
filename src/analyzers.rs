// File: analyzers.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::burst::{BurstResult, BurstSummary};
use crate::config::{CredentialMode, TestType};
use crate::discriminator::analyze_waf_vs_dos;
use crate::finding::{Finding, FindingType, Severity};
use log::debug;

pub const HSPA_FAILURE_RATIO: f64 = 0.2;
pub const TOCTOU_FAILURE_RATIO: f64 = 0.3;
pub const AUTH_REQUIRED_RATIO: f64 = 0.8;
pub const INSTABILITY_RATIO: f64 = 0.2;
pub const TIMING_VARIANCE_RATIO: f64 = 0.7;
const MIN_TIMING_SAMPLES: usize = 5;
const MIN_MEAN_DURATION_MS: f64 = 50.0;
const MAX_SAMPLE_HASHES: usize = 3;

fn exceeds(count: usize, total: usize, ratio: f64) -> bool {
    count as f64 > total as f64 * ratio
}

/// Population mean and standard deviation.
fn mean_and_stddev(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Routes a burst summary to the analyzer for its test type.
pub fn analyze_summary(summary: &BurstSummary) -> Vec<Finding> {
    match summary.test_type {
        TestType::Hspa => analyze_hspa(&summary.result),
        TestType::Toctou => analyze_toctou(&summary.result),
    }
}

/// Multiplexed-connection stress: WAF, DoS, then timing variance. At most
/// one finding.
pub fn analyze_hspa(burst: &BurstResult) -> Vec<Finding> {
    let total = burst.total();
    if total == 0 {
        return Vec::new();
    }

    let protocol = burst.protocol();
    let prefix = format!("[AuthMode: {}] Protocol: {}.", burst.auth_mode, protocol);
    let failures = burst.failures();
    let failure_count = failures.len();

    if exceeds(failure_count, total, HSPA_FAILURE_RATIO) {
        let verdict = analyze_waf_vs_dos(&failures);

        if verdict.is_waf {
            return vec![Finding::new(
                FindingType::HspaWafIntervention,
                Severity::Info,
                "WAF or rate limiting blocked the concurrent stream burst. The rejections come from a protective layer and are most likely not a vulnerability.".to_string(),
                &burst.url,
            )
            .with_details(format!(
                "{} Failures: {}/{}. WAF Score: {:.2}. Evidence: {}",
                prefix, failure_count, total, verdict.avg_waf_score, verdict.evidence
            ))];
        }

        if verdict.is_dos {
            let d = verdict.dos_indicators;
            return vec![Finding::new(
                FindingType::HspaPotentialDos,
                Severity::High,
                format!(
                    "{:.1}% of requests failed under high stream concurrency without any sign of a WAF. The server appears to exhaust resources (genuine DoS).",
                    failure_count as f64 / total as f64 * 100.0
                ),
                &burst.url,
            )
            .with_details(format!(
                "{} Timeouts: {}, Server Errors: {}, Resets: {}.",
                prefix, d.timeouts, d.server_errors, d.connection_resets
            ))];
        }
    }

    let timings: Vec<f64> = burst.successes().iter().map(|r| r.duration).collect();
    if timings.len() > MIN_TIMING_SAMPLES {
        let (mean, stddev) = mean_and_stddev(&timings);
        debug!(
            "HSPA timing over {} successes: mean={:.2}ms stddev={:.2}ms",
            timings.len(),
            mean,
            stddev
        );

        if stddev > mean * TIMING_VARIANCE_RATIO && mean > MIN_MEAN_DURATION_MS {
            return vec![Finding::new(
                FindingType::HspaTimingVariance,
                Severity::Medium,
                format!(
                    "Response times varied strongly across concurrent {} streams, pointing at a prioritization issue or contention bottleneck.",
                    protocol
                ),
                &burst.url,
            )
            .with_details(format!(
                "{} StdDev: {:.2}ms, Avg: {:.2}ms.",
                prefix, stddev, mean
            ))];
        }
    }

    Vec::new()
}

/// Inconsistent-state detection. Each heuristic is evaluated independently
/// over the same burst.
pub fn analyze_toctou(burst: &BurstResult) -> Vec<Finding> {
    let total = burst.total();
    if total == 0 {
        return Vec::new();
    }

    let mut findings = Vec::new();
    let prefix = format!(
        "[AuthMode: {}] Duration: {:.2}ms.",
        burst.auth_mode, burst.duration
    );
    let failures = burst.failures();
    let failure_count = failures.len();
    let unauthorized_count = burst.results.iter().filter(|r| r.is_unauthorized()).count();

    let mut waf_detected = false;
    let mut dos_detected = false;
    if exceeds(failure_count, total, TOCTOU_FAILURE_RATIO) {
        let verdict = analyze_waf_vs_dos(&failures);

        if verdict.is_waf {
            waf_detected = true;
            findings.push(
                Finding::new(
                    FindingType::ToctouWafIntervention,
                    Severity::Info,
                    "WAF or rate limiting intervened during the concurrent request burst. Race condition results for this target may be unreliable.".to_string(),
                    &burst.url,
                )
                .with_details(format!(
                    "{} Failures: {}/{}. WAF Score: {:.2}. Evidence: {}",
                    prefix, failure_count, total, verdict.avg_waf_score, verdict.evidence
                )),
            );
        } else if verdict.is_dos {
            dos_detected = true;
            let d = verdict.dos_indicators;
            findings.push(
                Finding::new(
                    FindingType::ToctouPotentialInstabilityDos,
                    Severity::High,
                    "The server collapsed under concurrent requests without any sign of a WAF (genuine DoS). Locking problems or races may be crashing request handlers.".to_string(),
                    &burst.url,
                )
                .with_details(format!(
                    "{} Timeouts: {}, Server Errors: {}, Resets: {}.",
                    prefix, d.timeouts, d.server_errors, d.connection_resets
                )),
            );
        }
    }

    if burst.auth_mode == CredentialMode::Omit
        && exceeds(unauthorized_count, total, AUTH_REQUIRED_RATIO)
    {
        let auth_failures = failures.iter().filter(|r| r.is_unauthorized()).count();
        let waf_explains_rejections =
            waf_detected && auth_failures as f64 >= failure_count as f64 * AUTH_REQUIRED_RATIO;

        if !waf_explains_rejections {
            findings.push(
                Finding::new(
                    FindingType::ToctouAuthRequired,
                    Severity::Info,
                    "The resource answered with 401/403 and probably requires authentication. Re-run with credentials included to test the logged-in state.".to_string(),
                    &burst.url,
                )
                .with_details(format!(
                    "Unauthorized requests: {}/{}.",
                    unauthorized_count, total
                )),
            );
        }
    }

    let mut distinct_hashes: Vec<&str> = Vec::new();
    for hash in burst.successes().iter().filter_map(|r| r.hash.as_deref()) {
        if !distinct_hashes.contains(&hash) {
            distinct_hashes.push(hash);
        }
    }

    if distinct_hashes.len() > 1 {
        let samples = distinct_hashes
            .iter()
            .take(MAX_SAMPLE_HASHES)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        findings.push(
            Finding::new(
                FindingType::ToctouRaceConditionDetected,
                Severity::High,
                format!(
                    "Concurrent requests observed {} different resource states. Inconsistent content across simultaneous successful responses indicates a race condition (ToCTOU).",
                    distinct_hashes.len()
                ),
                &burst.url,
            )
            .with_details(format!(
                "{} Successful Requests: {}. Sample Hashes: {}",
                prefix,
                total - failure_count,
                samples
            )),
        );
    }

    let server_errors = failures.iter().filter(|r| r.is_server_error()).count();
    if !waf_detected && !dos_detected && exceeds(server_errors, total, INSTABILITY_RATIO) {
        findings.push(
            Finding::new(
                FindingType::ToctouPotentialInstabilityMedium,
                Severity::Medium,
                "A high share of concurrent requests ended in 5xx errors. Possible locking issues, WAF not strongly indicated.".to_string(),
                &burst.url,
            )
            .with_details(format!(
                "{} Errors: {}/{}.",
                prefix, server_errors, total
            )),
        );
    }

    findings
}
