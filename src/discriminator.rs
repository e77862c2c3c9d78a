// File: discriminator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::probe::ProbeResult;
use aho_corasick::AhoCorasick;
use log::{debug, trace};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const WAF_SCORE_THRESHOLD: f64 = 2.0;
pub const DOS_INDICATOR_RATIO: f64 = 0.7;
const HIGH_CONSISTENCY_RATIO: f64 = 0.3;
const FAST_REJECTION_MS: f64 = 250.0;

pub const WAF_BODY_SIGNATURES: &[&str] = &[
    "rate limited",
    "access denied",
    "cloudflare",
    "sucuri",
    "akamai",
    "imperva",
    "incapsula",
    "security check",
    "are you a human",
    "bot protection",
    "ddos protection",
    "forbidden",
    "too many requests",
    "ray id",
    "aws waf",
    "wordfence",
    "mod_security",
];

static SIGNATURE_MATCHER: Lazy<AhoCorasick> =
    Lazy::new(|| AhoCorasick::new(WAF_BODY_SIGNATURES).expect("valid WAF signature set"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosIndicators {
    pub timeouts: usize,
    pub server_errors: usize,
    pub connection_resets: usize,
}

impl DosIndicators {
    pub fn total(&self) -> usize {
        self.timeouts + self.server_errors + self.connection_resets
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscriminatorVerdict {
    pub is_waf: bool,
    pub is_dos: bool,
    pub avg_waf_score: f64,
    pub dos_indicators: DosIndicators,
    pub evidence: String,
}

/// Ordered set of evidence tags.
#[derive(Debug, Default)]
struct Evidence(Vec<&'static str>);

impl Evidence {
    fn add(&mut self, tag: &'static str) {
        if !self.0.contains(&tag) {
            self.0.push(tag);
        }
    }

    fn joined(&self) -> String {
        self.0.join(" ")
    }
}

pub fn matches_waf_signature(snippet: &str) -> bool {
    SIGNATURE_MATCHER.is_match(snippet)
}

/// Scores a set of failed probes: WAF/rate-limiter intervention versus
/// genuine resource exhaustion.
pub fn analyze_waf_vs_dos(failed: &[&ProbeResult]) -> DiscriminatorVerdict {
    let total = failed.len();
    if total == 0 {
        return DiscriminatorVerdict {
            is_waf: false,
            is_dos: false,
            avg_waf_score: 0.0,
            dos_indicators: DosIndicators::default(),
            evidence: String::new(),
        };
    }

    let mut evidence = Evidence::default();
    let mut dos = DosIndicators::default();
    let mut score = consistency_bonus(failed, &mut evidence);

    for probe in failed {
        let mut local = 0.0;

        match probe.status {
            429 => {
                local += 4.0;
                evidence.add("Status 429 (Too Many Requests).");
            }
            403 => {
                local += 1.5;
                evidence.add("Status 403.");
            }
            406 => {
                local += 1.5;
                evidence.add("Status 406.");
            }
            503 => local += 0.5,
            s if s >= 500 => dos.server_errors += 1,
            0 if probe.is_timeout() => dos.timeouts += 1,
            0 => dos.connection_resets += 1,
            _ => {}
        }

        let server = probe.headers.get("server").map(String::as_str).unwrap_or("");
        if probe.headers.contains_key("retry-after") {
            local += 4.0;
            evidence.add("Retry-After header.");
        }
        if probe.headers.contains_key("cf-ray") || server.contains("cloudflare") {
            local += 1.0;
            evidence.add("Cloudflare indicators.");
        }
        if probe.headers.contains_key("x-sucuri-id") || server.contains("sucuri") {
            local += 1.0;
            evidence.add("Sucuri indicators.");
        }

        if let Some(snippet) = probe.body_snippet.as_deref() {
            if matches_waf_signature(snippet) {
                local += 2.5;
                evidence.add("Body signatures match WAF.");
            }
        }

        if local > 0.0 && probe.duration < FAST_REJECTION_MS {
            local += 1.0;
            evidence.add("Rapid rejection time.");
        }

        trace!("Probe {} local WAF score {:.1}", probe.index, local);
        score += local;
    }

    let avg_waf_score = score / total as f64;
    let is_waf = avg_waf_score > WAF_SCORE_THRESHOLD;
    let is_dos = !is_waf && dos.total() as f64 / total as f64 > DOS_INDICATOR_RATIO;

    debug!(
        "WAF/DoS verdict over {} failures: score={:.2} waf={} dos={} ({:?})",
        total, avg_waf_score, is_waf, is_dos, dos
    );

    DiscriminatorVerdict {
        is_waf,
        is_dos,
        avg_waf_score,
        dos_indicators: dos,
        evidence: evidence.joined(),
    }
}

/// Identical block pages across failures point at a templated rejection.
fn consistency_bonus(failed: &[&ProbeResult], evidence: &mut Evidence) -> f64 {
    let total = failed.len() as f64;
    let hashes: Vec<&str> = failed.iter().filter_map(|p| p.hash.as_deref()).collect();
    let distinct: HashSet<&str> = hashes.iter().copied().collect();

    if hashes.len() > 3 && distinct.len() == 1 {
        evidence.add("Consistent response body (Hash).");
        4.0 * total
    } else if distinct.len() > 1 && (distinct.len() as f64) < total * HIGH_CONSISTENCY_RATIO {
        evidence.add("High response body consistency.");
        total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::TIMEOUT_ERROR;
    use rstest::*;

    fn failure(status: u16, hash: Option<&str>, duration: f64) -> ProbeResult {
        ProbeResult {
            status,
            ok: false,
            duration,
            hash: hash.map(str::to_string),
            body_snippet: None,
            headers: Default::default(),
            error: if status == 0 {
                Some(TIMEOUT_ERROR.to_string())
            } else {
                None
            },
            index: 0,
        }
    }

    fn verdict(probes: &[ProbeResult]) -> DiscriminatorVerdict {
        let refs: Vec<&ProbeResult> = probes.iter().collect();
        analyze_waf_vs_dos(&refs)
    }

    #[test]
    fn test_empty_failure_set() {
        let v = analyze_waf_vs_dos(&[]);
        assert!(!v.is_waf);
        assert!(!v.is_dos);
        assert_eq!(v.avg_waf_score, 0.0);
        assert!(v.evidence.is_empty());
    }

    #[test]
    fn test_rate_limited_burst_is_waf() {
        let probes: Vec<_> = [100.0, 110.0, 90.0, 120.0]
            .iter()
            .map(|d| failure(429, Some("a"), *d))
            .collect();
        let v = verdict(&probes);
        assert!(v.is_waf);
        assert!(!v.is_dos);
        // 4 (consistency) + 4 (429) + 1 (fast)
        assert_eq!(v.avg_waf_score, 9.0);
        assert!(v.evidence.contains("Consistent response body (Hash)."));
        assert!(v.evidence.contains("Status 429"));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(7)]
    fn test_all_429_is_waf_at_any_size(#[case] n: usize) {
        let probes: Vec<_> = (0..n).map(|_| failure(429, None, 900.0)).collect();
        let v = verdict(&probes);
        assert!(v.avg_waf_score >= 4.0);
        assert!(v.is_waf);
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(40)]
    fn test_all_timeouts_is_dos(#[case] n: usize) {
        let probes: Vec<_> = (0..n).map(|_| failure(0, None, 10_000.0)).collect();
        let v = verdict(&probes);
        assert!(!v.is_waf);
        assert!(v.is_dos);
        assert_eq!(v.dos_indicators.timeouts, n);
    }

    #[test]
    fn test_shared_hash_alone_crosses_threshold() {
        // 404 carries no per-probe points
        let probes: Vec<_> = (0..4).map(|_| failure(404, Some("deadbeef"), 900.0)).collect();
        let v = verdict(&probes);
        assert_eq!(v.avg_waf_score, 4.0);
        assert!(v.is_waf);
    }

    #[test]
    fn test_three_shared_hashes_get_no_bonus() {
        let probes: Vec<_> = (0..3).map(|_| failure(404, Some("deadbeef"), 900.0)).collect();
        let v = verdict(&probes);
        assert_eq!(v.avg_waf_score, 0.0);
        assert!(!v.is_waf);
    }

    #[test]
    fn test_moderate_consistency_bonus() {
        let mut probes: Vec<_> = (0..10).map(|_| failure(404, Some("a"), 900.0)).collect();
        probes[9].hash = Some("b".to_string());
        let v = verdict(&probes);
        assert_eq!(v.avg_waf_score, 1.0);
        assert!(v.evidence.contains("High response body consistency."));
    }

    #[test]
    fn test_connection_resets_and_server_errors() {
        let mut reset = failure(0, None, 50.0);
        reset.error = Some("connection reset by peer".to_string());
        let probes = vec![
            reset.clone(),
            reset,
            failure(500, None, 300.0),
            failure(502, None, 300.0),
        ];
        let v = verdict(&probes);
        assert_eq!(v.dos_indicators.connection_resets, 2);
        assert_eq!(v.dos_indicators.server_errors, 2);
        assert_eq!(v.dos_indicators.timeouts, 0);
        assert!(v.is_dos);
    }

    #[test]
    fn test_503_counts_as_weak_waf_signal_not_dos() {
        let probes: Vec<_> = (0..4).map(|_| failure(503, None, 900.0)).collect();
        let v = verdict(&probes);
        assert_eq!(v.avg_waf_score, 0.5);
        assert_eq!(v.dos_indicators.total(), 0);
        assert!(!v.is_waf && !v.is_dos);
    }

    #[test]
    fn test_header_and_body_fingerprints() {
        let mut probe = failure(403, None, 900.0);
        probe
            .headers
            .insert("server".to_string(), "cloudflare".to_string());
        probe
            .headers
            .insert("retry-after".to_string(), "60".to_string());
        probe.body_snippet = Some("attention required! ray id: 8a1b".to_string());
        let v = verdict(&[probe]);
        // 1.5 + 4 + 1 + 2.5
        assert_eq!(v.avg_waf_score, 9.0);
        assert!(v.evidence.contains("Cloudflare indicators."));
        assert!(v.evidence.contains("Body signatures match WAF."));
        assert!(!v.evidence.contains("Rapid rejection time."));
    }

    #[test]
    fn test_sucuri_fingerprint() {
        let mut probe = failure(406, None, 100.0);
        probe
            .headers
            .insert("x-sucuri-id".to_string(), "18005".to_string());
        let v = verdict(&[probe]);
        // 1.5 + 1 + 1 (fast)
        assert_eq!(v.avg_waf_score, 3.5);
        assert!(v.evidence.contains("Sucuri indicators."));
    }

    #[test]
    fn test_fast_timing_needs_existing_score() {
        let probes = vec![failure(404, None, 10.0)];
        assert_eq!(verdict(&probes).avg_waf_score, 0.0);
    }

    #[test]
    fn test_evidence_is_deduplicated() {
        let probes: Vec<_> = (0..3).map(|_| failure(429, None, 900.0)).collect();
        let v = verdict(&probes);
        assert_eq!(v.evidence.matches("Status 429").count(), 1);
    }

    #[test]
    fn test_never_both_waf_and_dos() {
        let mut probes: Vec<_> = (0..8).map(|_| failure(0, None, 10_000.0)).collect();
        probes.extend((0..4).map(|_| failure(429, Some("x"), 900.0)));
        let v = verdict(&probes);
        assert!(!(v.is_waf && v.is_dos));
    }

    #[test]
    fn test_signature_lexicon() {
        assert!(matches_waf_signature("<h1>too many requests</h1>"));
        assert!(matches_waf_signature("blocked by mod_security"));
        assert!(!matches_waf_signature("{\"balance\": 100}"));
    }
}
