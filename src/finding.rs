// File: finding.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::errors::ScanResult;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FindingType {
    #[serde(rename = "TLS_CONFIGURATION_WEAK")]
    TlsConfigurationWeak,
    #[serde(rename = "TLS_CONFIGURATION_LEGACY")]
    TlsConfigurationLegacy,
    #[serde(rename = "SECURITY_HEADER_MISSING_HSTS")]
    SecurityHeaderMissingHsts,
    #[serde(rename = "SECURITY_HEADER_MISSING_CSP")]
    SecurityHeaderMissingCsp,
    #[serde(rename = "SECURITY_HEADER_MISSING_CLICKJACKING")]
    SecurityHeaderMissingClickjacking,
    #[serde(rename = "HSPA_WAF_INTERVENTION")]
    HspaWafIntervention,
    #[serde(rename = "H2/H3SPA_POTENTIAL_DOS")]
    HspaPotentialDos,
    #[serde(rename = "H2/H3SPA_TIMING_VARIANCE")]
    HspaTimingVariance,
    #[serde(rename = "TOCTOU_WAF_INTERVENTION")]
    ToctouWafIntervention,
    #[serde(rename = "TOCTOU_POTENTIAL_INSTABILITY_DOS")]
    ToctouPotentialInstabilityDos,
    #[serde(rename = "TOCTOU_AUTH_REQUIRED")]
    ToctouAuthRequired,
    #[serde(rename = "TOCTOU_RACE_CONDITION_DETECTED")]
    ToctouRaceConditionDetected,
    #[serde(rename = "TOCTOU_POTENTIAL_INSTABILITY_MEDIUM")]
    ToctouPotentialInstabilityMedium,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TlsConfigurationWeak => "TLS_CONFIGURATION_WEAK",
            Self::TlsConfigurationLegacy => "TLS_CONFIGURATION_LEGACY",
            Self::SecurityHeaderMissingHsts => "SECURITY_HEADER_MISSING_HSTS",
            Self::SecurityHeaderMissingCsp => "SECURITY_HEADER_MISSING_CSP",
            Self::SecurityHeaderMissingClickjacking => "SECURITY_HEADER_MISSING_CLICKJACKING",
            Self::HspaWafIntervention => "HSPA_WAF_INTERVENTION",
            Self::HspaPotentialDos => "H2/H3SPA_POTENTIAL_DOS",
            Self::HspaTimingVariance => "H2/H3SPA_TIMING_VARIANCE",
            Self::ToctouWafIntervention => "TOCTOU_WAF_INTERVENTION",
            Self::ToctouPotentialInstabilityDos => "TOCTOU_POTENTIAL_INSTABILITY_DOS",
            Self::ToctouAuthRequired => "TOCTOU_AUTH_REQUIRED",
            Self::ToctouRaceConditionDetected => "TOCTOU_RACE_CONDITION_DETECTED",
            Self::ToctouPotentialInstabilityMedium => "TOCTOU_POTENTIAL_INSTABILITY_MEDIUM",
        }
    }

    /// Passive header/TLS observations repeat on every page load.
    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            Self::TlsConfigurationWeak
                | Self::TlsConfigurationLegacy
                | Self::SecurityHeaderMissingHsts
                | Self::SecurityHeaderMissingCsp
                | Self::SecurityHeaderMissingClickjacking
        )
    }
}

impl fmt::Display for FindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    pub message: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(finding_type: FindingType, severity: Severity, message: String, url: &str) -> Self {
        Self {
            finding_type,
            severity,
            message,
            url: url.to_string(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    /// Stable identity of a finding kind on a URL.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.finding_type.as_str().as_bytes());
        hasher.update(b"-");
        hasher.update(self.url.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Receives findings as the analyzers emit them.
pub trait FindingSink {
    fn record(&mut self, target: &str, finding: Finding);

    /// Called before a fresh scan of `target`.
    fn reset(&mut self, _target: &str) {}
}

/// In-memory findings, grouped per scanned target.
#[derive(Debug, Default)]
pub struct FindingStore {
    findings: BTreeMap<String, Vec<Finding>>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a passive finding was already known for this target.
    pub fn append(&mut self, target: &str, finding: Finding) -> bool {
        let entries = self.findings.entry(target.to_string()).or_default();

        if finding.finding_type.is_passive() {
            let fingerprint = finding.fingerprint();
            if entries.iter().any(|f| f.fingerprint() == fingerprint) {
                debug!(
                    "Skipping duplicate passive finding {} for {}",
                    finding.finding_type, finding.url
                );
                return false;
            }
        }

        info!(
            "[Finding {}] {} ({}): {}",
            target, finding.finding_type, finding.severity, finding.message
        );
        entries.push(finding);
        true
    }

    pub fn for_target(&self, target: &str) -> &[Finding] {
        self.findings.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all(&self) -> Vec<&Finding> {
        self.findings.values().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.findings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything recorded for a target, as on a fresh navigation.
    pub fn clear_target(&mut self, target: &str) {
        self.findings.remove(target);
    }

    pub fn export_json(&self) -> ScanResult<String> {
        Ok(serde_json::to_string_pretty(&self.findings)?)
    }
}

impl FindingSink for FindingStore {
    fn record(&mut self, target: &str, finding: Finding) {
        self.append(target, finding);
    }

    fn reset(&mut self, target: &str) {
        self.clear_target(target);
    }
}
