// File: passive.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::finding::{Finding, FindingType, Severity};
use log::debug;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const MODERN_TLS_PROTOCOLS: &[&str] = &["TLSv1.2", "TLSv1.3"];

/// Connection security as reported for the observed page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityState {
    Secure,
    Weak,
    Insecure,
    Broken,
}

impl fmt::Display for SecurityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityState::Secure => write!(f, "secure"),
            SecurityState::Weak => write!(f, "weak"),
            SecurityState::Insecure => write!(f, "insecure"),
            SecurityState::Broken => write!(f, "broken"),
        }
    }
}

impl FromStr for SecurityState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "secure" => Ok(SecurityState::Secure),
            "weak" => Ok(SecurityState::Weak),
            "insecure" => Ok(SecurityState::Insecure),
            "broken" => Ok(SecurityState::Broken),
            other => Err(format!("unknown security state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsObservation {
    pub state: SecurityState,
    pub protocol: Option<String>,
}

impl TlsObservation {
    /// Best-effort observation from the URL scheme alone. Plain http is an
    /// insecure connection; the negotiated TLS version is not known.
    pub fn from_scheme(url: &str) -> Self {
        let state = if url.starts_with("https://") {
            SecurityState::Secure
        } else {
            SecurityState::Insecure
        };
        Self {
            state,
            protocol: None,
        }
    }
}

pub fn check_tls(observation: &TlsObservation, url: &str) -> Option<Finding> {
    match observation.state {
        SecurityState::Insecure | SecurityState::Broken => Some(Finding::new(
            FindingType::TlsConfigurationWeak,
            Severity::Medium,
            format!(
                "Insecure connection detected (State: {}). May indicate mixed content or certificate errors.",
                observation.state
            ),
            url,
        )),
        _ => observation
            .protocol
            .as_deref()
            .filter(|p| !MODERN_TLS_PROTOCOLS.contains(p))
            .map(|protocol| {
                Finding::new(
                    FindingType::TlsConfigurationLegacy,
                    Severity::Low,
                    format!(
                        "Legacy TLS protocol detected ({}). Modern standards require TLS 1.2 or higher.",
                        protocol
                    ),
                    url,
                )
            }),
    }
}

/// Lowercases names and values. Empty values count as absent.
fn normalize_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).to_lowercase();
            (!value.is_empty()).then(|| (name.as_str().to_lowercase(), value))
        })
        .collect()
}

pub fn check_security_headers(headers: &HeaderMap, url: &str) -> Vec<Finding> {
    let headers = normalize_headers(headers);
    let mut findings = Vec::new();

    if url.starts_with("https://") && !headers.contains_key("strict-transport-security") {
        findings.push(Finding::new(
            FindingType::SecurityHeaderMissingHsts,
            Severity::Medium,
            "Missing 'Strict-Transport-Security' header over HTTPS. Site may be vulnerable to SSL stripping.".to_string(),
            url,
        ));
    }

    let csp = headers.get("content-security-policy");
    if csp.is_none() {
        findings.push(Finding::new(
            FindingType::SecurityHeaderMissingCsp,
            Severity::Low,
            "Missing 'Content-Security-Policy' header. Increases risk of XSS attacks.".to_string(),
            url,
        ));
    }

    let frame_ancestors = csp.map_or(false, |c| c.contains("frame-ancestors"));
    if !headers.contains_key("x-frame-options") && !frame_ancestors {
        findings.push(Finding::new(
            FindingType::SecurityHeaderMissingClickjacking,
            Severity::Low,
            "Missing 'X-Frame-Options' or CSP 'frame-ancestors'. Site may be vulnerable to Clickjacking.".to_string(),
            url,
        ));
    }

    debug!("Passive header check on {}: {} findings", url, findings.len());
    findings
}

/// All passive observations for one response.
pub fn observe(headers: &HeaderMap, tls: &TlsObservation, url: &str) -> Vec<Finding> {
    let mut findings: Vec<Finding> = check_tls(tls, url).into_iter().collect();
    findings.extend(check_security_headers(headers, url));
    findings
}
