// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::errors::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_CONCURRENCY: usize = 500;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROPAGATION_WINDOW_MS: u64 = 100;
pub const DEFAULT_FILLER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TestType {
    #[serde(rename = "HSPA")]
    Hspa,
    #[serde(rename = "TOCTOU")]
    Toctou,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Hspa => "HSPA",
            TestType::Toctou => "TOCTOU",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Standard,
    LastByteSync,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Standard => write!(f, "standard"),
            Strategy::LastByteSync => write!(f, "last-byte-sync"),
        }
    }
}

impl FromStr for Strategy {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(Strategy::Standard),
            "last-byte-sync" | "last-byte" | "spa" => Ok(Strategy::LastByteSync),
            other => Err(ScanError::InvalidConfig(format!(
                "unknown delivery strategy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    Include,
    Omit,
}

impl CredentialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialMode::Include => "include",
            CredentialMode::Omit => "omit",
        }
    }
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single burst against one target.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    url: String,
    method: String,
    concurrency: usize,
    strategy: Strategy,
    delay_ms: u64,
    use_auth: bool,
    custom_body: Option<String>,
    protocol: Option<String>,
    cookie: Option<String>,
    authorization: Option<String>,
}

impl ScanConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            concurrency: 15,
            strategy: Strategy::Standard,
            delay_ms: 0,
            use_auth: false,
            custom_body: None,
            protocol: None,
            cookie: None,
            authorization: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_uppercase();
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency;
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn set_delay_ms(&mut self, delay_ms: u64) {
        self.delay_ms = delay_ms;
    }

    pub fn use_auth(&self) -> bool {
        self.use_auth
    }

    pub fn set_use_auth(&mut self, use_auth: bool) {
        self.use_auth = use_auth;
    }

    pub fn credential_mode(&self) -> CredentialMode {
        if self.use_auth {
            CredentialMode::Include
        } else {
            CredentialMode::Omit
        }
    }

    pub fn custom_body(&self) -> Option<&str> {
        self.custom_body.as_deref()
    }

    pub fn set_custom_body(&mut self, body: Option<String>) {
        self.custom_body = body.filter(|b| !b.is_empty());
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn set_protocol(&mut self, protocol: Option<String>) {
        self.protocol = protocol;
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: Option<String>) {
        self.cookie = cookie;
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn set_authorization(&mut self, authorization: Option<String>) {
        self.authorization = authorization;
    }

    /// Rejects configurations that would produce an empty, oversized or
    /// malformed burst.
    pub fn validate(&self) -> ScanResult<()> {
        validate_concurrency(self.concurrency)?;

        let parsed = url::Url::parse(&self.url)?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ScanError::InvalidConfig(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        if reqwest::Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(ScanError::InvalidConfig(format!(
                "invalid HTTP method '{}'",
                self.method
            )));
        }

        Ok(())
    }
}

/// A burst always dispatches exactly `concurrency` probes, so values outside
/// `1..=MAX_CONCURRENCY` are rejected rather than adjusted.
pub fn validate_concurrency(concurrency: usize) -> ScanResult<()> {
    if concurrency == 0 {
        return Err(ScanError::InvalidConfig(
            "concurrency must be a positive integer".to_string(),
        ));
    }
    if concurrency > MAX_CONCURRENCY {
        return Err(ScanError::InvalidConfig(format!(
            "concurrency {} exceeds the limit of {}",
            concurrency, MAX_CONCURRENCY
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub probe_timeout: Duration,
    pub propagation_window: Duration,
    pub filler_size: usize,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            propagation_window: Duration::from_millis(DEFAULT_PROPAGATION_WINDOW_MS),
            filler_size: DEFAULT_FILLER_SIZE,
            user_agent: format!("webrace/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
        }
    }
}

/// What the runtime environment can do for the probe engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub streaming_bodies: bool,
}

impl EngineCapabilities {
    pub fn detect() -> Self {
        Self {
            streaming_bodies: cfg!(feature = "streaming"),
        }
    }
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_scan_config_defaults() {
        let config = ScanConfig::new("https://example.com/cart");
        assert_eq!(config.url(), "https://example.com/cart");
        assert_eq!(config.method(), "GET");
        assert_eq!(config.concurrency(), 15);
        assert_eq!(config.strategy(), Strategy::Standard);
        assert_eq!(config.delay_ms(), 0);
        assert_eq!(config.credential_mode(), CredentialMode::Omit);
        assert!(config.custom_body().is_none());
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_CONCURRENCY + 1)]
    #[case(10_000)]
    fn test_out_of_range_concurrency_rejected(#[case] concurrency: usize) {
        let mut config = ScanConfig::new("https://example.com/");
        config.set_concurrency(concurrency);
        assert!(matches!(
            config.validate(),
            Err(ScanError::InvalidConfig(_))
        ));
        assert_eq!(config.concurrency(), concurrency);
    }

    #[rstest]
    #[case(1)]
    #[case(MAX_CONCURRENCY)]
    fn test_concurrency_limits_accepted(#[case] concurrency: usize) {
        let mut config = ScanConfig::new("https://example.com/");
        config.set_concurrency(concurrency);
        config.validate().unwrap();
        assert_eq!(config.concurrency(), concurrency);
    }

    #[rstest]
    #[case("ftp://example.com/")]
    #[case("example.com")]
    #[case("")]
    fn test_bad_urls_rejected(#[case] url: &str) {
        let config = ScanConfig::new(url);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_body_is_none() {
        let mut config = ScanConfig::new("https://example.com/");
        config.set_custom_body(Some(String::new()));
        assert!(config.custom_body().is_none());
        config.set_custom_body(Some("amount=10".to_string()));
        assert_eq!(config.custom_body(), Some("amount=10"));
    }

    #[rstest]
    #[case("standard", Strategy::Standard)]
    #[case("last-byte-sync", Strategy::LastByteSync)]
    #[case("Last-Byte", Strategy::LastByteSync)]
    fn test_strategy_parsing(#[case] input: &str, #[case] expected: Strategy) {
        assert_eq!(input.parse::<Strategy>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_strategy() {
        assert!("burst".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.probe_timeout, Duration::from_millis(10_000));
        assert_eq!(config.propagation_window, Duration::from_millis(100));
        assert_eq!(config.filler_size, 1024);
        assert!(config.user_agent.starts_with("webrace/"));
    }

    #[test]
    fn test_credential_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&CredentialMode::Include).unwrap(),
            "\"include\""
        );
        assert_eq!(serde_json::to_string(&TestType::Toctou).unwrap(), "\"TOCTOU\"");
    }
}
