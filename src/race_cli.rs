// File: race_cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::analyzers::analyze_summary;
use crate::burst::{BurstScheduler, BurstSummary};
use crate::config::{validate_concurrency, EngineConfig, ScanConfig, Strategy};
use crate::finding::{Finding, FindingStore, Severity};
use crate::orchestrator::{ActiveScan, ActiveScanOptions};
use crate::report::{ReportFormat, ReportGenerator};
use anyhow::{bail, Context};
use clap::Args;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct RaceArgs {
    #[arg(long = "target")]
    pub target_url: Option<String>,

    #[arg(short = 'i', long = "input")]
    pub input_file: Option<String>,

    #[arg(short = 'o', long = "output", default_value = "webrace_results")]
    pub output_dir: String,

    #[arg(long = "format", default_value = "jsonl")]
    pub output_format: String,

    #[arg(long = "toctou-concurrency", default_value = "15")]
    pub toctou_concurrency: usize,

    #[arg(long = "hspa-concurrency", default_value = "100")]
    pub hspa_concurrency: usize,

    #[arg(
        long = "strategy",
        default_value = "standard",
        help = "Delivery strategy: standard or last-byte-sync"
    )]
    pub strategy: String,

    #[arg(
        long = "delay",
        default_value = "0",
        help = "Delay between dispatches in ms (standard strategy)"
    )]
    pub delay_ms: u64,

    #[arg(long = "auth", help = "Include cookies and authorization with every probe")]
    pub use_auth: bool,

    #[arg(long = "cookie")]
    pub cookie: Option<String>,

    #[arg(long = "authorization")]
    pub authorization: Option<String>,

    #[arg(long = "body", help = "Request body replayed by every probe")]
    pub body: Option<String>,

    #[arg(short = 'X', long = "method", default_value = "GET")]
    pub method: String,

    #[arg(long = "timeout", default_value = "10000", help = "Per-probe timeout in ms")]
    pub timeout_ms: u64,

    #[arg(long = "propagation-window", default_value = "100")]
    pub propagation_window_ms: u64,

    #[arg(long = "filler-size", default_value = "1024")]
    pub filler_size: usize,

    #[arg(long = "min-severity", default_value = "info")]
    pub min_severity: String,

    #[arg(long = "save-bursts", help = "Also write raw burst summaries")]
    pub save_bursts: bool,

    #[arg(long = "passive-only", help = "Disable active bursts, run header checks only")]
    pub passive_only: bool,

    #[arg(long = "no-passive")]
    pub no_passive: bool,

    #[arg(long = "max-targets", default_value = "100")]
    pub max_targets: usize,

    #[arg(long = "i-have-authorization")]
    pub skip_authorization_check: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Burst summaries written by `scan --save-bursts`
    pub file: PathBuf,

    #[arg(long = "min-severity", default_value = "info")]
    pub min_severity: String,

    #[arg(short = 'o', long = "output")]
    pub output_dir: Option<String>,

    #[arg(long = "format", default_value = "jsonl")]
    pub output_format: String,
}

pub fn build_scan_config(args: &RaceArgs, target: &str) -> anyhow::Result<ScanConfig> {
    let strategy: Strategy = args.strategy.parse()?;

    let mut config = ScanConfig::new(target);
    config.set_method(&args.method);
    config.set_strategy(strategy);
    config.set_delay_ms(args.delay_ms);
    config.set_use_auth(args.use_auth);
    config.set_custom_body(args.body.clone());
    config.set_cookie(args.cookie.clone());
    config.set_authorization(args.authorization.clone());
    config.set_concurrency(args.toctou_concurrency);

    if !args.use_auth && (args.cookie.is_some() || args.authorization.is_some()) {
        warn!("Credentials given without --auth, probes will omit them");
    }

    config.validate()?;
    validate_concurrency(args.hspa_concurrency)?;
    Ok(config)
}

pub fn build_engine_config(args: &RaceArgs) -> EngineConfig {
    EngineConfig {
        probe_timeout: Duration::from_millis(args.timeout_ms),
        propagation_window: Duration::from_millis(args.propagation_window_ms),
        filler_size: args.filler_size,
        ..Default::default()
    }
}

fn scan_options(args: &RaceArgs) -> ActiveScanOptions {
    ActiveScanOptions {
        enabled: !args.passive_only,
        toctou_concurrency: args.toctou_concurrency,
        hspa_concurrency: args.hspa_concurrency,
        passive_checks: !args.no_passive,
    }
}

pub async fn run_race_scan(args: RaceArgs) -> anyhow::Result<()> {
    println!("{}", "=".repeat(80).bright_red());
    println!("{}", "WebRace Race Condition Scanner".bright_red().bold());
    println!("{}", "=".repeat(80).bright_red());
    println!();
    println!(
        "{}",
        "This tool sends bursts of concurrent requests that can:".bright_yellow()
    );
    println!("   - Trigger state changes if the endpoint is not read-safe");
    println!("   - Degrade service for other users");
    println!("   - Trip rate limiting or security alerts");
    println!();
    println!("{}", "LEGAL REQUIREMENT:".bright_red().bold());
    println!("   You MUST have explicit written authorization to test these targets.");
    println!();

    if !args.skip_authorization_check {
        println!(
            "{}",
            "Do you have explicit written authorization to test all target systems? (yes/NO):"
                .bright_yellow()
        );
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "yes" {
            println!(
                "{}",
                "Authorization not confirmed. Exiting for safety.".red()
            );
            println!("   Use --i-have-authorization flag only if you have proper authorization.");
            return Ok(());
        }
    }

    let targets = load_targets(&args)?;
    if targets.is_empty() {
        eprintln!(
            "{}",
            "No targets specified. Use --target for a single target or -i for an input file".red()
        );
        return Ok(());
    }
    println!("Loaded {} target(s)", targets.len());

    let format: ReportFormat = args
        .output_format
        .parse()
        .map_err(anyhow::Error::msg)?;
    let min_severity: Severity = args.min_severity.parse().map_err(anyhow::Error::msg)?;

    let scheduler = BurstScheduler::new(build_engine_config(&args))?;
    let scan = ActiveScan::new(scheduler, scan_options(&args));
    let mut store = FindingStore::new();
    let mut summaries: Vec<BurstSummary> = Vec::new();

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}",
            )?
            .progress_chars("##-"),
    );

    // Targets run one after another so bursts never overlap.
    for target in &targets {
        pb.set_message(format!("Racing {}", target));

        let config = match build_scan_config(&args, target) {
            Ok(config) => config,
            Err(e) => {
                warn!("Skipping {}: {}", target, e);
                pb.inc(1);
                continue;
            }
        };

        match scan.run(&config, &mut store).await {
            Ok(outcome) => {
                for message in &outcome.warnings {
                    pb.println(format!("{} {}", "warning:".yellow(), message));
                }
                info!(
                    "{}: protocol {}, {} findings, {} bursts",
                    outcome.target,
                    outcome.protocol,
                    outcome.findings.len(),
                    outcome.summaries.len()
                );
                summaries.extend(outcome.summaries);
            }
            Err(e) => warn!("Failed to scan {}: {}", target, e),
        }
        pb.inc(1);
    }

    pb.finish_with_message("Scan completed");

    let findings = filter_by_severity(store.all().into_iter().cloned(), min_severity);
    display_summary(&findings);

    let output_dir = Path::new(&args.output_dir);
    let path = ReportGenerator::save_findings(&findings, output_dir, format)
        .with_context(|| format!("writing findings to {}", args.output_dir))?;
    println!("\nFindings saved to: {}", path.display());

    if args.save_bursts {
        let path = ReportGenerator::save_bursts(&summaries, output_dir)?;
        println!("Burst summaries saved to: {}", path.display());
    }

    Ok(())
}

pub fn run_analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    let min_severity: Severity = args.min_severity.parse().map_err(anyhow::Error::msg)?;
    let summaries = ReportGenerator::load_bursts(&args.file)
        .with_context(|| format!("loading burst summaries from {}", args.file.display()))?;
    ensure_results(&summaries)?;
    println!("Loaded {} burst summaries", summaries.len());

    let mut store = FindingStore::new();
    for summary in &summaries {
        for finding in analyze_summary(summary) {
            store.append(&summary.result.url, finding);
        }
    }

    let findings = filter_by_severity(store.all().into_iter().cloned(), min_severity);
    display_summary(&findings);

    if let Some(dir) = &args.output_dir {
        let format: ReportFormat = args.output_format.parse().map_err(anyhow::Error::msg)?;
        let path = ReportGenerator::save_findings(&findings, Path::new(dir), format)?;
        println!("\nFindings saved to: {}", path.display());
    }

    Ok(())
}

fn load_targets(args: &RaceArgs) -> anyhow::Result<Vec<String>> {
    let mut targets = Vec::new();

    if let Some(target) = &args.target_url {
        targets.push(normalize_target(target));
    }

    if let Some(input_file) = &args.input_file {
        let file = File::open(input_file).with_context(|| format!("opening {}", input_file))?;
        targets.extend(read_targets(BufReader::new(file))?);
    } else if args.target_url.is_none() {
        targets.extend(read_targets(io::stdin().lock())?);
    }

    if targets.len() > args.max_targets {
        targets.truncate(args.max_targets);
        println!("Limited to {} targets", args.max_targets);
    }

    Ok(targets)
}

fn read_targets<R: BufRead>(reader: R) -> anyhow::Result<Vec<String>> {
    let mut targets = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            targets.push(normalize_target(trimmed));
        }
    }
    Ok(targets)
}

fn normalize_target(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("https://{}", target)
    }
}

pub fn filter_by_severity<I>(findings: I, min: Severity) -> Vec<Finding>
where
    I: IntoIterator<Item = Finding>,
{
    findings.into_iter().filter(|f| f.severity >= min).collect()
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "red",
        Severity::Medium => "yellow",
        Severity::Low => "blue",
        Severity::Info => "cyan",
    }
}

fn display_summary(findings: &[Finding]) {
    println!("\nScan Summary");
    println!("================");

    if findings.is_empty() {
        println!("No findings");
        return;
    }

    println!("Findings by severity:");
    for severity in [Severity::High, Severity::Medium, Severity::Low, Severity::Info] {
        let count = findings.iter().filter(|f| f.severity == severity).count();
        if count > 0 {
            println!(
                "  {}: {}",
                severity.to_string().to_uppercase(),
                count.to_string().color(severity_color(severity))
            );
        }
    }

    let high: Vec<_> = findings
        .iter()
        .filter(|f| f.severity == Severity::High)
        .collect();

    if !high.is_empty() {
        println!("\n{}", "High Severity Findings:".red().bold());
        for finding in high {
            println!(
                "  {} on {}",
                finding.finding_type.to_string().red(),
                finding.url
            );
            println!("    {}", finding.message);
            if let Some(details) = &finding.details {
                println!("    {}", details.dimmed());
            }
        }
    }
}

/// Rejects a burst file whose summaries carry no probe results.
pub fn ensure_results(summaries: &[BurstSummary]) -> anyhow::Result<()> {
    if summaries.iter().all(|s| s.result.results.is_empty()) {
        bail!("burst summaries contain no probe results");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialMode;
    use crate::finding::FindingType;
    use clap::Parser;
    use std::io::Cursor;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RaceArgs,
    }

    fn args(extra: &[&str]) -> RaceArgs {
        let mut argv = vec!["webrace"];
        argv.extend_from_slice(extra);
        Harness::parse_from(argv).args
    }

    #[test]
    fn test_build_scan_config() {
        let a = args(&[
            "--target",
            "https://shop.example/cart",
            "--strategy",
            "last-byte-sync",
            "--auth",
            "--cookie",
            "session=1",
            "-X",
            "post",
            "--toctou-concurrency",
            "20",
        ]);
        let config = build_scan_config(&a, "https://shop.example/cart").unwrap();
        assert_eq!(config.strategy(), Strategy::LastByteSync);
        assert_eq!(config.method(), "POST");
        assert_eq!(config.concurrency(), 20);
        assert_eq!(config.credential_mode(), CredentialMode::Include);
        assert_eq!(config.cookie(), Some("session=1"));
    }

    #[test]
    fn test_build_scan_config_rejects_bad_strategy() {
        let a = args(&["--strategy", "turbo"]);
        assert!(build_scan_config(&a, "https://shop.example/").is_err());
    }

    #[test]
    fn test_build_scan_config_rejects_oversized_bursts() {
        let a = args(&["--toctou-concurrency", "600"]);
        assert!(build_scan_config(&a, "https://shop.example/").is_err());
        let a = args(&["--hspa-concurrency", "600"]);
        assert!(build_scan_config(&a, "https://shop.example/").is_err());
    }

    #[test]
    fn test_engine_config_from_args() {
        let a = args(&["--timeout", "2500", "--filler-size", "64"]);
        let engine = build_engine_config(&a);
        assert_eq!(engine.probe_timeout, Duration::from_millis(2500));
        assert_eq!(engine.filler_size, 64);
        assert_eq!(engine.propagation_window, Duration::from_millis(100));
    }

    #[test]
    fn test_scan_options_from_args() {
        let options = scan_options(&args(&["--passive-only", "--hspa-concurrency", "50"]));
        assert!(!options.enabled);
        assert!(options.passive_checks);
        assert_eq!(options.hspa_concurrency, 50);
    }

    #[test]
    fn test_read_targets() {
        let input = Cursor::new("# comment\nshop.example\n\nhttp://plain.example/a\n");
        let targets = read_targets(input).unwrap();
        assert_eq!(
            targets,
            vec!["https://shop.example", "http://plain.example/a"]
        );
    }

    #[test]
    fn test_filter_by_severity() {
        let findings = vec![
            Finding::new(
                FindingType::SecurityHeaderMissingCsp,
                Severity::Low,
                "csp".to_string(),
                "u",
            ),
            Finding::new(
                FindingType::ToctouRaceConditionDetected,
                Severity::High,
                "race".to_string(),
                "u",
            ),
        ];
        let filtered = filter_by_severity(findings, Severity::Medium);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].severity, Severity::High);
    }

    #[test]
    fn test_ensure_results() {
        assert!(ensure_results(&[]).is_err());
    }
}
