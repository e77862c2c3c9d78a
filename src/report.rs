// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::burst::BurstSummary;
use crate::errors::{ScanError, ScanResult};
use crate::finding::{Finding, Severity};
use chrono::Utc;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Jsonl,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "txt" | "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "jsonl" => Ok(ReportFormat::Jsonl),
            other => Err(format!("Unsupported output format: {}", other)),
        }
    }
}

const SEVERITY_ORDER: [Severity; 4] = [
    Severity::High,
    Severity::Medium,
    Severity::Low,
    Severity::Info,
];

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn generate_text_report(findings: &[Finding]) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "WebRace Race Condition Scan Report");
        let _ = writeln!(report, "==================================");
        let _ = writeln!(
            report,
            "Generated: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(report, "Total findings: {}", findings.len());

        for severity in SEVERITY_ORDER {
            let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
            if group.is_empty() {
                continue;
            }

            let _ = writeln!(report, "\n[{}] {} finding(s)", severity, group.len());
            for finding in group {
                let _ = writeln!(report, "  {} on {}", finding.finding_type, finding.url);
                let _ = writeln!(report, "    {}", finding.message);
                if let Some(details) = &finding.details {
                    let _ = writeln!(report, "    {}", details);
                }
                let _ = writeln!(report, "    at {}", finding.timestamp.to_rfc3339());
            }
        }

        report
    }

    /// Writes findings to a timestamped file in `output_dir`.
    pub fn save_findings(
        findings: &[Finding],
        output_dir: &Path,
        format: ReportFormat,
    ) -> ScanResult<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!(
            "webrace_findings_{}.{}",
            timestamp(),
            format.extension()
        ));
        let mut file = File::create(&path)?;

        match format {
            ReportFormat::Json => {
                let json = serde_json::to_string_pretty(findings)?;
                file.write_all(json.as_bytes())?;
            }
            ReportFormat::Jsonl => {
                for finding in findings {
                    writeln!(file, "{}", serde_json::to_string(finding)?)?;
                }
            }
            ReportFormat::Text => {
                file.write_all(Self::generate_text_report(findings).as_bytes())?;
            }
        }

        Ok(path)
    }

    /// Raw burst summaries, for offline re-analysis.
    pub fn save_bursts(summaries: &[BurstSummary], output_dir: &Path) -> ScanResult<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("webrace_bursts_{}.json", timestamp()));
        let json = serde_json::to_string_pretty(summaries)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Accepts a JSON array of summaries, a single summary, or JSON lines.
    pub fn load_bursts(path: &Path) -> ScanResult<Vec<BurstSummary>> {
        let content = fs::read_to_string(path)?;
        let trimmed = content.trim_start();

        if trimmed.starts_with('[') {
            return Ok(serde_json::from_str(trimmed)?);
        }

        if let Ok(summary) = serde_json::from_str::<BurstSummary>(trimmed) {
            return Ok(vec![summary]);
        }

        let summaries = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<BurstSummary>)
            .collect::<Result<Vec<_>, _>>()?;

        if summaries.is_empty() {
            return Err(ScanError::InvalidConfig(format!(
                "no burst summaries in {}",
                path.display()
            )));
        }
        Ok(summaries)
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::BurstResult;
    use crate::config::{ScanConfig, Strategy, TestType};
    use crate::finding::FindingType;
    use crate::probe::ProbeResult;
    use tempfile::TempDir;

    fn sample_findings() -> Vec<Finding> {
        vec![
            Finding::new(
                FindingType::SecurityHeaderMissingCsp,
                Severity::Low,
                "Missing CSP".to_string(),
                "https://shop.example/",
            ),
            Finding::new(
                FindingType::ToctouRaceConditionDetected,
                Severity::High,
                "Race".to_string(),
                "https://shop.example/",
            )
            .with_details("Sample Hashes: a, b".to_string()),
        ]
    }

    fn sample_summary() -> BurstSummary {
        let config = ScanConfig::new("https://shop.example/");
        let results = vec![ProbeResult::network_failure(0, 3.0, "reset".to_string())];
        let burst = BurstResult::new(TestType::Toctou, &config, Strategy::Standard, results, 3.0);
        BurstSummary::new(TestType::Toctou, burst)
    }

    #[test]
    fn test_text_report_groups_by_severity() {
        let report = ReportGenerator::generate_text_report(&sample_findings());
        let high = report.find("[High]").unwrap();
        let low = report.find("[Low]").unwrap();
        assert!(high < low);
        assert!(report.contains("Total findings: 2"));
        assert!(report.contains("Sample Hashes: a, b"));
        assert!(!report.contains("[Medium]"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSONL".parse::<ReportFormat>().unwrap(), ReportFormat::Jsonl);
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert!("html".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_save_jsonl() {
        let dir = TempDir::new().unwrap();
        let path =
            ReportGenerator::save_findings(&sample_findings(), dir.path(), ReportFormat::Jsonl)
                .unwrap();
        assert_eq!(path.extension().unwrap(), "jsonl");
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let first: Finding = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first.finding_type, FindingType::SecurityHeaderMissingCsp);
    }

    #[test]
    fn test_save_json_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out/reports");
        let path =
            ReportGenerator::save_findings(&sample_findings(), &nested, ReportFormat::Json).unwrap();
        let parsed: Vec<Finding> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_bursts_reload() {
        let dir = TempDir::new().unwrap();
        let path = ReportGenerator::save_bursts(&[sample_summary()], dir.path()).unwrap();
        let loaded = ReportGenerator::load_bursts(&path).unwrap();
        assert_eq!(loaded, vec![sample_summary()]);
    }

    #[test]
    fn test_load_single_and_lines() {
        let dir = TempDir::new().unwrap();
        let line = serde_json::to_string(&sample_summary()).unwrap();

        let single = dir.path().join("single.json");
        fs::write(&single, &line).unwrap();
        assert_eq!(ReportGenerator::load_bursts(&single).unwrap().len(), 1);

        let lines = dir.path().join("many.jsonl");
        fs::write(&lines, format!("{}\n{}\n", line, line)).unwrap();
        assert_eq!(ReportGenerator::load_bursts(&lines).unwrap().len(), 2);
    }

    #[test]
    fn test_load_empty_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, "\n").unwrap();
        assert!(ReportGenerator::load_bursts(&path).is_err());
    }
}
