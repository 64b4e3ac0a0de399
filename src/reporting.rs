use crate::config::{OutputFormat, ReportingConfig};
use crate::sources::truncate_summary;
use crate::types::ScanReport;
use crate::utils::sanitize_filename;
use crate::{Result, ScanError};
use log::{debug, info};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct ReportGenerator {
    config: ReportingConfig,
}

impl ReportGenerator {
    pub fn new(config: ReportingConfig) -> Self {
        Self { config }
    }

    /// `report_<target>_<YYYYmmdd_HHMMSS>`, without extension.
    pub fn base_filename(report: &ScanReport) -> String {
        format!(
            "report_{}_{}",
            sanitize_filename(&report.target),
            report.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    pub async fn generate_report(&self, report: &ScanReport) -> Result<Vec<PathBuf>> {
        let mut generated_files = Vec::new();

        fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to create output directory: {}", e)))?;

        let base_filename = Self::base_filename(report);

        for format in &self.config.formats {
            let file_path = match format {
                OutputFormat::Text => {
                    let path = self.config.output_dir.join(format!("{}.txt", base_filename));
                    self.generate_text_report(report, &path).await?;
                    path
                }
                OutputFormat::Json => {
                    let path = self.config.output_dir.join(format!("{}.json", base_filename));
                    self.generate_json_report(report, &path).await?;
                    path
                }
            };

            generated_files.push(file_path);
        }

        info!("Generated {} report files", generated_files.len());
        Ok(generated_files)
    }

    async fn generate_json_report(&self, report: &ScanReport, path: &Path) -> Result<()> {
        debug!("Generating JSON report: {}", path.display());

        let json_data = serde_json::to_string_pretty(report)?;
        fs::write(path, json_data)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write JSON report: {}", e)))?;

        Ok(())
    }

    async fn generate_text_report(&self, report: &ScanReport, path: &Path) -> Result<()> {
        debug!("Generating text report: {}", path.display());

        fs::write(path, self.render_text(report))
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write text report: {}", e)))?;

        Ok(())
    }

    pub fn render_text(&self, report: &ScanReport) -> String {
        let mut out = String::new();
        let width = self.config.text_summary_width;

        // Writing into a String cannot fail
        let _ = writeln!(out, "VulnHunter Report - {}", report.target);
        let _ = writeln!(out, "Scan ID: {}", report.scan_id);
        let _ = writeln!(out, "Generated: {}", report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Duration: {:.2}s", report.scan_time);
        if let Some(error) = &report.error {
            let _ = writeln!(out, "Error: {}", error);
        }
        let _ = writeln!(out, "{}\n", "=".repeat(70));

        let _ = writeln!(out, "[OPEN PORTS & SERVICES]");
        for (port, service) in &report.services {
            let _ = writeln!(out, "Port {}: {} {}", port, service.service, service.version);
            if let Some(result) = report.vulnerabilities.get(port) {
                for vuln in result.iter() {
                    let summary = truncate_summary(&vuln.summary, width);
                    let ellipsis = if summary.len() < vuln.summary.len() { "..." } else { "" };
                    let _ = writeln!(
                        out,
                        "  [CVE] {} (CVSS: {:.1}, {}) - {}{}",
                        vuln.id, vuln.cvss, vuln.source, summary, ellipsis
                    );
                }
            }
        }

        if !report.web_findings.is_empty() {
            let _ = writeln!(out, "\n[WEB VULNERABILITIES]");
            for (url, findings) in &report.web_findings {
                let _ = writeln!(out, "\nURL: {}", url);
                for finding in findings {
                    let _ = writeln!(out, "  [{}] {}: {}", finding.severity, finding.name, finding.description);
                }
            }
        }

        out
    }
}
