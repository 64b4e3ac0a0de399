use crate::types::{ScanReport, Severity};
use crate::utils::time::format_duration;
use colored::*;

const TABLE_CVE_ROWS: usize = 5;

/// Console rendering for scan reports
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode { return; }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode { return; }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode { return; }

        if self.use_colors {
            println!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            println!("[!] {}", message);
        }
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode { return; }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode { return; }

        let width = title.chars().count().max(subtitle.map_or(0, |s| s.chars().count()));
        if self.use_colors {
            println!();
            println!("  {}", format!("┌{}┐", "─".repeat(width + 2)).bright_cyan());
            println!("  {} {} {}", "│".bright_cyan(), format!("{:^width$}", title, width = width).bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!("  {} {} {}", "│".bright_cyan(), format!("{:^width$}", sub, width = width).bright_black(), "│".bright_cyan());
            }
            println!("  {}", format!("└{}┘", "─".repeat(width + 2)).bright_cyan());
            println!();
        } else {
            let border = "=".repeat(width + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }

    /// Port / service / version / CVE table, one row per inventory entry
    pub fn print_service_table(&self, report: &ScanReport) {
        if self.quiet_mode { return; }

        println!();
        self.print_section_header("[OPEN PORTS & SERVICES]");

        if report.services.is_empty() {
            self.print_warning("No services identified");
            return;
        }

        println!("  {:<7} {:<10} {:<18} {:<22} {}", "PORT", "STATE", "SERVICE", "VERSION", "CVEs");
        for (port, service) in &report.services {
            let cves: Vec<String> = report
                .vulnerabilities
                .get(port)
                .map(|result| {
                    result
                        .iter()
                        .take(TABLE_CVE_ROWS)
                        .map(|v| self.paint_cve(&v.id, v.cvss))
                        .collect()
                })
                .unwrap_or_default();
            let extra = report
                .vulnerabilities
                .get(port)
                .map_or(0, |r| r.len().saturating_sub(TABLE_CVE_ROWS));

            let version = format!("{} {}", service.banner, service.version);
            let state = format!("{:?}", service.state).to_lowercase();
            let first = cves.first().cloned().unwrap_or_else(|| "None".to_string());
            println!(
                "  {:<7} {:<10} {:<18} {:<22} {}",
                port,
                state,
                service.service.truncate_with_ellipsis(18),
                version.trim().truncate_with_ellipsis(22),
                first
            );
            for cve in cves.iter().skip(1) {
                println!("  {:<7} {:<10} {:<18} {:<22} {}", "", "", "", "", cve);
            }
            if extra > 0 {
                println!("  {:<7} {:<10} {:<18} {:<22} ... {} more", "", "", "", "", extra);
            }
        }
    }

    pub fn print_web_findings(&self, report: &ScanReport) {
        if self.quiet_mode || report.web_findings.is_empty() { return; }

        println!();
        self.print_section_header("[WEB VULNERABILITIES]");
        println!("  {:<32} {:<42} {}", "URL", "VULNERABILITY", "SEVERITY");
        for (url, findings) in &report.web_findings {
            for finding in findings {
                println!(
                    "  {:<32} {:<42} {}",
                    url.truncate_with_ellipsis(32),
                    finding.name.truncate_with_ellipsis(42),
                    self.paint_severity(finding.severity)
                );
            }
        }
    }

    pub fn print_scan_summary(&self, report: &ScanReport) {
        if self.quiet_mode { return; }

        println!();
        self.print_section_header("SCAN SUMMARY");
        let open = report.services.values().filter(|s| s.is_open()).count();
        println!("  Target:           {}", report.target);
        println!("  Scan ID:          {}", report.scan_id);
        println!("  Open services:    {}", open);
        println!("  Vulnerabilities:  {}", report.total_vulnerabilities());
        println!("  Web findings:     {}", report.total_web_findings());
        println!("  Duration:         {}", format_duration(report.elapsed()));
        if let Some(error) = &report.error {
            self.print_error(&format!("Scan error: {}", error));
        }
        println!();
    }

    fn paint_cve(&self, id: &str, cvss: f64) -> String {
        let label = format!("{} ({:.1})", id, cvss);
        if !self.use_colors {
            return label;
        }
        let color = match cvss {
            score if score >= 9.0 => Color::BrightRed,
            score if score >= 7.0 => Color::Red,
            score if score >= 4.0 => Color::Yellow,
            _ => Color::Green,
        };
        label.color(color).to_string()
    }

    fn paint_severity(&self, severity: Severity) -> String {
        let label = severity.to_string();
        if !self.use_colors {
            return label;
        }
        let color = match severity {
            Severity::Critical => Color::BrightRed,
            Severity::High => Color::Red,
            Severity::Medium => Color::Yellow,
            Severity::Low => Color::Green,
        };
        label.color(color).bold().to_string()
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

trait StringExt {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;
}

impl StringExt for str {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            self.to_string()
        } else {
            let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
