//! VulnHunter - Service Vulnerability Correlation Scanner
//!
//! This library discovers the services exposed by a host, correlates every
//! identified service against several independent vulnerability-intelligence
//! sources (CIRCL, NVD), and optionally probes exposed web endpoints for
//! common web-application weaknesses.
//!
//! # Warning
//! This tool is designed for ethical security assessment purposes only. Users
//! are responsible for ensuring they have proper authorization before scanning
//! any networks or systems.

pub mod cli;
pub mod config;
pub mod correlation;
pub mod discovery;
pub mod display;
pub mod error;
pub mod governor;
pub mod http;
pub mod orchestrator;
pub mod reporting;
pub mod scan_engine;
pub mod server;
pub mod sources;
pub mod utils;
pub mod web_scan;

pub use error::{Result, ScanError};

/// Common types and traits used throughout the application
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::fmt;
    use std::time::Duration;

    /// Sentinel used by scan engines for an undetermined version or product.
    pub const UNKNOWN: &str = "?";

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum PortState {
        Open,
        Closed,
        Filtered,
    }

    impl PortState {
        /// Map an nmap state string. Compound states such as `open|filtered`
        /// are treated as filtered since the port could not be confirmed open.
        pub fn from_nmap(state: &str) -> Self {
            match state {
                "open" => PortState::Open,
                "closed" => PortState::Closed,
                _ => PortState::Filtered,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct ServiceIdentification {
        pub port: u16,
        pub state: PortState,
        pub service: String,
        pub version: String,
        pub banner: String,
        pub cpe: Option<String>,
    }

    impl ServiceIdentification {
        pub fn is_open(&self) -> bool {
            self.state == PortState::Open
        }

        /// Build the lookup query for this service: the product banner when
        /// the engine identified one, otherwise the service name.
        pub fn query(&self) -> SourceQuery {
            let product = if is_known(&self.banner) {
                self.banner.clone()
            } else {
                self.service.clone()
            };
            let version = if is_known(&self.version) {
                self.version.clone()
            } else {
                String::new()
            };
            SourceQuery { product, version }
        }
    }

    fn is_known(value: &str) -> bool {
        let value = value.trim();
        !value.is_empty() && value != UNKNOWN
    }

    /// Port-keyed service inventory for one scan run.
    pub type ServiceInventory = BTreeMap<u16, ServiceIdentification>;

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    pub enum SourceId {
        #[serde(rename = "CIRCL")]
        Circl,
        #[serde(rename = "NVD")]
        Nvd,
    }

    impl fmt::Display for SourceId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SourceId::Circl => write!(f, "CIRCL"),
                SourceId::Nvd => write!(f, "NVD"),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct VulnerabilityRecord {
        pub id: String,
        pub summary: String,
        pub cvss: f64,
        pub source: SourceId,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
    pub struct SourceQuery {
        pub product: String,
        pub version: String,
    }

    impl SourceQuery {
        pub fn new(product: impl Into<String>, version: impl Into<String>) -> Self {
            Self {
                product: product.into(),
                version: version.into(),
            }
        }

        /// Single keyword string for sources that search free text.
        pub fn keyword(&self) -> String {
            format!("{} {}", self.product.trim(), self.version.trim())
                .trim()
                .to_string()
        }
    }

    impl fmt::Display for SourceQuery {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.keyword())
        }
    }

    /// Ranked, deduplicated records for one service.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    #[serde(transparent)]
    pub struct AggregatedResult(Vec<VulnerabilityRecord>);

    impl AggregatedResult {
        pub(crate) fn from_ranked(records: Vec<VulnerabilityRecord>) -> Self {
            Self(records)
        }

        pub fn records(&self) -> &[VulnerabilityRecord] {
            &self.0
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        pub fn iter(&self) -> std::slice::Iter<'_, VulnerabilityRecord> {
            self.0.iter()
        }

        pub fn into_records(self) -> Vec<VulnerabilityRecord> {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Severity {
        Low,
        Medium,
        High,
        Critical,
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct WebFinding {
        pub endpoint: String,
        pub name: String,
        pub severity: Severity,
        pub description: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        pub payload: Option<String>,
    }

    /// Endpoint-keyed web findings, in probe order per endpoint.
    pub type WebFindings = BTreeMap<String, Vec<WebFinding>>;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ScanReport {
        pub scan_id: String,
        pub target: String,
        pub timestamp: DateTime<Utc>,
        pub services: ServiceInventory,
        pub vulnerabilities: BTreeMap<u16, AggregatedResult>,
        pub web_findings: WebFindings,
        /// Elapsed wall time in seconds.
        pub scan_time: f64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        pub error: Option<String>,
    }

    impl ScanReport {
        pub fn elapsed(&self) -> Duration {
            Duration::from_secs_f64(self.scan_time.max(0.0))
        }

        pub fn total_vulnerabilities(&self) -> usize {
            self.vulnerabilities.values().map(AggregatedResult::len).sum()
        }

        pub fn total_web_findings(&self) -> usize {
            self.web_findings.values().map(Vec::len).sum()
        }
    }
}
