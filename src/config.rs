use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub retry: RetryConfig,
    pub correlation: CorrelationConfig,
    pub scan: ScanConfig,
    pub web_scan: WebScanConfig,
    pub reporting: ReportingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Query precedence; the first source's copy of a duplicate id wins.
    pub order: Vec<SourceKind>,
    pub circl: CirclConfig,
    pub nvd: NvdConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Circl,
    Nvd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CirclConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout: u64, // seconds
    pub min_interval_ms: u64, // 0 disables throttling
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NvdConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout: u64, // seconds
    pub results_per_page: u32,
    pub keyword_param: String,
    /// Environment variable holding the optional API key.
    pub api_key_env: String,
    pub min_interval_ms: u64,
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub max_results: usize,
    pub summary_limit: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub engine: EngineKind,
    pub default_ports: String,
    pub nmap_path: String,
    pub nmap_args: Vec<String>,
    pub engine_timeout: Option<u64>, // seconds
    pub threads: usize,
    pub tcp_connect_timeout: u64, // milliseconds
    pub banner_timeout: u64, // milliseconds
    pub deadline: Option<u64>, // seconds
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Nmap,
    Connect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebScanConfig {
    pub ports: Vec<u16>,
    pub request_timeout: u64, // seconds
    pub user_agent: String,
    pub verify_ssl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub output_dir: PathBuf,
    pub formats: Vec<OutputFormat>,
    /// Characters of each CVE summary printed in the text report.
    pub text_summary_width: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            order: vec![SourceKind::Circl, SourceKind::Nvd],
            circl: CirclConfig::default(),
            nvd: NvdConfig::default(),
        }
    }
}

impl Default for CirclConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://cve.circl.lu/api/search".to_string(),
            timeout: 10,
            min_interval_ms: 0,
            max_in_flight: None,
        }
    }
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://services.nvd.nist.gov/rest/json/cves/1.0".to_string(),
            timeout: 15,
            results_per_page: 20,
            keyword_param: "keyword".to_string(),
            api_key_env: "NVD_API_KEY".to_string(),
            // Published limit is 5 requests per 3 seconds
            min_interval_ms: 600,
            max_in_flight: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_results: 15,
            summary_limit: 500,
            user_agent: "VulnHunter/1.0".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Nmap,
            default_ports: "1-1000".to_string(),
            nmap_path: "nmap".to_string(),
            nmap_args: vec![
                "-sV".to_string(),
                "-T4".to_string(),
                "--script=banner,vulners".to_string(),
            ],
            engine_timeout: None,
            threads: 100,
            tcp_connect_timeout: 3000,
            banner_timeout: 3000,
            deadline: None,
        }
    }
}

impl Default for WebScanConfig {
    fn default() -> Self {
        Self {
            ports: vec![80, 443, 8080],
            request_timeout: 5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            verify_ssl: false,
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./results"),
            formats: vec![OutputFormat::Text, OutputFormat::Json],
            text_summary_width: 150,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Config {
    /// Layer a config file and `VULNHUNTER__*` environment variables over the defaults.
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VULNHUNTER").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| crate::ScanError::InvalidInput(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// NVD API key from the configured environment variable; empty values count as unset.
    pub fn nvd_api_key(&self) -> Option<String> {
        std::env::var(&self.sources.nvd.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    pub fn circl_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.circl.timeout)
    }

    pub fn nvd_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.nvd.timeout)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.retry.initial_backoff_ms)
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.tcp_connect_timeout)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.banner_timeout)
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        self.scan.engine_timeout.map(Duration::from_secs)
    }

    pub fn scan_deadline(&self) -> Option<Duration> {
        self.scan.deadline.map(Duration::from_secs)
    }

    pub fn web_request_timeout(&self) -> Duration {
        Duration::from_secs(self.web_scan.request_timeout)
    }
}
