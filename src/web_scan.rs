use crate::config::Config;
use crate::types::{Severity, WebFinding, WebFindings};
use crate::{Result, ScanError};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info};
use reqwest::header::{HeaderMap, ORIGIN};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;

const XSS_PAYLOAD: &str = "<script>alert('VulnHunter_XSS_Test');</script>";
const SQLI_PAYLOAD: &str = "' OR 1=1--";
const SQL_ERROR_MARKER: &str = "error in your SQL syntax";
const PROBE_ORIGIN: &str = "https://attacker.com";

#[async_trait]
pub trait WebProber: Send + Sync {
    /// Probe each endpoint; endpoints without findings are left out of the map.
    async fn probe(&self, endpoints: &[String]) -> WebFindings;
}

/// Stateless request/response pattern checks against web endpoints.
pub struct HttpWebProber {
    client: Client,
}

impl HttpWebProber {
    pub fn new(timeout: Duration, user_agent: &str, verify_ssl: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ScanError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.web_request_timeout(),
            &config.web_scan.user_agent,
            config.web_scan.verify_ssl,
        )
    }

    /// Every check for one endpoint, in a fixed order.
    pub async fn probe_endpoint(&self, url: &str) -> Vec<WebFinding> {
        info!("Probing web endpoint {}", url);
        let mut findings = Vec::new();

        findings.extend(self.test_xss(url).await);
        findings.extend(self.test_sqli(url).await);
        findings.extend(self.test_cors(url).await);
        findings.extend(self.detect_vulnerable_tech(url).await);

        debug!("{}: {} findings", url, findings.len());
        findings
    }

    async fn fetch(&self, url: &str, query: &[(&str, &str)], headers: HeaderMap) -> Option<(HeaderMap, String)> {
        let response = match self.client.get(url).query(query).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{}: request failed: {}", url, e);
                return None;
            }
        };
        let headers = response.headers().clone();
        let body = response.text().await.ok()?;
        Some((headers, body))
    }

    async fn test_xss(&self, url: &str) -> Option<WebFinding> {
        let (_, body) = self.fetch(url, &[("q", XSS_PAYLOAD)], HeaderMap::new()).await?;
        body.contains(XSS_PAYLOAD).then(|| WebFinding {
            endpoint: url.to_string(),
            name: "Cross-Site Scripting (XSS)".to_string(),
            severity: Severity::High,
            description: "Reflected XSS vulnerability detected".to_string(),
            payload: Some(XSS_PAYLOAD.to_string()),
        })
    }

    async fn test_sqli(&self, url: &str) -> Option<WebFinding> {
        let (_, body) = self.fetch(url, &[("id", SQLI_PAYLOAD)], HeaderMap::new()).await?;
        body.contains(SQL_ERROR_MARKER).then(|| WebFinding {
            endpoint: url.to_string(),
            name: "SQL Injection".to_string(),
            severity: Severity::Critical,
            description: "Possible SQL injection vulnerability detected".to_string(),
            payload: Some(SQLI_PAYLOAD.to_string()),
        })
    }

    async fn test_cors(&self, url: &str) -> Option<WebFinding> {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(ORIGIN, reqwest::header::HeaderValue::from_static(PROBE_ORIGIN));

        let (headers, _) = self.fetch(url, &[], request_headers).await?;
        let allowed = headers.get("access-control-allow-origin")?.to_str().ok()?;
        (allowed == PROBE_ORIGIN).then(|| WebFinding {
            endpoint: url.to_string(),
            name: "Misconfigured CORS".to_string(),
            severity: Severity::Medium,
            description: "CORS misconfiguration allows arbitrary origin".to_string(),
            payload: None,
        })
    }

    async fn detect_vulnerable_tech(&self, url: &str) -> Vec<WebFinding> {
        match self.fetch(url, &[], HeaderMap::new()).await {
            Some((headers, body)) => {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                detect_technologies(url, &header("server"), &header("x-powered-by"), &body)
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl WebProber for HttpWebProber {
    async fn probe(&self, endpoints: &[String]) -> WebFindings {
        let results = join_all(endpoints.iter().map(|url| async move {
            (url.clone(), self.probe_endpoint(url).await)
        }))
        .await;

        results
            .into_iter()
            .filter(|(_, findings)| !findings.is_empty())
            .collect()
    }
}

/// Flag known-vulnerable server software from response headers and markup.
pub fn detect_technologies(url: &str, server: &str, powered_by: &str, body: &str) -> Vec<WebFinding> {
    let finding = |name: &str, severity: Severity, description: &str| WebFinding {
        endpoint: url.to_string(),
        name: name.to_string(),
        severity,
        description: description.to_string(),
        payload: None,
    };

    let mut findings = Vec::new();

    if server.to_lowercase().contains("apache/2.4.49") {
        findings.push(finding(
            "Apache Path Traversal (CVE-2021-41773)",
            Severity::Critical,
            "Vulnerable Apache version detected (2.4.49)",
        ));
    }

    if powered_by.to_lowercase().contains("php/5.6") {
        findings.push(finding(
            "PHP End-of-Life",
            Severity::High,
            "Outdated PHP version with known vulnerabilities",
        ));
    }

    for generator in meta_generators(body) {
        if generator.to_lowercase().contains("wordpress") {
            findings.push(finding(
                "WordPress Security Risks",
                Severity::Medium,
                "Common WordPress vulnerabilities may exist",
            ));
        }
    }

    findings
}

fn meta_generators(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse(r#"meta[name="generator"]"#) {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|tag| tag.value().attr("content"))
        .map(str::to_string)
        .collect()
}

/// Web endpoints for the open ports that conventionally serve HTTP.
pub fn web_endpoints(target: &str, open_ports: impl IntoIterator<Item = u16>, web_ports: &[u16]) -> Vec<String> {
    open_ports
        .into_iter()
        .filter(|port| web_ports.contains(port))
        .map(|port| {
            let scheme = if port == 443 { "https" } else { "http" };
            format!("{}://{}:{}", scheme, target, port)
        })
        .collect()
}
