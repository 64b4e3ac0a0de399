//! End-to-end scan flow: inventory, per-port correlation, web probes, report.

use crate::config::Config;
use crate::correlation::CorrelationEngine;
use crate::scan_engine::{engine_from_config, ScanEngine};
use crate::types::{AggregatedResult, ScanReport, ServiceInventory, WebFindings};
use crate::web_scan::{web_endpoints, HttpWebProber, WebProber};
use crate::{Result, ScanError};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use uuid::Uuid;

pub const DEFAULT_PORTS: &str = "1-1000";

/// A scan request as received at the CLI prompt or HTTP boundary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub web_scan: Option<bool>,
}

/// A request that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub target: String,
    pub ports: String,
    pub web_scan: bool,
}

impl ScanRequest {
    pub fn validate(&self) -> Result<ValidatedRequest> {
        self.validate_with_default(DEFAULT_PORTS)
    }

    /// Validate, filling in `default_ports` when the request names none.
    pub fn validate_with_default(&self, default_ports: &str) -> Result<ValidatedRequest> {
        let target = self
            .target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ScanError::InvalidInput("Target required".to_string()))?;

        let ports = self
            .ports
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(default_ports);

        Ok(ValidatedRequest {
            target: target.to_string(),
            ports: ports.to_string(),
            web_scan: self.web_scan.unwrap_or(false),
        })
    }
}

pub struct ScanOrchestrator {
    engine: Arc<dyn ScanEngine>,
    correlation: Arc<CorrelationEngine>,
    web: Option<Arc<dyn WebProber>>,
    web_ports: Vec<u16>,
    deadline: Option<Duration>,
}

impl ScanOrchestrator {
    pub fn new(engine: Arc<dyn ScanEngine>, correlation: Arc<CorrelationEngine>) -> Self {
        Self {
            engine,
            correlation,
            web: None,
            web_ports: vec![80, 443, 8080],
            deadline: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let correlation = Arc::new(CorrelationEngine::from_config(config)?);
        let web: Arc<dyn WebProber> = Arc::new(HttpWebProber::from_config(config)?);

        let mut orchestrator = Self::new(engine_from_config(config), correlation)
            .with_web_prober(web)
            .with_web_ports(config.web_scan.ports.clone());
        orchestrator.deadline = config.scan_deadline();
        Ok(orchestrator)
    }

    pub fn with_web_prober(mut self, prober: Arc<dyn WebProber>) -> Self {
        self.web = Some(prober);
        self
    }

    pub fn with_web_ports(mut self, ports: Vec<u16>) -> Self {
        self.web_ports = ports;
        self
    }

    /// Bound the correlation and web phases; unfinished work is dropped.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run one scan. Always produces a report; engine failures are recorded
    /// in [`ScanReport::error`] with empty mappings.
    pub async fn run(&self, target: &str, ports: &str, web_scan: bool) -> ScanReport {
        let start = Instant::now();
        let scan_id = Uuid::new_v4().to_string();
        info!("Scan {} started: {} ports {}", scan_id, target, ports);

        let mut report = ScanReport {
            scan_id,
            target: target.to_string(),
            timestamp: Utc::now(),
            services: ServiceInventory::new(),
            vulnerabilities: BTreeMap::new(),
            web_findings: WebFindings::new(),
            scan_time: 0.0,
            error: None,
        };

        match self.engine.scan(target, ports).await {
            Ok(services) => report.services = services,
            Err(e) => {
                error!("Scan engine failed for {}: {}", target, e);
                report.error = Some(e.to_string());
                report.scan_time = start.elapsed().as_secs_f64();
                return report;
            }
        }

        let phases = async {
            let vulnerabilities = self.correlate_open_ports(&report.services).await;
            let web_findings = if web_scan {
                self.probe_web(target, &report.services).await
            } else {
                WebFindings::new()
            };
            (vulnerabilities, web_findings)
        };

        let outcome = match self.deadline {
            Some(limit) => tokio::time::timeout(limit.saturating_sub(start.elapsed()), phases)
                .await
                .ok(),
            None => Some(phases.await),
        };

        match outcome {
            Some((vulnerabilities, web_findings)) => {
                report.vulnerabilities = vulnerabilities;
                report.web_findings = web_findings;
            }
            None => {
                warn!("Scan {} hit its deadline; partial results dropped", report.scan_id);
                report.error = Some(ScanError::Timeout { operation: "scan".to_string() }.to_string());
            }
        }

        report.scan_time = start.elapsed().as_secs_f64();
        info!(
            "Scan {} finished in {:.2}s: {} services, {} vulnerabilities, {} web findings",
            report.scan_id,
            report.scan_time,
            report.services.len(),
            report.total_vulnerabilities(),
            report.total_web_findings()
        );
        report
    }

    /// One correlation task per open port. Dropping the set aborts any task
    /// still running.
    async fn correlate_open_ports(&self, services: &ServiceInventory) -> BTreeMap<u16, AggregatedResult> {
        let mut tasks = JoinSet::new();

        for service in services.values() {
            if !service.is_open() {
                debug!("Skipping port {} ({:?})", service.port, service.state);
                continue;
            }
            let port = service.port;
            let query = service.query();
            let correlation = Arc::clone(&self.correlation);
            tasks.spawn(async move { (port, correlation.correlate(&query).await) });
        }

        let mut vulnerabilities = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((port, result)) => {
                    vulnerabilities.insert(port, result);
                }
                Err(e) => warn!("Correlation task failed: {}", e),
            }
        }
        vulnerabilities
    }

    async fn probe_web(&self, target: &str, services: &ServiceInventory) -> WebFindings {
        let prober = match &self.web {
            Some(prober) => prober,
            None => {
                debug!("Web scan requested but no prober configured");
                return WebFindings::new();
            }
        };

        let open_ports = services.values().filter(|s| s.is_open()).map(|s| s.port);
        let endpoints = web_endpoints(target, open_ports, &self.web_ports);
        if endpoints.is_empty() {
            info!("No web endpoints among open ports");
            return WebFindings::new();
        }

        prober.probe(&endpoints).await
    }
}
