//! Scan engines producing the per-port service inventory.
//!
//! The default engine shells out to `nmap` with service detection and reads
//! its XML report from stdout. A pure TCP connect engine lives in
//! [`crate::discovery`] for hosts without nmap installed.

use crate::config::{Config, EngineKind};
use crate::discovery::ConnectScanEngine;
use crate::types::{PortState, ServiceIdentification, ServiceInventory, UNKNOWN};
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

#[async_trait]
pub trait ScanEngine: Send + Sync {
    /// Identify services on `target` over the port specification `ports`.
    async fn scan(&self, target: &str, ports: &str) -> Result<ServiceInventory>;
}

/// Pick the engine named in the configuration.
pub fn engine_from_config(config: &Config) -> Arc<dyn ScanEngine> {
    match config.scan.engine {
        EngineKind::Nmap => Arc::new(NmapEngine::from_config(config)),
        EngineKind::Connect => Arc::new(ConnectScanEngine::from_config(config)),
    }
}

pub struct NmapEngine {
    binary: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl NmapEngine {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut engine = Self::new(config.scan.nmap_path.clone(), config.scan.nmap_args.clone());
        engine.timeout = config.engine_timeout();
        engine
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    fn command_args(&self, target: &str, ports: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "-p".to_string(),
            ports.to_string(),
            "-oX".to_string(),
            "-".to_string(),
            target.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn scan(&self, target: &str, ports: &str) -> Result<ServiceInventory> {
        let args = self.command_args(target, ports);
        info!("Running {} against {} (ports {})", self.binary, target, ports);
        debug!("{} {}", self.binary, args.join(" "));

        let start = Instant::now();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => timeout(limit, cmd.output()).await.map_err(|_| {
                ScanError::ScanEngineFailure(format!("{} timed out after {:?}", self.binary, limit))
            })?,
            None => cmd.output().await,
        }
        .map_err(|e| ScanError::ScanEngineFailure(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::ScanEngineFailure(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let inventory = parse_nmap_xml(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            "{} finished in {:.1}s with {} ports reported",
            self.binary,
            start.elapsed().as_secs_f64(),
            inventory.len()
        );
        Ok(inventory)
    }
}

/// Parse an nmap XML report (`-oX`) into a service inventory.
///
/// Only the fields the correlation pipeline needs are read. Missing service
/// names, products and versions become [`UNKNOWN`].
pub fn parse_nmap_xml(xml: &str) -> Result<ServiceInventory> {
    if !xml.contains("<nmaprun") {
        return Err(ScanError::ScanEngineFailure("output is not an nmap XML report".to_string()));
    }

    let port_re = compile(r"(?s)<port\s([^>]*)>(.*?)</port>")?;
    let state_re = compile(r"<state\s([^>]*?)/?>")?;
    let service_re = compile(r"<service\s([^>]*?)/?>")?;
    let cpe_re = compile(r"<cpe>([^<]*)</cpe>")?;
    let attr_re = compile(r#"([\w-]+)="([^"]*)""#)?;

    let attrs = |tag: &str| -> HashMap<String, String> {
        attr_re
            .captures_iter(tag)
            .map(|c| (c[1].to_string(), unescape(&c[2])))
            .collect()
    };

    let mut inventory = ServiceInventory::new();
    for block in port_re.captures_iter(xml) {
        let port_attrs = attrs(&block[1]);
        let port = match port_attrs.get("portid").and_then(|p| p.parse::<u16>().ok()) {
            Some(port) if port > 0 => port,
            _ => continue,
        };
        let body = &block[2];

        let state = state_re
            .captures(body)
            .and_then(|c| attrs(&c[1]).remove("state"))
            .map(|s| PortState::from_nmap(&s))
            .unwrap_or(PortState::Filtered);

        let service_attrs = service_re.captures(body).map(|c| attrs(&c[1])).unwrap_or_default();
        let field = |name: &str| {
            service_attrs
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };

        let cpe = cpe_re
            .captures(body)
            .map(|c| unescape(c[1].trim()))
            .filter(|c| !c.is_empty());

        inventory.insert(
            port,
            ServiceIdentification {
                port,
                state,
                service: field("name"),
                version: field("version"),
                banner: field("product"),
                cpe,
            },
        );
    }

    Ok(inventory)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ScanError::ScanEngineFailure(format!("bad pattern {}: {}", pattern, e)))
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
