use crate::config::Config;
use crate::scan_engine::ScanEngine;
use crate::types::{PortState, ServiceIdentification, ServiceInventory, UNKNOWN};
use crate::{Result, ScanError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// TCP connect scan with banner grabbing, used when nmap is unavailable.
pub struct ConnectScanEngine {
    threads: usize,
    connect_timeout: Duration,
    banner_timeout: Duration,
    banners: BannerParser,
}

impl ConnectScanEngine {
    pub fn new(threads: usize, connect_timeout: Duration, banner_timeout: Duration) -> Self {
        Self {
            threads: threads.max(1),
            connect_timeout,
            banner_timeout,
            banners: BannerParser::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.scan.threads,
            config.tcp_connect_timeout(),
            config.banner_timeout(),
        )
    }

    async fn resolve(&self, target: &str) -> Result<IpAddr> {
        if let Ok(ip) = target.parse::<IpAddr>() {
            return Ok(ip);
        }

        lookup_host(format!("{}:0", target))
            .await
            .map_err(|e| ScanError::ScanEngineFailure(format!("Failed to resolve {}: {}", target, e)))?
            .map(|addr| addr.ip())
            .next()
            .ok_or_else(|| ScanError::ScanEngineFailure(format!("No address found for {}", target)))
    }

    /// Scan a single TCP port; `None` when the port is closed or silent.
    async fn scan_tcp_port(&self, ip: IpAddr, port: u16) -> Option<ServiceIdentification> {
        let addr = SocketAddr::new(ip, port);

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("TCP Port {}:{} is open", ip, port);
                let banner = self.grab_banner(stream, port).await;
                Some(self.banners.identify(port, banner.as_deref()))
            }
            // Refused or timed out
            _ => None,
        }
    }

    async fn grab_banner(&self, mut stream: TcpStream, port: u16) -> Option<String> {
        let probe: Option<&[u8]> = match port {
            80 | 8000 | 8080 | 8888 => Some(b"HEAD / HTTP/1.0\r\n\r\n"),
            23 => Some(b"\r\n"),
            // Banner-first protocols and TLS
            _ => None,
        };

        if let Some(probe) = probe {
            if let Err(e) = stream.write_all(probe).await {
                debug!("Probe write to port {} failed: {}", port, e);
                return None;
            }
        }

        let mut buffer = vec![0; 1024];
        match timeout(self.banner_timeout, stream.read(&mut buffer)).await {
            Ok(Ok(n)) if n > 0 => {
                let banner = String::from_utf8_lossy(&buffer[..n]).trim().to_string();
                debug!("Banner from port {}: {}", port, banner);
                Some(banner).filter(|b| !b.is_empty())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ScanEngine for ConnectScanEngine {
    async fn scan(&self, target: &str, ports: &str) -> Result<ServiceInventory> {
        let ports = parse_port_range(ports)?;
        let ip = self.resolve(target).await?;
        info!("Connect scan of {} ({}) over {} ports", target, ip, ports.len());

        let found = stream::iter(ports)
            .map(|port| self.scan_tcp_port(ip, port))
            .buffer_unordered(self.threads)
            .collect::<Vec<_>>()
            .await;

        Ok(found
            .into_iter()
            .flatten()
            .map(|service| (service.port, service))
            .collect())
    }
}

/// Parse a port specification such as `22`, `1-1000` or `22,80,8000-8100`.
pub fn parse_port_range(range: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in range.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(ScanError::InvalidInput(format!(
                    "Start port cannot be greater than end port: {}",
                    part
                )));
            }
            ports.extend(start..=end);
        } else {
            ports.push(parse_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(ScanError::InvalidInput(format!("No ports in specification '{}'", range)));
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_port(value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ScanError::InvalidInput(format!("Invalid port: {}", value))),
    }
}

/// Conventional service name for a well-known TCP port.
pub fn well_known_service(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 | 8000 | 8080 | 8888 => "http",
        110 => "pop3",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 | 8443 => "https",
        445 => "microsoft-ds",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        6379 => "redis",
        _ => "unknown",
    }
}

/// Product and version patterns for HTTP, SSH and FTP banners, compiled once
/// per engine.
///
/// - HTTP: `Server: Apache/2.4.41 (Ubuntu)` gives `("Apache", "2.4.41")`
/// - SSH: `SSH-2.0-OpenSSH_8.2p1 Ubuntu` gives `("OpenSSH", "8.2p1")`
/// - FTP: `220 (vsFTPd 3.0.3)` gives `("vsFTPd", "3.0.3")`
pub struct BannerParser {
    patterns: Vec<Regex>,
}

impl BannerParser {
    pub fn new() -> Self {
        let patterns = [
            r"(?im)^server:\s*([A-Za-z][\w.-]*?)/(\d[\w.-]*)",
            r"^SSH-[\d.]+-([A-Za-z][A-Za-z-]*)_([\w.]+)",
            r"\b(vsFTPd|ProFTPD|Pure-FTPd|FileZilla Server)[ /]v?(\d[\w.]*)",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect();

        Self { patterns }
    }

    pub fn extract(&self, banner: &str) -> Option<(String, String)> {
        self.patterns.iter().find_map(|re| {
            let caps = re.captures(banner)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
    }

    /// Build the identification for an open port from its banner, if any.
    pub fn identify(&self, port: u16, banner: Option<&str>) -> ServiceIdentification {
        let (product, version) = banner
            .and_then(|b| self.extract(b))
            .unwrap_or_else(|| (UNKNOWN.to_string(), UNKNOWN.to_string()));

        ServiceIdentification {
            port,
            state: PortState::Open,
            service: well_known_service(port).to_string(),
            version,
            banner: product,
            cpe: None,
        }
    }
}

impl Default for BannerParser {
    fn default() -> Self {
        Self::new()
    }
}
