use crate::config::EngineKind;
use crate::orchestrator::{ScanRequest, ValidatedRequest};
use crate::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vulnhunter")]
#[command(about = "Service vulnerability correlation scanner")]
#[command(long_about = r#"
VulnHunter identifies the services a host exposes and correlates each one
against public vulnerability databases (CIRCL, NVD). It can optionally probe
exposed web endpoints for common web-application weaknesses.

WARNING: This tool should only be used on networks and systems you own or
have explicit permission to test. Unauthorized scanning may be illegal.

Usage Examples:
  vulnhunter --host 192.168.1.100                # Scan ports 1-1000
  vulnhunter --host 192.168.1.100 -p 22,80,443   # Specific ports
  vulnhunter --host example.com --web            # Include web probes
  vulnhunter                                     # Interactive prompt
  vulnhunter serve --bind 127.0.0.1:5000         # HTTP API
"#)]
#[command(version)]
#[command(author)]
pub struct Cli {
    /// Target IP address or hostname
    #[arg(long = "host", value_name = "TARGET")]
    pub target: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Port specification (e.g., 80,443 or 1-1000)
    #[arg(short, long, value_name = "PORTS")]
    pub ports: Option<String>,

    /// Probe web endpoints on ports 80, 443 and 8080
    #[arg(long)]
    pub web: bool,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "VULNHUNTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output directory for reports
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Service identification engine
    #[arg(long, value_enum)]
    pub engine: Option<EngineArg>,

    /// Overall scan deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve scans over HTTP (POST /scan)
    Serve {
        /// Listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum EngineArg {
    /// nmap service detection
    Nmap,
    /// Built-in TCP connect scan with banner grabbing
    Connect,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Nmap => EngineKind::Nmap,
            EngineArg::Connect => EngineKind::Connect,
        }
    }
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// The request described by command-line flags, if a host was given.
    pub fn scan_request(&self) -> Option<ScanRequest> {
        self.target.as_ref().map(|target| ScanRequest {
            target: Some(target.clone()),
            ports: self.ports.clone(),
            web_scan: Some(self.web),
        })
    }
}

/// Ask for target, ports and the web-scan flag. An empty port answer takes
/// `default_ports`.
pub fn prompt_request<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    default_ports: &str,
) -> Result<ValidatedRequest> {
    let target = ask(input, output, "Target (IP or hostname): ")?;
    let ports = ask(input, output, &format!("Ports [{}]: ", default_ports))?;
    let web = ask(input, output, "Web scan? (y/n) [n]: ")?;

    ScanRequest {
        target: Some(target),
        ports: Some(ports),
        web_scan: Some(matches!(web.to_lowercase().as_str(), "y" | "yes")),
    }
    .validate_with_default(default_ports)
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
