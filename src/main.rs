use clap::Parser;
use env_logger::Env;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use vulnhunter::{
    cli::{self, Cli, Commands},
    config::Config,
    display::DisplayManager,
    orchestrator::{ScanOrchestrator, ValidatedRequest},
    reporting::ReportGenerator,
    server::ScanServer,
    utils::{progress, time::format_duration},
    Result,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level()))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);

    if !cli.quiet {
        display.print_banner(
            "VULNHUNTER - Service Vulnerability Scanner",
            Some("Authorized Testing Only"),
        );
        display.print_warning("Ensure you have proper permission before scanning any host.");
        println!();
    }

    let mut config = if let Some(config_path) = &cli.config {
        match Config::load_from_file(&config_path.to_string_lossy()) {
            Ok(config) => {
                display.print_success(&format!("Loaded configuration from {}", config_path.display()));
                config
            }
            Err(e) => {
                display.print_warning(&format!("Failed to load configuration: {}, using defaults", e));
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    // Apply CLI overrides to config
    if let Some(output) = &cli.output {
        config.reporting.output_dir = output.clone();
    }
    if let Some(engine) = cli.engine {
        config.scan.engine = engine.into();
    }
    if let Some(deadline) = cli.deadline {
        config.scan.deadline = Some(deadline);
    }

    let start = Instant::now();

    let result = match &cli.command {
        Some(Commands::Serve { bind }) => {
            let bind = bind.clone().unwrap_or_else(|| config.server.bind.clone());
            execute_serve(&config, &display, &bind).await
        }
        None => match request_from_cli(&cli, &config.scan.default_ports) {
            Ok(request) => execute_scan(&config, &display, &request, cli.quiet).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => display.print_success(&format!("Completed in {}", format_duration(start.elapsed()))),
        Err(e) => {
            display.print_error(&format!("Scan failed: {}", e));
            process::exit(1);
        }
    }
}

/// Flags when `--host` is given, otherwise the interactive prompt.
fn request_from_cli(cli: &Cli, default_ports: &str) -> Result<ValidatedRequest> {
    match cli.scan_request() {
        Some(request) => request.validate_with_default(default_ports),
        None => {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            cli::prompt_request(&mut input, &mut output, default_ports)
        }
    }
}

async fn execute_scan(
    config: &Config,
    display: &DisplayManager,
    request: &ValidatedRequest,
    quiet: bool,
) -> Result<()> {
    display.print_info(&format!(
        "Scanning {} on ports {}{}",
        request.target,
        request.ports,
        if request.web_scan { " (with web probes)" } else { "" }
    ));

    let orchestrator = ScanOrchestrator::from_config(config)?;

    let spinner = if quiet {
        progress::hidden()
    } else {
        progress::create_spinner(&format!("Scanning {}", request.target))
    };
    let report = orchestrator
        .run(&request.target, &request.ports, request.web_scan)
        .await;
    spinner.finish_and_clear();

    display.print_service_table(&report);
    display.print_web_findings(&report);
    display.print_scan_summary(&report);

    let reports = ReportGenerator::new(config.reporting.clone());
    for path in reports.generate_report(&report).await? {
        display.print_success(&format!("Report saved to {}", path.display()));
    }

    log::info!("Scan {} took {}", report.scan_id, format_duration(report.elapsed()));
    Ok(())
}

async fn execute_serve(config: &Config, display: &DisplayManager, bind: &str) -> Result<()> {
    display.print_section_header("HTTP API");
    display.print_info(&format!("POST http://{}/scan with {{\"target\": ..., \"ports\": ..., \"web_scan\": ...}}", bind));

    let orchestrator = Arc::new(ScanOrchestrator::from_config(config)?);
    ScanServer::new(orchestrator)
        .with_reports(ReportGenerator::new(config.reporting.clone()))
        .with_default_ports(config.scan.default_ports.clone())
        .serve(bind)
        .await
}
