//! Minimal HTTP front-end: `POST /scan` runs one scan and returns its report.

use crate::orchestrator::{ScanOrchestrator, ScanRequest, DEFAULT_PORTS};
use crate::reporting::ReportGenerator;
use crate::{Result, ScanError};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info, warn};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct ScanServer {
    orchestrator: Arc<ScanOrchestrator>,
    reports: Option<ReportGenerator>,
    default_ports: String,
}

impl ScanServer {
    pub fn new(orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self {
            orchestrator,
            reports: None,
            default_ports: DEFAULT_PORTS.to_string(),
        }
    }

    /// Ports scanned when a request omits `ports`.
    pub fn with_default_ports(mut self, ports: impl Into<String>) -> Self {
        self.default_ports = ports.into();
        self
    }

    /// Persist every served report as well as returning it.
    pub fn with_reports(mut self, reports: ReportGenerator) -> Self {
        self.reports = Some(reports);
        self
    }

    pub async fn serve(self, bind: &str) -> Result<()> {
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| ScanError::InvalidInput(format!("Invalid bind address {}: {}", bind, e)))?;

        let state = Arc::new(self);
        let make_svc = make_service_fn(move |_conn| {
            let state = Arc::clone(&state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(state.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        info!("Listening on http://{}", addr);

        server
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            })
            .await?;
        Ok(())
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, "/scan") => self.handle_scan(req).await,
            (method, path) => {
                warn!("No route for {} {}", method, path);
                json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" }))
            }
        }
    }

    async fn handle_scan(&self, req: Request<Body>) -> Response<Body> {
        let body = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => body,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Failed to read body: {}", e)),
        };

        let request: ScanRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e)),
        };

        let request = match request.validate_with_default(&self.default_ports) {
            Ok(request) => request,
            Err(ScanError::InvalidInput(message)) => return error_response(StatusCode::BAD_REQUEST, &message),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        let report = self
            .orchestrator
            .run(&request.target, &request.ports, request.web_scan)
            .await;

        if let Some(reports) = &self.reports {
            if let Err(e) = reports.generate_report(&report).await {
                error!("Failed to write report for {}: {}", report.target, e);
            }
        }

        match serde_json::to_value(&report) {
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &json!({ "error": message }))
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
