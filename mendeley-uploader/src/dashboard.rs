//! Local web dashboard: a small hyper server that starts and stops batches and
//! exposes the run status and recent log lines as JSON.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mendeley_uploader_core::batch::upload_batch;
use mendeley_uploader_core::ledger::Ledger;
use mendeley_uploader_core::monitor::RunMonitor;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::load_config::AppConfig;
use crate::mendeley::MendeleyClient;
use crate::oauth::OAuthClient;
use crate::telemetry::LogBuffer;

const INDEX_HTML: &str = include_str!("../static/index.html");

const ROUTES: &[&str] = &[
    "/",
    "/static/index.html",
    "/api/start-upload",
    "/api/stop",
    "/api/status",
    "/api/logs",
];

type HttpResponse = Response<Full<Bytes>>;

/// Everything a request handler or a background batch needs.
pub struct Dashboard {
    config: AppConfig,
    monitor: Arc<RunMonitor>,
    logs: LogBuffer,
    tokens: OAuthClient,
    library: MendeleyClient,
    ledger: Ledger,
    /// The most recently started batch, awaited on shutdown.
    batch: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(config: AppConfig, logs: LogBuffer) -> Arc<Self> {
        Arc::new(Self {
            monitor: RunMonitor::new(),
            tokens: OAuthClient::from_config(&config),
            library: MendeleyClient::from_config(&config),
            ledger: Ledger::new(config.ledger_path.clone()),
            config,
            logs,
            batch: Mutex::new(None),
        })
    }

    pub fn monitor(&self) -> &Arc<RunMonitor> {
        &self.monitor
    }
}

#[derive(Debug, Default, Deserialize)]
struct StartUploadRequest {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Serialize)]
struct StartUploadResponse {
    message: &'static str,
    path: String,
    run_id: String,
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(dashboard: Arc<Dashboard>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let addr = listener
        .local_addr()
        .context("Failed to read dashboard listener address")?;
    info!("Dashboard listening on http://{}", addr);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping dashboard");
                if dashboard.monitor.request_stop() {
                    info!("Asked the running batch to stop, waiting for the current file");
                }
                let running = dashboard
                    .batch
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take();
                if let Some(handle) = running {
                    if let Err(e) = handle.await {
                        error!(error = %e, "Batch task did not finish cleanly");
                    }
                }
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let dashboard = dashboard.clone();
                tokio::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(
                            io,
                            hyper::service::service_fn(move |req| handle_request(req, dashboard.clone())),
                        )
                        .await
                    {
                        warn!(%peer, error = ?err, "Error serving connection");
                    }
                });
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    dashboard: Arc<Dashboard>,
) -> Result<HttpResponse, hyper::Error> {
    let span = tracing::debug_span!(
        "handle_request",
        http.method = %req.method(),
        url.path = %req.uri().path(),
    );

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    async move {
        let response = match (&method, path.as_str()) {
            (&Method::GET, "/" | "/static/index.html") => html(INDEX_HTML),
            (&Method::GET, "/api/status") => json(StatusCode::OK, &dashboard.monitor.snapshot()),
            (&Method::GET, "/api/logs") => {
                json(StatusCode::OK, &json!({ "logs": dashboard.logs.lines() }))
            }
            (&Method::POST, "/api/stop") => {
                let message = if dashboard.monitor.request_stop() {
                    info!("Stop requested from dashboard");
                    "Stopping..."
                } else {
                    "Not running"
                };
                json(StatusCode::OK, &json!({ "message": message }))
            }
            (&Method::POST, "/api/start-upload") => start_upload(req, dashboard).await?,
            (_, known) if ROUTES.contains(&known) => {
                detail(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => detail(StatusCode::NOT_FOUND, "Not found"),
        };
        Ok::<_, hyper::Error>(response)
    }
    .instrument(span)
    .await
}

async fn start_upload(
    req: Request<Incoming>,
    dashboard: Arc<Dashboard>,
) -> Result<HttpResponse, hyper::Error> {
    let body = req.into_body().collect().await?.to_bytes();
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartUploadRequest::default()
    } else {
        match serde_json::from_slice::<StartUploadRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(detail(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid request body: {e}"),
                ))
            }
        }
    };

    if dashboard.monitor.is_running() {
        return Ok(detail(StatusCode::BAD_REQUEST, "Job already running."));
    }

    let target = match request
        .path
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| dashboard.config.upload_dir.clone())
    {
        Some(target) => target,
        None => {
            return Ok(detail(
                StatusCode::BAD_REQUEST,
                "No path given and no upload directory configured.",
            ))
        }
    };

    if !target.exists() {
        warn!(target = %target.display(), "Requested upload path does not exist");
        return Ok(detail(StatusCode::NOT_FOUND, "Path not found."));
    }

    let Some(run) = dashboard.monitor.try_start() else {
        return Ok(detail(StatusCode::BAD_REQUEST, "Job already running."));
    };
    let run_id = run.run_id();
    info!(%run_id, target = %target.display(), "Upload started from dashboard");

    let response = StartUploadResponse {
        message: "Upload started",
        path: target.display().to_string(),
        run_id: run_id.to_string(),
    };

    let owner = dashboard.clone();
    let handle = tokio::spawn(async move {
        let d = &dashboard;
        match upload_batch(run, &d.config.batch, &d.tokens, &d.library, &d.ledger, &target).await {
            Ok(report) => info!(
                %run_id,
                succeeded = report.succeeded(),
                failed = report.failed(),
                skipped = report.skipped,
                stopped = report.stopped,
                "Batch finished"
            ),
            Err(e) => error!(%run_id, error = %e, "Batch aborted"),
        }
    });
    *owner.batch.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

    Ok(json(StatusCode::OK, &response))
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn html(page: &'static str) -> HttpResponse {
    with_body(StatusCode::OK, "text/html; charset=utf-8", Bytes::from_static(page.as_bytes()))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => with_body(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!(error = %e, "Failed to encode JSON response");
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from_static(br#"{"detail":"Internal error"}"#),
            )
        }
    }
}

fn detail(status: StatusCode, message: &str) -> HttpResponse {
    json(status, &json!({ "detail": message }))
}
