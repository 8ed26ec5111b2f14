//! Goal server: HTTP surface for the admin console.
//!
//! Endpoints:
//! - `GET  /healthz`: liveness probe
//! - `GET  /status`: scope + latest snapshot summary
//! - `GET  /goals`: latest snapshot for the scope (404 when none)
//! - `POST /recompute`: run a goal recompute; admin-token guarded
//! - `GET  /distribution?days&filter&buckets&top`: raw distribution,
//!   display only, persists nothing
//!
//! A recompute is spawned onto the runtime, so it runs to completion
//! and persists its snapshot even if the requesting client disconnects
//! mid-flight. Because the store is append-only, concurrent recomputes
//! are safe; the read path resolves "current" by `computed_at`.

use crate::Pipeline;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pagepulse_analytics::ReportError;
use pagepulse_store::{GoalError, GoalParams};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::form_urlencoded;

struct ServerState {
    pipeline: Pipeline,
    admin_token: Option<String>,
}

pub async fn serve(
    pipeline: Pipeline,
    listen: SocketAddr,
    admin_token: Option<String>,
) -> Result<()> {
    let state = Arc::new(ServerState {
        pipeline,
        admin_token,
    });

    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {listen}: {e}"))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    eprintln!(
        "serve: listening on http://{bound} (scope={})",
        state.pipeline.goals.scope()
    );

    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("serve: connection error: {e}");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let resp = match (method, path.as_str()) {
        (Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n"),
        (Method::GET, "/status") => match status_payload(&state).await {
            Ok(v) => json_response(StatusCode::OK, &v),
            Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        (Method::GET, "/goals") => match state.pipeline.goals.latest().await {
            Ok(Some(snapshot)) => json_response(StatusCode::OK, &snapshot),
            Ok(None) => json_error(
                StatusCode::NOT_FOUND,
                &format!(
                    "no snapshot for scope `{}` yet",
                    state.pipeline.goals.scope()
                ),
            ),
            Err(e) => goal_error_response(&e),
        },
        (Method::GET, "/distribution") => {
            match handle_distribution(&state, req.uri().query()).await {
                Ok(v) => json_response(StatusCode::OK, &v),
                Err(e) => report_error_response(&e),
            }
        }
        (Method::POST, "/recompute") => {
            if let Err(resp) = require_admin(&req, &state) {
                return Ok(resp);
            }
            let body = req.into_body().collect().await?.to_bytes();
            let parsed: RecomputeRequest = if body.is_empty() {
                RecomputeRequest::default()
            } else {
                match serde_json::from_slice(&body) {
                    Ok(v) => v,
                    Err(e) => {
                        return Ok(json_error(
                            StatusCode::BAD_REQUEST,
                            &format!("failed to parse recompute request JSON: {e}"),
                        ));
                    }
                }
            };
            handle_recompute(&state, parsed).await
        }
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(resp)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RecomputeRequest {
    days: u32,
    filter_regex: String,
    exclude_bot_traffic: bool,
    outlier_filter: bool,
    page_size: Option<u32>,
}

impl Default for RecomputeRequest {
    fn default() -> Self {
        Self {
            days: 28,
            filter_regex: r"^/column/[^/]+/?$".to_string(),
            exclude_bot_traffic: false,
            outlier_filter: false,
            page_size: None,
        }
    }
}

async fn handle_recompute(
    state: &Arc<ServerState>,
    request: RecomputeRequest,
) -> Response<Full<Bytes>> {
    let params = GoalParams {
        days: request.days,
        filter_regex: request.filter_regex,
        exclude_bot_traffic: request.exclude_bot_traffic,
        outlier_filter: request.outlier_filter,
    };

    // Detached task: completes and persists even if the client goes away.
    let state = state.clone();
    let handle = tokio::spawn(async move {
        match request.page_size {
            Some(page_size) => {
                state
                    .pipeline
                    .goals
                    .compute_and_persist_paged(&params, page_size)
                    .await
            }
            None => state.pipeline.goals.compute_and_persist(&params).await,
        }
    });

    match handle.await {
        Ok(Ok(snapshot)) => json_response(StatusCode::OK, &snapshot),
        Ok(Err(e)) => goal_error_response(&e),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("recompute task failed: {e}"),
        ),
    }
}

#[derive(Debug, Serialize)]
struct DistributionPayload {
    days: u32,
    filter: String,
    pages: usize,
    histogram: Vec<pagepulse_stats::HistogramBucket>,
    top: Vec<pagepulse_analytics::ViewSample>,
}

async fn handle_distribution(
    state: &Arc<ServerState>,
    query: Option<&str>,
) -> Result<DistributionPayload, ReportError> {
    let mut days = 28u32;
    let mut filter = r"^/column/[^/]+/?$".to_string();
    let mut buckets = 10usize;
    let mut top = 10usize;

    for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "days" => {
                days = value
                    .parse()
                    .map_err(|_| ReportError::Config(format!("invalid days `{value}`")))?;
            }
            "filter" => filter = value.to_string(),
            "buckets" => {
                buckets = value
                    .parse()
                    .map_err(|_| ReportError::Config(format!("invalid buckets `{value}`")))?;
            }
            "top" => {
                top = value
                    .parse()
                    .map_err(|_| ReportError::Config(format!("invalid top `{value}`")))?;
            }
            other => {
                return Err(ReportError::Config(format!(
                    "unknown query parameter `{other}`"
                )));
            }
        }
    }

    let mut samples = state.pipeline.ingestor.fetch_views(days, &filter, false).await?;
    let counts: Vec<u64> = samples.iter().map(|s| s.views).collect();
    let histogram = pagepulse_stats::histogram(&counts, buckets);

    samples.sort_by(|a, b| b.views.cmp(&a.views));
    samples.truncate(top);

    Ok(DistributionPayload {
        days,
        filter,
        pages: counts.len(),
        histogram,
        top: samples,
    })
}

async fn status_payload(state: &Arc<ServerState>) -> Result<serde_json::Value> {
    let latest = state.pipeline.goals.latest().await?;
    Ok(serde_json::json!({
        "version": "pagepulse_status_v1",
        "scope": state.pipeline.goals.scope(),
        "admin_token_required": state.admin_token.is_some(),
        "latest": latest.map(|s| serde_json::json!({
            "base_goal": s.base_goal,
            "stretch_goal": s.stretch_goal,
            "sample_count": s.sample_count,
            "computed_at": s.computed_at.to_rfc3339(),
        })),
    }))
}

fn require_admin(
    req: &Request<Incoming>,
    state: &ServerState,
) -> Result<(), Response<Full<Bytes>>> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };

    let Some(header) = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "missing Authorization: Bearer <token>",
        ));
    };

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or("");
    if token != expected {
        return Err(json_error(StatusCode::UNAUTHORIZED, "invalid admin token"));
    }

    Ok(())
}

fn goal_error_response(e: &GoalError) -> Response<Full<Bytes>> {
    match e {
        GoalError::Report(report) => report_error_response(report),
        GoalError::Store(store) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &store.to_string())
        }
    }
}

fn report_error_response(e: &ReportError) -> Response<Full<Bytes>> {
    let status = match e {
        ReportError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    json_error(status, &e.to_string())
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}")))
        })
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let v = serde_json::json!({ "error": msg });
    json_response(status, &v)
}
