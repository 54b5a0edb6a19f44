// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The HTTP front end: one route per view kind over the snapshot cache.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use thiserror::Error;

use crate::cache::{CacheError, SnapshotCache};
use crate::driver::vars::{canonical_name, parse_bool};
use crate::driver::{VarError, Variables, ViewKind};
use crate::render::{self, escape_html, Artifact, RenderError, Renderer};
use crate::report::ReportError;

/// Longest sample a request may ask for with `seconds`.
pub const MAX_SECONDS: u64 = 24 * 60 * 60;

/// Why a request failed. Each kind maps to one HTTP status.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WebError {
    /// A request parameter outside the view variables could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    BadParam {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
    /// A view variable was unknown or malformed.
    #[error(transparent)]
    Var(#[from] VarError),
    /// The snapshot could not be resolved, fetched or decoded.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The report could not be built from the snapshot.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The report could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// The raw snapshot could not be read back.
    #[error("reading snapshot: {0}")]
    Download(std::io::Error),
    /// The report task panicked or was cancelled.
    #[error("report task: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WebError {
    /// HTTP status the error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::BadParam { .. } | WebError::Var(_) | WebError::Report(_) => {
                StatusCode::BAD_REQUEST
            }
            WebError::Cache(CacheError::Resolution(_)) => StatusCode::NOT_FOUND,
            WebError::Cache(CacheError::Scratch(_) | CacheError::Task(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WebError::Cache(e) if e.is_upstream() => StatusCode::BAD_GATEWAY,
            WebError::Render(RenderError::BackendUnavailable(_)) => StatusCode::NOT_IMPLEMENTED,
            WebError::Render(RenderError::Report(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shared state of every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    cache: Arc<SnapshotCache>,
    renderer: Renderer,
    default_duration: Duration,
    vars: Variables,
}

impl AppState {
    /// State with default view variables. `default_duration` is used when a
    /// request does not pass `seconds`.
    pub fn new(cache: Arc<SnapshotCache>, renderer: Renderer, default_duration: Duration) -> Self {
        AppState {
            cache,
            renderer,
            default_duration,
            vars: Variables::default(),
        }
    }

    /// Baseline view parameters requests are applied on top of.
    pub fn with_vars(mut self, vars: Variables) -> Self {
        self.vars = vars;
        self
    }
}

/// Builds the router serving the index, one route per view, download and invalidation.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ui/:service", view_route(ViewKind::Graph).delete(invalidate))
        .route("/ui/:service/", view_route(ViewKind::Graph))
        .route("/ui/:service/top", view_route(ViewKind::Top))
        .route("/ui/:service/disasm", view_route(ViewKind::Disasm))
        .route("/ui/:service/source", view_route(ViewKind::Source))
        .route("/ui/:service/peek", view_route(ViewKind::Peek))
        .route("/ui/:service/flamegraph", view_route(ViewKind::FlameGraph))
        .route("/ui/:service/download", get(download))
        .with_state(state)
}

type Params = Query<Vec<(String, String)>>;

fn view_route(view: ViewKind) -> MethodRouter<AppState> {
    get(
        move |State(state): State<AppState>, Path(service): Path<String>, Query(params): Params| async move {
            match serve_view(&state, view, &service, params).await {
                Ok(artifact) => artifact_response(StatusCode::OK, artifact),
                Err(e) => error_response(Some(view), &service, e),
            }
        },
    )
}

/// What a request asks for besides the view itself.
#[derive(Debug)]
struct ViewRequest {
    duration: Duration,
    refresh: bool,
    vars: Variables,
    symbol: Option<String>,
}

fn parse_request(state: &AppState, params: &[(String, String)]) -> Result<ViewRequest, WebError> {
    let mut duration = state.default_duration;
    let mut refresh = false;
    let mut symbol = None;
    let mut overrides = Vec::new();
    for (name, value) in params {
        match name.as_str() {
            "seconds" => {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs <= MAX_SECONDS)
                    .ok_or_else(|| WebError::BadParam {
                        name: "seconds",
                        value: value.clone(),
                    })?;
                duration = Duration::from_secs(secs);
            }
            "refresh" => {
                refresh = parse_bool(value).ok_or_else(|| WebError::BadParam {
                    name: "refresh",
                    value: value.clone(),
                })?;
            }
            name => {
                if name == "f" {
                    symbol = Some(value.clone());
                }
                overrides.push((canonical_name(name), value.as_str()));
            }
        }
    }
    Ok(ViewRequest {
        duration,
        refresh,
        vars: state.vars.with_overrides(overrides)?,
        symbol,
    })
}

async fn serve_view(
    state: &AppState,
    view: ViewKind,
    service: &str,
    params: Vec<(String, String)>,
) -> Result<Artifact, WebError> {
    // parameters are checked before anything is fetched
    let req = parse_request(state, &params)?;
    let handle = state
        .cache
        .get_or_fetch(service, req.duration, req.refresh)
        .await?;
    let rpt = tokio::task::spawn_blocking(move || {
        handle.report(view, &req.vars, req.symbol.as_deref())
    })
    .await??;
    Ok(state.renderer.render(rpt, view, service).await?)
}

async fn download(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(params): Params,
) -> Response {
    match raw_snapshot(&state, &service, &params).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{service}.pprof\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(None, &service, e),
    }
}

async fn raw_snapshot(
    state: &AppState,
    service: &str,
    params: &[(String, String)],
) -> Result<Vec<u8>, WebError> {
    let req = parse_request(state, params)?;
    let handle = state
        .cache
        .get_or_fetch(service, req.duration, req.refresh)
        .await?;
    handle.raw_bytes().await.map_err(WebError::Download)
}

async fn invalidate(State(state): State<AppState>, Path(service): Path<String>) -> Response {
    if let Err(e) = state.cache.registry().resolve(&service) {
        return error_response(None, &service, CacheError::from(e).into());
    }
    state.cache.invalidate(&service).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let cached = state.cache.services().await;
    let mut body = String::from("<table>\n<tr><th>Service</th><th>Address</th><th>Snapshot</th><th>Comment</th></tr>\n");
    for source in state.cache.registry().services() {
        let snapshot = cached
            .iter()
            .find(|(name, _)| *name == source.name)
            .map(|(_, created)| created.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        let name = escape_html(&source.name);
        let _ = writeln!(
            body,
            "<tr><td><a href=\"/ui/{name}/\">{name}</a></td><td>{}:{}</td><td>{snapshot}</td><td>{}</td></tr>",
            escape_html(&source.host),
            escape_html(&source.port),
            escape_html(&source.comment),
        );
    }
    body.push_str("</table>");
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>pprof-hub</title>\n</head>\n<body>\n<h1>Services</h1>\n{body}\n</body>\n</html>\n"
    ))
}

fn artifact_response(status: StatusCode, artifact: Artifact) -> Response {
    match artifact {
        Artifact::Html(html) => (status, Html(html)).into_response(),
        Artifact::Json(json) => (status, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
    }
}

fn error_response(view: Option<ViewKind>, service: &str, err: WebError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(service, view = ?view, %status, error = %err, "request failed");
    } else {
        tracing::warn!(service, view = ?view, %status, error = %err, "request rejected");
    }
    artifact_response(status, render::error_artifact(view, service, &err.to_string()))
}
