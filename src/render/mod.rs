// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Turns reports into the artifacts served to callers: HTML pages for most
//! views, JSON for the flame graph.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::driver::ViewKind;
use crate::objtool::ObjTool;
use crate::report::measurement::percentage;
use crate::report::{dot, flame, listing, text, Report, ReportError};

pub mod backend;

pub use backend::{Graphviz, RenderBackend};

/// Why a view could not be rendered.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RenderError {
    /// The diagram backend could not be started. Soft failure: only the
    /// graph view needs it.
    #[error("Could not execute dot; may need to install graphviz.")]
    BackendUnavailable(String),
    /// The backend ran and failed.
    #[error("diagram backend exited with {status}: {stderr}")]
    Backend {
        /// Exit status as displayed by the OS.
        status: String,
        /// Everything the backend wrote to stderr.
        stderr: String,
    },
    /// Talking to the backend process failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Building the view from the report failed.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The flame tree could not be serialized.
    #[error("encoding flame graph: {0}")]
    Json(#[from] serde_json::Error),
    /// The blocking render task panicked or was cancelled.
    #[error("render task: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A rendered view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// An HTML page.
    Html(String),
    /// A JSON document.
    Json(String),
}

/// Escapes `s` for HTML text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Strips everything before `<svg` and repairs the bare `&;` dot emits.
fn clean_svg(svg: &[u8]) -> String {
    let svg = String::from_utf8_lossy(svg).replace("&;", "&amp;;");
    match svg.find("<svg") {
        Some(pos) => svg[pos..].to_owned(),
        None => svg,
    }
}

const STYLE: &str = "body{font-family:sans-serif;margin:0}\
header{background:#eee;padding:6px 10px}header a{margin-right:12px}\
#legend{padding:6px 10px;color:#333}.warn{color:#a00}\
table{border-collapse:collapse;margin:10px}td,th{padding:2px 8px;text-align:right}\
td:last-child,th:last-child{text-align:left}pre{margin:10px}";

/// A full page for `view` of `service`.
pub fn page(service: &str, view: &str, legend: &[String], diagnostics: &[String], body: &str) -> String {
    let service = escape_html(service);
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{service} {view}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<header>"
    );
    let base = format!("/ui/{service}");
    for (label, href) in [
        ("Graph", format!("{base}/")),
        ("Top", format!("{base}/top")),
        ("Flame Graph", format!("{base}/flamegraph")),
        ("Peek", format!("{base}/peek")),
        ("Source", format!("{base}/source")),
        ("Disassemble", format!("{base}/disasm")),
        ("Download", format!("{base}/download")),
        ("Refresh", format!("{base}/?refresh=true")),
    ] {
        let _ = write!(out, "<a href=\"{href}\">{label}</a>");
    }
    out.push_str("</header>\n");
    if !legend.is_empty() || !diagnostics.is_empty() {
        out.push_str("<div id=\"legend\">");
        for line in legend {
            let _ = write!(out, "<div>{}</div>", escape_html(line));
        }
        for d in diagnostics {
            let _ = write!(out, "<div class=\"warn\">{}</div>", escape_html(d));
        }
        out.push_str("</div>\n");
    }
    out.push_str(body);
    out.push_str("\n</body>\n</html>\n");
    out
}

/// An error page, or a JSON error object for the flame graph.
pub fn error_artifact(view: Option<ViewKind>, service: &str, message: &str) -> Artifact {
    if view == Some(ViewKind::FlameGraph) {
        return Artifact::Json(serde_json::json!({ "error": message }).to_string());
    }
    let body = format!("<pre class=\"warn\">{}</pre>", escape_html(message));
    Artifact::Html(page(service, "error", &[], &[], &body))
}

fn top_table(rpt: &Report) -> String {
    let mut out = String::from(
        "<table>\n<tr><th>Flat</th><th>Flat%</th><th>Sum%</th><th>Cum</th><th>Cum%</th><th>Name</th></tr>\n",
    );
    let mut flat_sum = 0;
    for item in text::text_items(rpt) {
        flat_sum += item.flat;
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{} {}</td></tr>",
            escape_html(&item.flat_format),
            percentage(item.flat, rpt.total()),
            percentage(flat_sum, rpt.total()),
            escape_html(&item.cum_format),
            percentage(item.cum, rpt.total()),
            escape_html(&item.name),
            item.inline_label,
        );
    }
    out.push_str("</table>");
    out
}

fn pre(text: &str) -> String {
    format!("<pre>{}</pre>", escape_html(text))
}

/// Renders views that need no external process. Blocking.
pub fn render_local(
    rpt: &Report,
    view: ViewKind,
    service: &str,
    objtool: &dyn ObjTool,
) -> Result<Artifact, RenderError> {
    let body = match view {
        ViewKind::FlameGraph => {
            return Ok(Artifact::Json(serde_json::to_string(&flame::flame_tree(rpt))?));
        }
        ViewKind::Graph => pre(&dot::compose(rpt)),
        ViewKind::Top => top_table(rpt),
        ViewKind::Peek => pre(&text::peek(rpt)?),
        ViewKind::Disasm => pre(&listing::disasm(rpt, objtool)?),
        ViewKind::Source => pre(&listing::source(rpt, objtool)?),
    };
    // the listing views carry their own totals
    let legend = match view {
        ViewKind::Disasm | ViewKind::Source => rpt.profile_labels(),
        _ => rpt.legend(),
    };
    Ok(Artifact::Html(page(service, view.name(), &legend, rpt.diagnostics(), &body)))
}

/// Renders reports, delegating the graph view to a diagram backend.
#[derive(Debug, Clone)]
pub struct Renderer {
    backend: Arc<dyn RenderBackend>,
    objtool: Arc<dyn ObjTool>,
}

impl Renderer {
    /// A renderer using `backend` for the graph view and `objtool` for listings.
    pub fn new(backend: Arc<dyn RenderBackend>, objtool: Arc<dyn ObjTool>) -> Self {
        Renderer { backend, objtool }
    }

    /// Renders `view` of `rpt`. Only the graph view uses the backend; the
    /// others run on a blocking thread.
    pub async fn render(&self, rpt: Report, view: ViewKind, service: &str) -> Result<Artifact, RenderError> {
        if view != ViewKind::Graph {
            let objtool = Arc::clone(&self.objtool);
            let service = service.to_owned();
            return tokio::task::spawn_blocking(move || render_local(&rpt, view, &service, &*objtool))
                .await?;
        }
        let dot = dot::compose(&rpt);
        let svg = clean_svg(&self.backend.render(&dot).await?);
        let body = format!("<div id=\"graph\">{svg}</div>");
        Ok(Artifact::Html(page(
            service,
            view.name(),
            &rpt.legend(),
            rpt.diagnostics(),
            &body,
        )))
    }
}
