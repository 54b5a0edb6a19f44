// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## pprof-hub
//! A single HTTP front end over the pprof endpoints of a fleet of services.
//!
//! A caller names a service; the hub resolves the name through a
//! [`registry::ServiceRegistry`], pulls a profile snapshot from
//! `http://{host}:{port}/debug/pprof/profile` and serves several views of
//! it (graph, top, disassembly, source, peek and flame graph) without
//! fetching again for each view.
//!
//! ### Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use pprof_hub::cache::SnapshotCache;
//! # use pprof_hub::fetcher::http::HttpFetcher;
//! # use pprof_hub::objtool::NoObjTool;
//! # use pprof_hub::registry::ServiceRegistry;
//! # use pprof_hub::render::{Graphviz, Renderer};
//! # use pprof_hub::web::{router, AppState};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ServiceRegistry::load("sources.cfg".as_ref())?);
//! let cache = Arc::new(SnapshotCache::new(registry, Arc::new(HttpFetcher::default())));
//! let renderer = Renderer::new(Arc::new(Graphviz::default()), Arc::new(NoObjTool));
//! let app = router(AppState::new(cache, renderer, Duration::from_secs(30)));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Snapshots
//!
//! Each service has at most one cached snapshot. A view request reuses it
//! unless `refresh=true` is passed, the entry is older than the configured
//! max age, or it was dropped with `DELETE /ui/{service}`. Views never
//! modify the cached profile: every [`driver::generate_report`] call works
//! on its own copy.
//!
//! ### Graphviz
//!
//! The graph view pipes DOT through `dot -Tsvg`. When graphviz is not
//! installed that view answers 501 and the others keep working.

pub mod cache;
pub mod driver;
pub mod fetcher;
pub mod objtool;
pub mod profile;
pub mod registry;
pub mod render;
pub mod report;
pub mod web;
