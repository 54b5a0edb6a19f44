// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pprof_hub::cache::SnapshotCache;
use pprof_hub::driver::check_view_overrides;
use pprof_hub::fetcher::http::HttpFetcher;
use pprof_hub::objtool::LocalSource;
use pprof_hub::registry::ServiceRegistry;
use pprof_hub::render::{Graphviz, Renderer};
use pprof_hub::web::{router, AppState};

const FALLBACK_LISTEN: &str = "127.0.0.1:8080";

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Serve cached pprof views for the services listed in a descriptor
#[derive(Parser, Debug)]
#[command(name = "pprof-hub")]
struct Args {
    /// Service descriptor (JSON)
    #[arg(long, default_value = "sources.cfg")]
    config: PathBuf,
    /// Address to listen on, overriding the descriptor's host and port
    #[arg(long)]
    listen: Option<String>,
    /// Sample duration when a request does not pass `seconds`
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    default_duration: Duration,
    /// Extra time a fetch may take beyond the sample duration
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    fetch_grace: Duration,
    /// Fetch again once a snapshot is older than this
    #[arg(long, value_parser = humantime::parse_duration)]
    max_age: Option<Duration>,
    /// Graphviz program used for the graph view
    #[arg(long, default_value = "dot")]
    dot: PathBuf,
    /// Roots searched for source files, separated by ':'. Source listings
    /// never read outside them; without roots they show `<unknown source>`
    #[arg(long, default_value_t)]
    source_path: String,
}

fn listen_addr(args: &Args, registry: &ServiceRegistry) -> String {
    args.listen
        .clone()
        .or_else(|| registry.serve_addr())
        .unwrap_or_else(|| FALLBACK_LISTEN.to_owned())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    set_up_tracing();
    let args = Args::parse();

    check_view_overrides()?;
    let registry = ServiceRegistry::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let listen = listen_addr(&args, &registry);

    let fetcher = HttpFetcher::new(args.fetch_grace);
    let cache = SnapshotCache::new(Arc::new(registry), Arc::new(fetcher)).with_max_age(args.max_age);
    let renderer = Renderer::new(
        Arc::new(Graphviz::new(&args.dot)),
        Arc::new(LocalSource::from_search_path(&args.source_path)),
    );
    let app = router(AppState::new(Arc::new(cache), renderer, args.default_duration));

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!(addr = %listener.local_addr()?, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use pprof_hub::objtool::ObjTool;
    use test_case::test_case;

    use super::*;

    const DESCRIPTOR: &str = r#"{"host": "0.0.0.0", "port": "9090", "sources": []}"#;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["pprof-hub"]).unwrap();
        assert_eq!(args.config, PathBuf::from("sources.cfg"));
        assert_eq!(args.default_duration, Duration::from_secs(30));
        assert_eq!(args.fetch_grace, Duration::from_secs(10));
        assert_eq!(args.max_age, None);
        assert_eq!(args.dot, PathBuf::from("dot"));
        assert_eq!(args.source_path, "");
    }

    #[test]
    fn test_source_path_roots() {
        let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
        std::fs::write(dirs[1].path().join("main.rs"), "fn main() {}\n").unwrap();
        let list = format!("{}:{}", dirs[0].path().display(), dirs[1].path().display());
        let args = Args::try_parse_from(["pprof-hub", "--source-path", &list]).unwrap();
        let source = LocalSource::from_search_path(&args.source_path);
        let lines = source.source_file("src/main.rs", "", "").unwrap();
        assert_eq!(lines, vec!["fn main() {}"]);
    }

    #[test]
    fn test_durations() {
        let args =
            Args::try_parse_from(["pprof-hub", "--default-duration", "5s", "--max-age", "2m"]).unwrap();
        assert_eq!(args.default_duration, Duration::from_secs(5));
        assert_eq!(args.max_age, Some(Duration::from_secs(120)));
        assert!(Args::try_parse_from(["pprof-hub", "--max-age", "soon"]).is_err());
    }

    #[test_case(&["pprof-hub"], DESCRIPTOR, "0.0.0.0:9090"; "descriptor")]
    #[test_case(&["pprof-hub", "--listen", "[::1]:7070"], DESCRIPTOR, "[::1]:7070"; "flag wins")]
    #[test_case(&["pprof-hub"], r#"{"sources": []}"#, FALLBACK_LISTEN; "fallback")]
    fn test_listen_addr(argv: &[&str], descriptor: &str, want: &str) {
        let args = Args::try_parse_from(argv).unwrap();
        let registry = ServiceRegistry::from_json(descriptor).unwrap();
        assert_eq!(listen_addr(&args, &registry), want);
    }
}
