// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-service snapshot cache.
//!
//! The cache is the only shared mutable state of the server. It maps a
//! service name to its most recent [`ServiceEntry`] and decides whether a
//! request can reuse it or must fetch a new snapshot.
//!
//! Entries are immutable and swapped wholesale under the lock, so a reader
//! never sees a half-built entry. The lock is never held across a fetch:
//! concurrent misses for one service may fetch twice, and the last fetch to
//! complete wins. A failed fetch leaves the previous entry in place.

use std::collections::HashMap;
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::driver::{self, Variables, ViewKind};
use crate::fetcher::{FetchError, Fetcher};
use crate::profile::{self, DecodeError, Profile};
use crate::registry::{ResolutionError, ServiceRegistry};
use crate::report::{Report, ReportError};

/// Why a snapshot could not be served.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// The service name is not in the registry.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The fetch from the service failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The fetched bytes are not a pprof profile.
    #[error("decoding profile: {0}")]
    Decode(#[from] DecodeError),
    /// The profile decoded but holds no samples.
    #[error("profile fetched from {0} has no samples")]
    EmptySnapshot(String),
    /// The raw bytes could not be written to a scratch file.
    #[error("writing scratch file: {0}")]
    Scratch(#[from] io::Error),
    /// The decode task panicked or was cancelled.
    #[error("snapshot task: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CacheError {
    /// Whether the failure came from the remote side, as opposed to the
    /// request naming an unknown service.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, CacheError::Resolution(_))
    }
}

/// One acquired snapshot. Replaced wholesale, never edited.
#[derive(Debug)]
pub struct ServiceEntry {
    service: String,
    profile: Profile,
    created: DateTime<Utc>,
    fetched_at: tokio::time::Instant,
    /// Raw fetched bytes; the file is removed when the entry drops.
    raw: NamedTempFile,
}

impl ServiceEntry {
    fn new(service: String, raw: Vec<u8>) -> Result<Self, CacheError> {
        let profile = profile::decode(&raw)?;
        if profile.samples.is_empty() {
            return Err(CacheError::EmptySnapshot(service));
        }
        let mut file = tempfile::Builder::new()
            .prefix("pprof-hub-")
            .suffix(".pb")
            .tempfile()?;
        file.write_all(&raw)?;
        file.flush()?;
        Ok(ServiceEntry {
            service,
            profile,
            created: Utc::now(),
            fetched_at: tokio::time::Instant::now(),
            raw: file,
        })
    }
}

/// A cheap, cloneable reference to a cached snapshot. Keeps the entry (and
/// its scratch file) alive even if the cache replaces or drops it.
#[derive(Debug, Clone)]
pub struct SnapshotHandle(Arc<ServiceEntry>);

impl SnapshotHandle {
    /// Name the snapshot was fetched for.
    pub fn service(&self) -> &str {
        &self.0.service
    }

    /// The decoded profile. Never modified after the fetch.
    pub fn profile(&self) -> &Profile {
        &self.0.profile
    }

    /// When the fetch completed.
    pub fn created(&self) -> DateTime<Utc> {
        self.0.created
    }

    /// Scratch file holding the bytes exactly as fetched.
    pub fn raw_path(&self) -> &Path {
        self.0.raw.path()
    }

    /// Reads the raw bytes back from the scratch file.
    pub async fn raw_bytes(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.raw_path()).await
    }

    /// Runs the report pipeline for `view` over this snapshot.
    pub fn report(
        &self,
        view: ViewKind,
        vars: &Variables,
        symbol: Option<&str>,
    ) -> Result<Report, ReportError> {
        driver::generate_report(&self.0.profile, view, vars, symbol)
    }

    /// Whether both handles refer to the same fetched snapshot.
    pub fn same_snapshot(&self, other: &SnapshotHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Per-service snapshots shared by every view.
///
/// At most one entry is kept per service name. Concurrent requests for a
/// missing entry may each fetch; the last completed fetch wins.
#[derive(Debug)]
pub struct SnapshotCache {
    registry: Arc<ServiceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    max_age: Option<Duration>,
    entries: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl SnapshotCache {
    /// An empty cache resolving names through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>, fetcher: Arc<dyn Fetcher>) -> Self {
        SnapshotCache {
            registry,
            fetcher,
            max_age: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entries older than `max_age` are fetched again on the next request.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// The registry names are resolved through.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    fn is_valid(&self, entry: &ServiceEntry) -> bool {
        self.max_age
            .map_or(true, |max_age| entry.fetched_at.elapsed() < max_age)
    }

    /// Returns the cached snapshot of `service`, fetching a new one when
    /// there is none, it expired, or `refresh` is set.
    pub async fn get_or_fetch(
        &self,
        service: &str,
        duration: Duration,
        refresh: bool,
    ) -> Result<SnapshotHandle, CacheError> {
        if !refresh {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(service).filter(|e| self.is_valid(e)) {
                tracing::debug!(service, "snapshot cache hit");
                return Ok(SnapshotHandle(Arc::clone(entry)));
            }
        }

        let addr = self.registry.resolve(service)?;
        tracing::debug!(service, %addr, refresh, "snapshot cache miss");
        let raw = self.fetcher.fetch(&addr, duration).await?;

        let name = service.to_owned();
        let entry = tokio::task::spawn_blocking(move || ServiceEntry::new(name, raw)).await??;
        let entry = Arc::new(entry);
        tracing::info!(
            service,
            samples = entry.profile.samples.len(),
            path = %entry.raw.path().display(),
            "stored snapshot"
        );
        self.entries
            .write()
            .await
            .insert(service.to_owned(), Arc::clone(&entry));
        Ok(SnapshotHandle(entry))
    }

    /// Drops the entry of `service`. Returns whether there was one.
    pub async fn invalidate(&self, service: &str) -> bool {
        let removed = self.entries.write().await.remove(service).is_some();
        if removed {
            tracing::info!(service, "invalidated snapshot");
        }
        removed
    }

    /// Cached service names with their snapshot times, by name.
    pub async fn services(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| (e.service.clone(), e.created))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{self, AtomicBool, AtomicU32};

    use async_trait::async_trait;

    use super::*;
    use crate::profile::fixture::{abc_profile_bytes, ProfileBuilder};
    use crate::registry::ServiceAddr;

    const REGISTRY: &str = r#"{"sources": [
        {"name": "abc", "host": "10.0.0.1", "port": "6060"},
        {"name": "idle", "host": "10.0.0.2", "port": "6060"}
    ]}"#;

    struct MockFetcher {
        counter: AtomicU32,
        fail: AtomicBool,
    }

    impl std::fmt::Debug for MockFetcher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockFetcher").finish()
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, addr: &ServiceAddr, duration: Duration) -> Result<Vec<u8>, FetchError> {
            self.counter.fetch_add(1, atomic::Ordering::Relaxed);
            tokio::time::sleep(duration).await;
            if self.fail.load(atomic::Ordering::Relaxed) {
                return Err(FetchError::Status {
                    url: addr.to_string(),
                    status: 500,
                });
            }
            if addr.host == "10.0.0.2" {
                let b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
                return Ok(b.encode());
            }
            Ok(abc_profile_bytes())
        }
    }

    fn make_cache() -> (Arc<SnapshotCache>, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher {
            counter: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        });
        let registry = Arc::new(ServiceRegistry::from_json(REGISTRY).unwrap());
        let cache = SnapshotCache::new(registry, fetcher.clone());
        (Arc::new(cache), fetcher)
    }

    fn fetches(f: &MockFetcher) -> u32 {
        f.counter.load(atomic::Ordering::Relaxed)
    }

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_second_get_reuses_snapshot() {
        let (cache, fetcher) = make_cache();
        let first = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        let second = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert_eq!(fetches(&fetcher), 1);
        assert!(first.same_snapshot(&second));

        let vars = Variables::default();
        let a = first.report(ViewKind::Top, &vars, None).unwrap();
        let b = second.report(ViewKind::Top, &vars, None).unwrap();
        assert_eq!(a.total(), b.total());
        assert_eq!(a.total(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fetch() {
        let (cache, fetcher) = make_cache();
        cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert!(cache.invalidate("abc").await);
        assert!(!cache.invalidate("abc").await);
        assert!(cache.services().await.is_empty());
        cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert_eq!(fetches(&fetcher), 2);

        cache.get_or_fetch("abc", SECOND, true).await.unwrap();
        assert_eq!(fetches(&fetcher), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service() {
        let (cache, fetcher) = make_cache();
        let err = cache.get_or_fetch("nope", SECOND, false).await.unwrap_err();
        assert!(matches!(err, CacheError::Resolution(_)));
        assert!(!err.is_upstream());
        assert_eq!(fetches(&fetcher), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_snapshot_not_stored() {
        let (cache, _) = make_cache();
        let err = cache.get_or_fetch("idle", SECOND, false).await.unwrap_err();
        assert!(matches!(err, CacheError::EmptySnapshot(ref s) if s == "idle"), "{err}");
        assert!(cache.services().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_entry() {
        let (cache, fetcher) = make_cache();
        let first = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        fetcher.fail.store(true, atomic::Ordering::Relaxed);
        let err = cache.get_or_fetch("abc", SECOND, true).await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
        assert!(err.is_upstream());
        let again = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert!(first.same_snapshot(&again));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_sample_type_leaves_cache_alone() {
        let (cache, fetcher) = make_cache();
        let handle = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        let before = cache.services().await;
        let vars = Variables::default()
            .with_overrides([("sample_index", "alloc_space")])
            .unwrap();
        let err = handle.report(ViewKind::Top, &vars, None).unwrap_err();
        assert!(matches!(err, ReportError::UnknownSampleType { .. }));
        assert_eq!(cache.services().await, before);
        let again = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert!(handle.same_snapshot(&again));
        assert_eq!(fetches(&fetcher), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age() {
        let (cache, fetcher) = make_cache();
        let cache = Arc::into_inner(cache)
            .unwrap()
            .with_max_age(Some(Duration::from_secs(60)));
        cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert_eq!(fetches(&fetcher), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        assert_eq!(fetches(&fetcher), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets() {
        let (cache, fetcher) = make_cache();
        let gets = (0..8).map(|_| cache.get_or_fetch("abc", SECOND, false));
        for handle in futures::future::join_all(gets).await {
            assert_eq!(handle.unwrap().profile().samples.len(), 3);
        }
        let n = fetches(&fetcher);
        assert!((1..=8).contains(&n), "{n}");
        assert_eq!(cache.services().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scratch_file_released() {
        let (cache, _) = make_cache();
        let handle = cache.get_or_fetch("abc", SECOND, false).await.unwrap();
        let path = handle.raw_path().to_owned();
        assert_eq!(handle.raw_bytes().await.unwrap(), abc_profile_bytes());
        cache.invalidate("abc").await;
        assert!(path.exists());
        drop(handle);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_stores_nothing() {
        let (cache, _) = make_cache();
        let fut = cache.get_or_fetch("abc", Duration::from_secs(30), false);
        assert!(tokio::time::timeout(SECOND, fut).await.is_err());
        assert!(cache.services().await.is_empty());
    }
}
