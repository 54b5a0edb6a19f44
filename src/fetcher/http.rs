// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A fetcher that pulls profiles over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use super::{FetchError, Fetcher, PROFILE_PATH};
use crate::registry::ServiceAddr;

/// Default margin on top of the sample duration before a fetch times out.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Fetches `http://{addr}/debug/pprof/profile?seconds={n}`.
///
/// The request times out after the sample duration plus a grace margin.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    grace: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl HttpFetcher {
    /// Creates a fetcher whose requests time out `grace` after the sample duration.
    pub fn new(grace: Duration) -> Self {
        HttpFetcher {
            client: reqwest::Client::new(),
            grace,
        }
    }

    fn url(addr: &ServiceAddr, duration: Duration) -> String {
        // the profile endpoint only takes whole seconds
        let seconds = duration.as_secs().max(1);
        format!("http://{addr}{PROFILE_PATH}?seconds={seconds}")
    }

    fn timeout(&self, duration: Duration) -> Duration {
        duration.saturating_add(self.grace)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, addr: &ServiceAddr, duration: Duration) -> Result<Vec<u8>, FetchError> {
        let url = Self::url(addr, duration);
        let timeout = self.timeout(duration);
        tracing::info!(%addr, ?duration, "fetching profile");

        let req = self
            .client
            .request(Method::GET, url.clone())
            .timeout(timeout)
            .build()
            .map_err(|_e| FetchError::InvalidUrl(url.clone()))?;
        let wrap = |source: reqwest::Error| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.clone(),
                    after: timeout,
                }
            } else {
                FetchError::Request {
                    url: url.clone(),
                    source,
                }
            }
        };
        let res = self.client.execute(req).await.map_err(wrap)?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let body = res.bytes().await.map_err(wrap)?;
        tracing::debug!(%addr, len = body.len(), "fetched profile");
        Ok(body.to_vec())
    }
}
