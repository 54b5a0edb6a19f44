// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pulling raw profile snapshots from remote services.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::ServiceAddr;

pub mod http;

/// The path every target serves its CPU profile on.
pub const PROFILE_PATH: &str = "/debug/pprof/profile";

/// Why a snapshot could not be fetched.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    /// The target address does not form a valid URL.
    #[error("invalid profile url {0}")]
    InvalidUrl(String),
    /// The request failed before a status was received.
    #[error("fetching {url}: {source}")]
    Request {
        /// Profile URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The request did not complete within the sample duration plus grace.
    #[error("fetching {url}: timed out after {after:?}")]
    Timeout {
        /// Profile URL.
        url: String,
        /// Timeout that expired.
        after: Duration,
    },
    /// The target answered with a non-success status.
    #[error("fetching {url}: HTTP status {status}")]
    Status {
        /// Profile URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
}

/// Abstraction around fetching profile snapshots.
#[async_trait]
pub trait Fetcher: fmt::Debug + Send + Sync {
    /// Blocks until a snapshot sampled over `duration` is returned by the
    /// service at `addr`, or the fetch fails.
    async fn fetch(&self, addr: &ServiceAddr, duration: Duration) -> Result<Vec<u8>, FetchError>;
}
