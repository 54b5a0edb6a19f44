// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Static name → address registry, loaded once from a JSON descriptor.
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "port": "8080",
//!   "sources": [
//!     {"name": "billing", "host": "10.0.0.7", "port": "6060", "is_inner": true, "comment": ""}
//!   ]
//! }
//! ```
//!
//! Ports may be given as strings or numbers.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed or unreadable descriptor. Fatal at startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DescriptorError {
    /// The descriptor file could not be read.
    #[error("reading descriptor {path}: {source}")]
    Io {
        /// Descriptor path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The descriptor is not valid JSON or has the wrong shape.
    #[error("parsing descriptor: {0}")]
    Json(#[from] serde_json::Error),
    /// A service entry carries a port that is not a number.
    #[error("service {name:?}: invalid port {port:?}")]
    InvalidPort {
        /// Service name.
        name: String,
        /// The port as written.
        port: String,
    },
}

/// A lookup for a name the registry does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolutionError {
    /// No usable entry for the name.
    #[error("service {0:?} is not registered")]
    NotRegistered(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortField {
    Text(String),
    Number(u16),
}

fn port_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<PortField>::deserialize(d)? {
        Some(PortField::Text(s)) => s,
        Some(PortField::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// One registered service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceSource {
    /// Name used in `/ui/{service}` routes.
    pub name: String,
    /// Host name or IP.
    #[serde(default)]
    pub host: String,
    /// Port as written in the descriptor. Numbers and strings are both accepted.
    #[serde(default, deserialize_with = "port_string")]
    pub port: String,
    /// Carried through from the descriptor; not used for routing.
    #[serde(default)]
    pub is_inner: bool,
    /// Free-form text shown on the index page.
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    host: String,
    #[serde(default, deserialize_with = "port_string")]
    port: String,
    #[serde(default)]
    sources: Vec<ServiceSource>,
}

/// A resolved `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddr {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registered services and the listen address, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    host: String,
    port: String,
    sources: Vec<ServiceSource>,
}

impl ServiceRegistry {
    /// Reads and parses the descriptor at `path`.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses a descriptor and logs every entry.
    pub fn from_json(text: &str) -> Result<Self, DescriptorError> {
        let d: Descriptor = serde_json::from_str(text)?;
        for s in &d.sources {
            if !s.port.is_empty() && s.port.parse::<u16>().is_err() {
                return Err(DescriptorError::InvalidPort {
                    name: s.name.clone(),
                    port: s.port.clone(),
                });
            }
            tracing::info!(
                service = %s.name,
                addr = %format_args!("{}:{}", s.host, s.port),
                is_inner = s.is_inner,
                comment = %s.comment,
                "registered service"
            );
        }
        Ok(ServiceRegistry {
            host: d.host,
            port: d.port,
            sources: d.sources,
        })
    }

    /// The address of `name`. Entries without a host or port count as
    /// unregistered.
    pub fn resolve(&self, name: &str) -> Result<ServiceAddr, ResolutionError> {
        let not_registered = || ResolutionError::NotRegistered(name.to_owned());
        if name.is_empty() {
            return Err(not_registered());
        }
        let source = self
            .sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(not_registered)?;
        if source.host.is_empty() {
            return Err(not_registered());
        }
        let port = source.port.parse().map_err(|_| not_registered())?;
        Ok(ServiceAddr {
            host: source.host.clone(),
            port,
        })
    }

    /// Every entry, in descriptor order.
    pub fn services(&self) -> &[ServiceSource] {
        &self.sources
    }

    /// The `host:port` this front end should listen on, if configured.
    pub fn serve_addr(&self) -> Option<String> {
        (!self.port.is_empty()).then(|| format!("{}:{}", self.host, self.port))
    }
}
