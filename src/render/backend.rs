// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The external diagram backend.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::RenderError;

/// Turns a DOT description into SVG.
#[async_trait]
pub trait RenderBackend: fmt::Debug + Send + Sync {
    /// Renders `dot` to SVG bytes.
    async fn render(&self, dot: &str) -> Result<Vec<u8>, RenderError>;
}

/// Runs graphviz `dot -Tsvg`, DOT on stdin and SVG on stdout. The child is
/// killed if the request is dropped mid-render.
#[derive(Debug, Clone)]
pub struct Graphviz {
    program: PathBuf,
}

impl Default for Graphviz {
    fn default() -> Self {
        Self::new("dot")
    }
}

impl Graphviz {
    /// Runs `program`, looked up on the path when it is a bare name.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Graphviz {
            program: program.into(),
        }
    }
}

#[async_trait]
impl RenderBackend for Graphviz {
    async fn render(&self, dot: &str) -> Result<Vec<u8>, RenderError> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-Tsvg")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::warn!(program = %self.program.display(), ?e, "cannot run diagram backend");
                RenderError::BackendUnavailable(self.program.display().to_string())
            })?;
        // stdin is fed while stdout and stderr drain, or a chatty backend
        // fills one pipe while we block on the other
        let writer = child.stdin.take().map(|mut stdin| {
            let input = dot.to_owned();
            tokio::spawn(async move {
                stdin.write_all(input.as_bytes()).await?;
                // closing stdin lets the backend finish
                stdin.shutdown().await
            })
        });
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RenderError::Backend {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if let Some(writer) = writer {
            match writer.await? {
                Ok(()) => {}
                // the backend finished without reading all of its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(len = output.stdout.len(), "rendered diagram");
        Ok(output.stdout)
    }
}
