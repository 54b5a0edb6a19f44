// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Access to object files and sources for the listing views.
//!
//! Missing symbol or source data is never fatal: the listing views fall back
//! to `<unknown source>` entries when an [`ObjTool`] returns an error.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Why object or source data could not be produced.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ObjToolError {
    /// No symbol data for the named object file.
    #[error("no symbol data for {0}")]
    NoSymbols(String),
    /// The source file was not found under any search root.
    #[error("source file {0} not found")]
    SourceNotFound(String),
    /// The source file was found but could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    /// Instruction address.
    pub addr: u64,
    /// Disassembled text.
    pub text: String,
    /// Function the instruction belongs to, if known.
    pub function: String,
    /// Source file of the instruction, if known.
    pub file: String,
    /// Source line of the instruction, 0 when unknown.
    pub line: i64,
}

/// Resolves object code and source text.
pub trait ObjTool: fmt::Debug + Send + Sync {
    /// Instructions of `file` in `[start, end]`.
    fn disassemble(&self, file: &str, start: u64, end: u64) -> Result<Vec<Inst>, ObjToolError>;

    /// The lines of a source file. `source_path` is a `:`-separated list of
    /// search roots and `trim_path` a `:`-separated list of prefixes to
    /// strip before joining.
    fn source_file(
        &self,
        file: &str,
        source_path: &str,
        trim_path: &str,
    ) -> Result<Vec<String>, ObjToolError>;
}

/// An object tool with no data at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObjTool;

impl ObjTool for NoObjTool {
    fn disassemble(&self, file: &str, _start: u64, _end: u64) -> Result<Vec<Inst>, ObjToolError> {
        Err(ObjToolError::NoSymbols(file.to_owned()))
    }

    fn source_file(&self, file: &str, _: &str, _: &str) -> Result<Vec<String>, ObjToolError> {
        Err(ObjToolError::SourceNotFound(file.to_owned()))
    }
}

/// Reads sources from the local filesystem. Has no disassembler.
///
/// Lookups never leave the configured roots: profile file names are joined
/// under a root, and a request's `source_path` entries are only searched
/// when they lie inside one. With no roots every lookup fails.
#[derive(Debug, Default, Clone)]
pub struct LocalSource {
    roots: Vec<PathBuf>,
}

impl LocalSource {
    /// Searches `roots` in order.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        LocalSource { roots }
    }

    /// Roots from a `:`-separated list. Empty entries are skipped.
    pub fn from_search_path(path: &str) -> Self {
        Self::new(split_list(path).map(PathBuf::from).collect())
    }

    /// Search directories for one request: its `source_path` entries that
    /// stay inside a configured root, then the roots themselves.
    fn search_dirs(&self, source_path: &str) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for entry in split_list(source_path).map(Path::new) {
            if escapes(entry) {
                continue;
            }
            if entry.is_absolute() {
                if self.roots.iter().any(|root| entry.starts_with(root)) {
                    dirs.push(entry.to_owned());
                }
            } else {
                dirs.extend(self.roots.iter().map(|root| root.join(entry)));
            }
        }
        dirs.extend(self.roots.iter().cloned());
        dirs
    }

    fn candidates(&self, file: &str, source_path: &str, trim_path: &str) -> Vec<PathBuf> {
        let relative = Path::new(
            split_list(trim_path)
                .find_map(|p| file.strip_prefix(p))
                .unwrap_or(file)
                .trim_start_matches('/'),
        );
        let name = relative.file_name();
        let mut out = Vec::new();
        for dir in self.search_dirs(source_path) {
            if !escapes(relative) {
                out.push(dir.join(relative));
            }
            if let Some(name) = name {
                out.push(dir.join(name));
            }
        }
        out
    }

    /// Whether `path` resolves, symlinks included, to somewhere under a root.
    fn contains(&self, path: &Path) -> bool {
        let Ok(real) = path.canonicalize() else {
            return false;
        };
        self.roots
            .iter()
            .filter_map(|root| root.canonicalize().ok())
            .any(|root| real.starts_with(root))
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(':').filter(|p| !p.is_empty())
}

fn escapes(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

impl ObjTool for LocalSource {
    fn disassemble(&self, file: &str, _start: u64, _end: u64) -> Result<Vec<Inst>, ObjToolError> {
        Err(ObjToolError::NoSymbols(file.to_owned()))
    }

    fn source_file(
        &self,
        file: &str,
        source_path: &str,
        trim_path: &str,
    ) -> Result<Vec<String>, ObjToolError> {
        if file.is_empty() {
            return Err(ObjToolError::SourceNotFound(file.to_owned()));
        }
        let Some(path) = self
            .candidates(file, source_path, trim_path)
            .into_iter()
            .find(|p| p.is_file() && self.contains(p))
        else {
            return Err(ObjToolError::SourceNotFound(file.to_owned()));
        };
        tracing::debug!(path = %path.display(), "reading source file");
        let text = std::fs::read_to_string(&path).map_err(|source| ObjToolError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(text.lines().map(str::to_owned).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/work.go"), "package pkg\n\nfunc work() {}\n").unwrap();
        dir
    }

    #[test]
    fn test_local_source_roots_and_trim() {
        let dir = source_tree();
        let tool = LocalSource::new(vec![dir.path().to_owned()]);
        let lines = tool
            .source_file("/build/src/pkg/work.go", "", "/build/src")
            .unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "func work() {}");

        // request roots inside a configured root are searched
        let inner = dir.path().join("pkg").display().to_string();
        assert!(tool.source_file("elsewhere/work.go", &inner, "").is_ok());
        assert!(tool.source_file("elsewhere/work.go", "pkg", "").is_ok());
        assert!(matches!(
            tool.source_file("missing.go", &inner, ""),
            Err(ObjToolError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_from_search_path() {
        let a = source_tree();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("only_b.go"), "package b\n").unwrap();
        let path = format!("{}::{}", a.path().display(), b.path().display());
        let tool = LocalSource::from_search_path(&path);
        assert_eq!(tool.roots.len(), 2);
        assert!(tool.source_file("pkg/work.go", "", "").is_ok());
        assert_eq!(tool.source_file("x/only_b.go", "", "").unwrap(), vec!["package b"]);
        assert!(LocalSource::from_search_path("")
            .source_file("pkg/work.go", "", "")
            .is_err());
    }

    #[test]
    fn test_lookups_stay_inside_roots() {
        let root = source_tree();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "do not serve\n").unwrap();
        let secret = secret.display().to_string();
        let outside_dir = outside.path().display().to_string();
        let tool = LocalSource::new(vec![root.path().join("pkg")]);

        for (file, source_path) in [
            // absolute file name from the profile
            (secret.as_str(), ""),
            // request root outside every configured root
            ("secret.txt", outside_dir.as_str()),
            (secret.as_str(), outside_dir.as_str()),
        ] {
            assert!(
                matches!(
                    tool.source_file(file, source_path, ""),
                    Err(ObjToolError::SourceNotFound(_))
                ),
                "{file} via {source_path:?}"
            );
        }

        // parent components do not climb out of a root
        std::fs::write(root.path().join("above.go"), "package above\n").unwrap();
        let escape = format!("{}/../above.go", root.path().join("pkg").display());
        assert!(tool.source_file("../above.go", "", "").is_err());
        assert!(tool.source_file("above.go", &escape, "").is_err());
        assert!(tool.source_file("x/../../above.go", "", "").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_skipped() {
        let root = source_tree();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("leak.go"), "package leak\n").unwrap();
        std::os::unix::fs::symlink(outside.path().join("leak.go"), root.path().join("leak.go"))
            .unwrap();
        let tool = LocalSource::new(vec![root.path().to_owned()]);
        assert!(tool.source_file("leak.go", "", "").is_err());
        assert!(tool.source_file("pkg/work.go", "", "").is_ok());
    }

    #[test]
    fn test_no_obj_tool() {
        assert!(NoObjTool.disassemble("/bin/true", 0, 10).is_err());
        assert!(NoObjTool.source_file("a.go", "", "").is_err());
    }
}
