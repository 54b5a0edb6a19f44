// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of a pprof profile.
//!
//! A [`Profile`] is decoded once from the wire format (see [`decode`]) and
//! then treated as immutable by the snapshot cache. Everything that rewrites
//! a profile ([`filter`], [`Profile::aggregate`]) works on a clone.

use std::collections::{BTreeMap, BTreeSet};

pub mod filter;
mod proto;

#[cfg(test)]
pub(crate) mod fixture;

pub use proto::{decode, DecodeError};

/// Semantics and unit of one sample value, e.g. `cpu`/`nanoseconds`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueType {
    /// What is measured, e.g. `cpu` or `alloc_space`.
    pub r#type: String,
    /// Unit of the values, e.g. `nanoseconds` or `bytes`.
    pub unit: String,
}

/// One weighted stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Indices into [`Profile::locations`], leaf first.
    pub locations: Vec<usize>,
    /// One value per [`Profile::sample_types`] entry.
    pub values: Vec<i64>,
    /// String labels by key.
    pub labels: BTreeMap<String, Vec<String>>,
    /// Numeric labels by key.
    pub num_labels: BTreeMap<String, Vec<i64>>,
    /// Units of `num_labels`, parallel to its values. Entries may be empty.
    pub num_units: BTreeMap<String, Vec<String>>,
}

/// A program location, possibly expanded into several inlined lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    /// Identifier from the wire format.
    pub id: u64,
    /// Index into [`Profile::mappings`].
    pub mapping: Option<usize>,
    /// Instruction address, 0 when unknown.
    pub address: u64,
    /// Innermost frame first; the last line is the outermost caller.
    pub lines: Vec<Line>,
}

/// One source line of a location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    /// Index into [`Profile::functions`].
    pub function: Option<usize>,
    /// Line number, 0 when unknown.
    pub line: i64,
}

/// A function referenced by locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    /// Identifier from the wire format.
    pub id: u64,
    /// Demangled name.
    pub name: String,
    /// Name as it appears in the symbol table.
    pub system_name: String,
    /// Source file.
    pub filename: String,
    /// First line of the function in `filename`.
    pub start_line: i64,
}

/// A binary or shared library mapped into the profiled process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    /// Identifier from the wire format.
    pub id: u64,
    /// Start of the mapped range.
    pub start: u64,
    /// End of the mapped range.
    pub limit: u64,
    /// Offset of `start` in the file.
    pub offset: u64,
    /// Path of the mapped object.
    pub file: String,
    /// Build id of the object, if recorded.
    pub build_id: String,
}

/// A decoded profile snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    /// Meaning of each sample value.
    pub sample_types: Vec<ValueType>,
    /// The samples.
    pub samples: Vec<Sample>,
    /// Locations, referenced by index.
    pub locations: Vec<Location>,
    /// Functions, referenced by index.
    pub functions: Vec<Function>,
    /// Mappings, referenced by index. The first is the main binary.
    pub mappings: Vec<Mapping>,
    /// Sample type used when a request names none.
    pub default_sample_type: String,
    /// Free-form comments from the producer.
    pub comments: Vec<String>,
    /// What `period` counts.
    pub period_type: Option<ValueType>,
    /// Sampling period, in `period_type` units.
    pub period: i64,
    /// When collection started, in nanoseconds since the epoch.
    pub time_nanos: i64,
    /// Collection length in nanoseconds.
    pub duration_nanos: i64,
}

/// Granularity switches for [`Profile::aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateFields {
    /// Keep inlined frames as separate nodes.
    pub inline_frames: bool,
    /// Keep function names.
    pub function: bool,
    /// Keep file names.
    pub filename: bool,
    /// Keep line numbers.
    pub line_number: bool,
    /// Keep addresses.
    pub address: bool,
}

impl Profile {
    /// Index of a sample type, by name or by numeric index.
    ///
    /// The empty string selects the default sample type, or the last one if
    /// the profile does not name a default. An `inuse_` prefix is tolerated so
    /// that `inuse_space` finds `space`.
    pub fn sample_index_by_name(&self, sample_index: &str) -> Option<usize> {
        if self.sample_types.is_empty() {
            return None;
        }
        if sample_index.is_empty() {
            if !self.default_sample_type.is_empty() {
                if let Some(i) = self
                    .sample_types
                    .iter()
                    .position(|t| t.r#type == self.default_sample_type)
                {
                    return Some(i);
                }
            }
            return Some(self.sample_types.len() - 1);
        }
        if let Ok(i) = sample_index.parse::<usize>() {
            return (i < self.sample_types.len()).then_some(i);
        }
        let no_inuse = sample_index.strip_prefix("inuse_").unwrap_or(sample_index);
        self.sample_types
            .iter()
            .position(|t| t.r#type == sample_index || t.r#type == no_inuse)
    }

    /// Names of all sample types, in order.
    pub fn sample_type_names(&self) -> Vec<String> {
        self.sample_types.iter().map(|t| t.r#type.clone()).collect()
    }

    /// Determines the unit of every numeric label key.
    ///
    /// Returns the chosen unit per key and, for keys seen with more than one
    /// unit, the sorted list of units that were ignored. The first unit seen
    /// wins. Keys that never carry a unit get a heuristic one.
    pub fn num_label_units(&self) -> (BTreeMap<String, String>, BTreeMap<String, Vec<String>>) {
        let mut units: BTreeMap<String, String> = BTreeMap::new();
        let mut ignored: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut keys = BTreeSet::new();

        for sample in &self.samples {
            for key in sample.num_labels.keys() {
                keys.insert(key.clone());
                let Some(sample_units) = sample.num_units.get(key) else {
                    continue;
                };
                for unit in sample_units.iter().filter(|u| !u.is_empty()) {
                    match units.get(key) {
                        None => {
                            units.insert(key.clone(), unit.clone());
                        }
                        Some(want) if want != unit => {
                            ignored.entry(key.clone()).or_default().insert(unit.clone());
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        for key in keys {
            units.entry(key.clone()).or_insert_with(|| match key.as_str() {
                "alignment" | "request" => "bytes".to_owned(),
                _ => key,
            });
        }

        let ignored = ignored
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();
        (units, ignored)
    }

    /// Collapses frames so that only the selected fields distinguish them.
    ///
    /// Cleared fields make otherwise different frames identical, and the
    /// graph builder merges identical frames into one node.
    pub fn aggregate(&mut self, fields: AggregateFields) {
        for f in &mut self.functions {
            if !fields.function {
                f.name.clear();
                f.system_name.clear();
            }
            if !fields.filename {
                f.filename.clear();
            }
        }
        if fields.inline_frames && fields.address && fields.line_number {
            return;
        }
        for loc in &mut self.locations {
            if !fields.inline_frames && loc.lines.len() > 1 {
                loc.lines.drain(..loc.lines.len() - 1);
            }
            if !fields.line_number {
                for line in &mut loc.lines {
                    line.line = 0;
                }
            }
            if !fields.address {
                loc.address = 0;
            }
        }
    }

    /// Base name of the main binary, if the profile names one.
    pub fn main_binary(&self) -> Option<&str> {
        let file = self.mappings.first()?.file.as_str();
        if file.is_empty() {
            return None;
        }
        std::path::Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .or(Some(file))
    }

    pub(crate) fn function(&self, line: &Line) -> Option<&Function> {
        line.function.and_then(|i| self.functions.get(i))
    }

    pub(crate) fn mapping(&self, loc: &Location) -> Option<&Mapping> {
        loc.mapping.and_then(|i| self.mappings.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::ProfileBuilder;
    use super::*;

    #[test]
    fn test_sample_index_by_name() {
        let mut b = ProfileBuilder::new(&[("alloc_objects", "count"), ("alloc_space", "bytes")]);
        let f = b.function("main", "main.go");
        let l = b.location(0x10, &[(f, 1)]);
        b.sample(&[l], &[1, 2]);
        let mut p = b.profile();

        assert_eq!(p.sample_index_by_name(""), Some(1));
        assert_eq!(p.sample_index_by_name("0"), Some(0));
        assert_eq!(p.sample_index_by_name("2"), None);
        assert_eq!(p.sample_index_by_name("alloc_objects"), Some(0));
        assert_eq!(p.sample_index_by_name("inuse_alloc_space"), Some(1));
        assert_eq!(p.sample_index_by_name("cpu"), None);

        p.default_sample_type = "alloc_objects".into();
        assert_eq!(p.sample_index_by_name(""), Some(0));
    }

    #[test]
    fn test_num_label_units_conflict() {
        let mut b = ProfileBuilder::new(&[("space", "bytes")]);
        let f = b.function("main", "main.go");
        let l = b.location(0x10, &[(f, 1)]);
        b.sample(&[l], &[1]).num_label("bytes", 8, "bytes");
        b.sample(&[l], &[1]).num_label("bytes", 8, "kilobytes");
        b.sample(&[l], &[1]).num_label("request", 16, "");
        b.sample(&[l], &[1]).num_label("pid", 3, "");
        let p = b.profile();

        let (units, ignored) = p.num_label_units();
        assert_eq!(units["bytes"], "bytes");
        assert_eq!(units["request"], "bytes");
        assert_eq!(units["pid"], "pid");
        assert_eq!(ignored["bytes"], vec!["kilobytes".to_owned()]);
        assert!(!ignored.contains_key("pid"));
    }

    #[test]
    fn test_aggregate_clears_fields() {
        let mut b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        let inner = b.function("inner", "a.go");
        let outer = b.function("outer", "a.go");
        let l = b.location(0x1234, &[(inner, 7), (outer, 21)]);
        b.sample(&[l], &[1]);
        let mut p = b.profile();

        p.aggregate(AggregateFields {
            function: true,
            ..Default::default()
        });
        let loc = &p.locations[0];
        assert_eq!(loc.address, 0);
        assert_eq!(loc.lines.len(), 1);
        assert_eq!(loc.lines[0].line, 0);
        assert_eq!(p.function(&loc.lines[0]).unwrap().name, "outer");
        assert_eq!(p.function(&loc.lines[0]).unwrap().filename, "");
    }

    #[test]
    fn test_main_binary() {
        let mut b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        b.mapping("/usr/local/bin/server");
        assert_eq!(b.profile().main_binary(), Some("server"));
        assert_eq!(Profile::default().main_binary(), None);
    }
}
