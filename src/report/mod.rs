// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reports: a filtered, aggregated and trimmed call graph with its total and
//! legend. The views in [`text`], [`listing`], [`dot`] and [`flame`] are all
//! derived from a [`Report`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use regex::Regex;
use thiserror::Error;

use crate::profile::Profile;

pub mod dot;
pub mod flame;
pub mod graph;
pub mod listing;
pub mod measurement;
pub mod text;

use graph::{Graph, NodeInfo, SampleValue, SortOrder};

/// Errors building a report or one of its views. All of them are caused by
/// the request, not by the snapshot.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReportError {
    /// The profile declares no sample types.
    #[error("profile has no samples")]
    NoSampleTypes,
    /// `sample_index` names no sample type of the profile.
    #[error("sample_index {requested:?} must be one of: {available:?}")]
    UnknownSampleType {
        /// The name that was asked for.
        requested: String,
        /// Sample types the profile has.
        available: Vec<String>,
    },
    /// More than one granularity switch is set.
    #[error("unexpected granularity")]
    InvalidGranularity,
    /// A filter or symbol parameter is not a valid regexp.
    #[error("parsing argument regexp {name}: {source}")]
    BadRegex {
        /// Parameter the pattern came from.
        name: &'static str,
        /// Regexp parse error.
        #[source]
        source: regex::Error,
    },
    /// `divide_by` is zero.
    #[error("zero divisor specified")]
    ZeroDivisor,
    /// A listing or peek symbol matched nothing.
    #[error("no matches found for regexp: {0}")]
    NoMatches(String),
    /// A view parameter could not be read.
    #[error(transparent)]
    Var(#[from] crate::driver::VarError),
}

/// Knobs resolved from the view parameters.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Sort by cumulative instead of flat weight.
    pub cum_sort: bool,
    /// Drop nodes with negative flat weight.
    pub drop_negative: bool,
    /// Shorter legend and node labels.
    pub compact_labels: bool,
    /// Multiplier applied to displayed values (`1 / divide_by`).
    pub ratio: f64,
    /// Maximum number of nodes, 0 for no limit.
    pub node_count: usize,
    /// Nodes with less than this share of the total are dropped.
    pub node_fraction: f64,
    /// Edges with less than this share of the total are dropped.
    pub edge_fraction: f64,
    /// `key=value` strings of the filters in effect.
    pub active_filters: Vec<String>,
    /// Units of numeric labels, by key.
    pub num_label_units: BTreeMap<String, String>,
    /// Which sample value is reported.
    pub sample_value: SampleValue,
    /// Name of the reported sample type.
    pub sample_type: String,
    /// Unit of the reported sample type.
    pub sample_unit: String,
    /// Display unit, or `minimum` to pick one for the whole report.
    pub output_unit: String,
    /// `:`-separated source roots for the listing views.
    pub source_path: String,
    /// `:`-separated prefixes stripped from source file names.
    pub trim_path: String,
    /// Overrides the `File:` legend line when set.
    pub title: String,
    /// Restricts the listing views to matching functions.
    pub symbol: Option<Regex>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            cum_sort: false,
            drop_negative: false,
            compact_labels: false,
            ratio: 1.0,
            node_count: 0,
            node_fraction: 0.0,
            edge_fraction: 0.0,
            active_filters: Vec::new(),
            num_label_units: BTreeMap::new(),
            sample_value: SampleValue {
                index: 0,
                mean_divisor: None,
            },
            sample_type: String::new(),
            sample_unit: String::new(),
            output_unit: "minimum".to_owned(),
            source_path: String::new(),
            trim_path: String::new(),
            title: String::new(),
            symbol: None,
        }
    }
}

/// Sum of absolute sample values, divided by the summed divisor series in
/// mean mode.
pub fn compute_total(p: &Profile, value: &SampleValue) -> i64 {
    let (mut total, mut div) = (0i64, 0i64);
    for s in &p.samples {
        total += value.value(&s.values).abs();
        div += value.divisor(&s.values).abs();
    }
    if div != 0 {
        total / div
    } else {
        total
    }
}

/// A report ready for rendering. Built fresh per request.
#[derive(Debug, Clone)]
pub struct Report {
    profile: Profile,
    options: ReportOptions,
    total: i64,
    graph: Graph,
    orig_count: usize,
    dropped_nodes: usize,
    dropped_edges: usize,
    diagnostics: Vec<String>,
}

impl Report {
    /// Builds and trims the call graph of `profile`. `total` is passed in
    /// because it may have been computed before focus filtering.
    pub fn new(profile: Profile, options: ReportOptions, total: i64) -> Report {
        let mut report = Report {
            profile,
            options,
            total,
            graph: Graph::default(),
            orig_count: 0,
            dropped_nodes: 0,
            dropped_edges: 0,
            diagnostics: Vec::new(),
        };
        report.build_trimmed_graph();
        report.select_output_unit();
        report
    }

    fn new_graph(&self, keep: Option<&HashSet<NodeInfo>>) -> Graph {
        let g = Graph::build(&self.profile, &self.options.sample_value, keep);
        if !self.options.drop_negative {
            return g;
        }
        let non_negative: HashSet<NodeInfo> = g
            .nodes
            .iter()
            .filter(|n| !(n.cum < 0 || (n.cum == 0 && n.flat < 0)))
            .filter(|n| keep.map_or(true, |k| k.contains(&n.info)))
            .map(|n| n.info.clone())
            .collect();
        if non_negative.len() == g.nodes.len() {
            g
        } else {
            Graph::build(&self.profile, &self.options.sample_value, Some(&non_negative))
        }
    }

    fn build_trimmed_graph(&mut self) {
        let o = &self.options;
        let mut g = self.new_graph(None);
        let graph_total: i64 = g.nodes.iter().map(|n| n.flat).sum();
        let node_cutoff = (graph_total as f64 * o.node_fraction).abs() as i64;
        let edge_cutoff = (graph_total as f64 * o.edge_fraction).abs() as i64;
        let order = if o.cum_sort {
            SortOrder::Cum
        } else {
            SortOrder::Flat
        };

        if node_cutoff > 0 {
            let kept: HashSet<NodeInfo> = g
                .nodes
                .iter()
                .filter(|n| n.cum.abs() >= node_cutoff)
                .map(|n| n.info.clone())
                .collect();
            if kept.len() != g.nodes.len() {
                self.dropped_nodes = g.nodes.len() - kept.len();
                g = self.new_graph(Some(&kept));
            }
        }
        self.orig_count = g.nodes.len();

        let node_count = self.options.node_count;
        if node_count > 0 && g.nodes.len() > node_count {
            g.sort(order);
            let kept: HashSet<NodeInfo> = g
                .nodes
                .iter()
                .take(node_count)
                .map(|n| n.info.clone())
                .collect();
            g = self.new_graph(Some(&kept));
        }
        g.sort(order);
        self.dropped_edges = g.trim_low_frequency_edges(edge_cutoff);
        self.graph = g;
    }

    /// Resolves the `minimum` output unit to one unit for the whole report.
    fn select_output_unit(&mut self) {
        if self.options.output_unit != "minimum" || self.graph.nodes.is_empty() {
            return;
        }
        let mut min_value = 0i64;
        for n in &self.graph.nodes {
            let mut node_min = n.flat_value().abs();
            if node_min == 0 {
                node_min = n.cum_value().abs();
            }
            if node_min > 0 && (min_value == 0 || node_min < min_value) {
                min_value = node_min;
            }
        }
        let mut max_value = self.total;
        if min_value == 0 {
            min_value = max_value;
        }
        let ratio = self.options.ratio;
        if ratio > 0.0 && ratio != 1.0 {
            min_value = (min_value as f64 * ratio) as i64;
            max_value = (max_value as f64 * ratio) as i64;
        }
        let unit_of = |v: i64| measurement::scale(v, &self.options.sample_unit, "minimum").1;
        let (min_unit, max_unit) = (unit_of(min_value), unit_of(max_value));
        let unit = if min_unit != max_unit && min_value.saturating_mul(100) < max_value {
            unit_of(min_value.saturating_mul(100))
        } else {
            min_unit
        };
        self.options.output_unit = if unit.is_empty() {
            self.options.sample_unit.clone()
        } else {
            unit
        };
    }

    /// The profile after filtering and aggregation.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Options after view overrides and unit selection.
    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    /// Sum of absolute sample values before trimming.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// The trimmed and sorted graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Filter warnings to show next to the legend.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub(crate) fn set_diagnostics(&mut self, diagnostics: Vec<String>) {
        self.diagnostics = diagnostics;
    }

    /// `v` scaled by the display ratio and labeled in the output unit.
    pub fn format_value(&self, v: i64) -> String {
        measurement::scaled_label(
            (v as f64 * self.options.ratio) as i64,
            &self.options.sample_unit,
            &self.options.output_unit,
        )
    }

    /// Title, type, time and duration lines describing the profile.
    pub fn profile_labels(&self) -> Vec<String> {
        let p = &self.profile;
        let mut label = Vec::new();
        if let Some(m) = p.mappings.first() {
            if !m.file.is_empty() {
                let base = Path::new(&m.file)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&m.file);
                label.push(format!("File: {base}"));
            }
            if !m.build_id.is_empty() {
                label.push(format!("Build ID: {}", m.build_id));
            }
        }
        label.extend(p.comments.iter().filter(|c| !c.starts_with('#')).cloned());
        if !self.options.sample_type.is_empty() {
            label.push(format!("Type: {}", self.options.sample_type));
        }
        if p.time_nanos != 0 {
            let t = chrono::DateTime::from_timestamp_nanos(p.time_nanos);
            label.push(format!("Time: {}", t.format("%b %-d, %Y at %-I:%M%P (UTC)")));
        }
        if p.duration_nanos != 0 {
            let duration = measurement::scaled_label(p.duration_nanos, "nanoseconds", "auto");
            let (total_nanos, unit) =
                measurement::scale(self.total, &self.options.sample_unit, "nanoseconds");
            let ratio = if unit == "ns" && total_nanos != 0.0 {
                format!(
                    " ({})",
                    measurement::percentage(total_nanos as i64, p.duration_nanos)
                )
            } else {
                String::new()
            };
            label.push(format!(
                "Duration: {duration}, Total samples = {}{ratio}",
                self.format_value(self.total)
            ));
        }
        label
    }

    /// The legend shown above every view.
    pub fn legend(&self) -> Vec<String> {
        let o = &self.options;
        let mut label = if o.compact_labels {
            Vec::new()
        } else {
            self.profile_labels()
        };
        if !o.active_filters.is_empty() {
            label.push("Active filters:".to_owned());
            for f in &o.active_filters {
                let shown = match f.char_indices().nth(80) {
                    Some((i, _)) => format!("{}…", &f[..i]),
                    None => f.clone(),
                };
                label.push(format!("   {shown}"));
            }
        }
        let flat_sum: i64 = self.graph.nodes.iter().map(|n| n.flat_value()).sum();
        label.push(format!(
            "Showing nodes accounting for {}, {} of {} total",
            self.format_value(flat_sum),
            measurement::percentage(flat_sum, self.total),
            self.format_value(self.total)
        ));
        if self.total != 0 {
            let dropped = |count: usize, what: &str, by: &str, fraction: f64| {
                let plural = if count > 1 { "s" } else { "" };
                let cutoff = (self.total as f64 * fraction).abs() as i64;
                format!(
                    "Dropped {count} {what}{plural} ({by} <= {})",
                    self.format_value(cutoff)
                )
            };
            if self.dropped_nodes > 0 {
                label.push(dropped(self.dropped_nodes, "node", "cum", o.node_fraction));
            }
            if self.dropped_edges > 0 {
                label.push(dropped(self.dropped_edges, "edge", "freq", o.edge_fraction));
            }
            let shown = self.graph.nodes.len();
            if shown > 0 && shown < self.orig_count {
                label.push(format!(
                    "Showing top {shown} nodes out of {}",
                    self.orig_count
                ));
            }
        }
        label
    }
}
