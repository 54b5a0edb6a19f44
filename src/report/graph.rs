// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Call graph built from the samples of a profile.
//!
//! Nodes are keyed by [`NodeInfo`], so frames that became identical after
//! aggregation collapse into one node. Node and edge order is a function of
//! sample order only, which keeps rendered output deterministic.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::profile::{Location, Profile};

/// Identity of a graph node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeInfo {
    /// Function name.
    pub name: String,
    /// Name before demangling.
    pub orig_name: String,
    /// Instruction address, 0 when not tracked.
    pub address: u64,
    /// Source file.
    pub file: String,
    /// First line of the function.
    pub start_line: i64,
    /// Line number within `file`.
    pub lineno: i64,
    /// Object file the address belongs to.
    pub objfile: String,
}

impl NodeInfo {
    /// The parts [`NodeInfo::printable_name`] joins.
    pub fn name_components(&self) -> Vec<String> {
        let mut name = Vec::new();
        if self.address != 0 {
            name.push(format!("{:016x}", self.address));
        }
        if !self.name.is_empty() {
            name.push(self.name.clone());
        }
        if self.lineno != 0 {
            name.push(format!("{}:{}", self.file, self.lineno));
        } else if !self.file.is_empty() {
            name.push(self.file.clone());
        } else if !self.name.is_empty() {
        } else if !self.objfile.is_empty() {
            let base = Path::new(&self.objfile)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&self.objfile);
            name.push(format!("[{base}]"));
        } else {
            name.push("<unknown>".to_owned());
        }
        name
    }

    /// Human readable name: address, function, and file:line when present.
    pub fn printable_name(&self) -> String {
        self.name_components().join(" ")
    }
}

/// Picks the sample value (and optional mean divisor) out of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleValue {
    /// Index into a sample's values.
    pub index: usize,
    /// Index of the divisor series in mean mode.
    pub mean_divisor: Option<usize>,
}

impl SampleValue {
    /// The selected value of a sample, 0 if missing.
    pub fn value(&self, values: &[i64]) -> i64 {
        values.get(self.index).copied().unwrap_or(0)
    }

    /// The divisor of a sample, 0 when not in mean mode.
    pub fn divisor(&self, values: &[i64]) -> i64 {
        self.mean_divisor
            .and_then(|i| values.get(i).copied())
            .unwrap_or(0)
    }
}

/// A graph node with its accumulated weights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Identity of the node.
    pub info: NodeInfo,
    /// Weight of samples ending here.
    pub flat: i64,
    /// Divisor sum for `flat` in mean mode.
    pub flat_div: i64,
    /// Weight of samples passing through here, counted once per sample.
    pub cum: i64,
    /// Divisor sum for `cum` in mean mode.
    pub cum_div: i64,
}

impl Node {
    /// `flat`, divided in mean mode.
    pub fn flat_value(&self) -> i64 {
        if self.flat_div == 0 {
            self.flat
        } else {
            self.flat / self.flat_div
        }
    }

    /// `cum`, divided in mean mode.
    pub fn cum_value(&self) -> i64 {
        if self.cum_div == 0 {
            self.cum
        } else {
            self.cum / self.cum_div
        }
    }
}

/// A caller → callee edge between two node indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Caller node index.
    pub src: usize,
    /// Callee node index.
    pub dest: usize,
    /// Weight of samples taking this edge.
    pub weight: i64,
    /// Divisor sum for `weight` in mean mode.
    pub weight_div: i64,
    /// The edge skips over nodes that were trimmed away.
    pub residual: bool,
    /// The callee was inlined into the caller.
    pub inline: bool,
}

impl Edge {
    /// `weight`, divided in mean mode.
    pub fn weight_value(&self) -> i64 {
        if self.weight_div == 0 {
            self.weight
        } else {
            self.weight / self.weight_div
        }
    }
}

/// Node ordering for [`Graph::sort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Flat weight first.
    Flat,
    /// Cumulative weight first.
    Cum,
}

/// A call graph of one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    /// Nodes, in sort order once sorted.
    pub nodes: Vec<Node>,
    /// Edges between node indices.
    pub edges: Vec<Edge>,
}

pub(crate) fn location_infos(p: &Profile, loc: &Location) -> Vec<NodeInfo> {
    let objfile = p.mapping(loc).map(|m| m.file.clone()).unwrap_or_default();
    if loc.lines.is_empty() {
        return vec![NodeInfo {
            address: loc.address,
            objfile,
            ..Default::default()
        }];
    }
    // outermost caller first
    loc.lines
        .iter()
        .rev()
        .map(|line| {
            let f = p.function(line);
            NodeInfo {
                name: f.map(|f| f.name.clone()).unwrap_or_default(),
                orig_name: f.map(|f| f.system_name.clone()).unwrap_or_default(),
                address: loc.address,
                file: f.map(|f| f.filename.clone()).unwrap_or_default(),
                start_line: f.map_or(0, |f| f.start_line),
                lineno: line.line,
                objfile: objfile.clone(),
            }
        })
        .collect()
}

impl Graph {
    /// Builds the graph of `p`. When `keep` is set, frames outside it are
    /// skipped and the edges bridging them are marked residual.
    pub fn build(p: &Profile, value: &SampleValue, keep: Option<&HashSet<NodeInfo>>) -> Graph {
        let mut graph = Graph::default();
        let mut node_index: HashMap<NodeInfo, usize> = HashMap::new();
        let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();
        let mut location_cache: HashMap<usize, Vec<NodeInfo>> = HashMap::new();

        for sample in &p.samples {
            let (w, dw) = (value.value(&sample.values), value.divisor(&sample.values));
            if w == 0 && dw == 0 {
                continue;
            }
            let mut seen_nodes = HashSet::new();
            let mut seen_edges = HashSet::new();
            let mut caller: Option<usize> = None;
            let mut residual = false;

            for &loc_index in sample.locations.iter().rev() {
                let infos = location_cache
                    .entry(loc_index)
                    .or_insert_with(|| location_infos(p, &p.locations[loc_index]));
                for (i, info) in infos.iter().enumerate() {
                    if keep.is_some_and(|k| !k.contains(info)) {
                        residual = true;
                        continue;
                    }
                    let n = *node_index.entry(info.clone()).or_insert_with(|| {
                        graph.nodes.push(Node {
                            info: info.clone(),
                            ..Default::default()
                        });
                        graph.nodes.len() - 1
                    });
                    if seen_nodes.insert(n) {
                        graph.nodes[n].cum += w;
                        graph.nodes[n].cum_div += dw;
                    }
                    if let Some(c) = caller {
                        if seen_edges.insert((c, n)) {
                            let e = *edge_index.entry((c, n)).or_insert_with(|| {
                                graph.edges.push(Edge {
                                    src: c,
                                    dest: n,
                                    weight: 0,
                                    weight_div: 0,
                                    residual,
                                    inline: i > 0,
                                });
                                graph.edges.len() - 1
                            });
                            let edge = &mut graph.edges[e];
                            edge.weight += w;
                            edge.weight_div += dw;
                            edge.residual &= residual;
                        }
                    }
                    caller = Some(n);
                    residual = false;
                }
            }
            if let (Some(leaf), false) = (caller, residual) {
                graph.nodes[leaf].flat += w;
                graph.nodes[leaf].flat_div += dw;
            }
        }
        graph
    }

    /// Identities of every node.
    pub fn infos(&self) -> HashSet<NodeInfo> {
        self.nodes.iter().map(|n| n.info.clone()).collect()
    }

    /// Edges into `node`.
    pub fn in_edges(&self, node: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.dest == node)
    }

    /// Edges out of `node`.
    pub fn out_edges(&self, node: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.src == node)
    }

    /// Reorders nodes in place; edge endpoints are remapped.
    pub fn sort(&mut self, order: SortOrder) {
        let mut perm: Vec<usize> = (0..self.nodes.len()).collect();
        perm.sort_by(|&a, &b| compare_nodes(&self.nodes[a], &self.nodes[b], order));
        let mut new_index = vec![0; perm.len()];
        for (new, &old) in perm.iter().enumerate() {
            new_index[old] = new;
        }
        let mut old_nodes: Vec<Option<Node>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        self.nodes = perm
            .iter()
            .filter_map(|&old| old_nodes[old].take())
            .collect();
        for e in &mut self.edges {
            e.src = new_index[e.src];
            e.dest = new_index[e.dest];
        }
        self.edges
            .sort_by(|a, b| (a.src, a.dest).cmp(&(b.src, b.dest)));
    }

    /// Drops edges whose weight is below `cutoff`; returns how many.
    pub fn trim_low_frequency_edges(&mut self, cutoff: i64) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| e.weight.abs() >= cutoff);
        before - self.edges.len()
    }
}

fn compare_nodes(a: &Node, b: &Node, order: SortOrder) -> Ordering {
    let (primary, secondary) = match order {
        SortOrder::Flat => ((a.flat, b.flat), (a.cum, b.cum)),
        SortOrder::Cum => ((a.cum, b.cum), (a.flat, b.flat)),
    };
    primary
        .1
        .abs()
        .cmp(&primary.0.abs())
        .then_with(|| a.info.printable_name().cmp(&b.info.printable_name()))
        .then_with(|| secondary.1.abs().cmp(&secondary.0.abs()))
        .then_with(|| a.info.cmp(&b.info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixture::{abc_profile, ProfileBuilder};
    use crate::profile::AggregateFields;

    const CPU: SampleValue = SampleValue {
        index: 0,
        mean_divisor: None,
    };

    fn by_name(g: &Graph, name: &str) -> usize {
        g.nodes.iter().position(|n| n.info.name == name).unwrap()
    }

    fn functions_only(p: &mut Profile) {
        p.aggregate(AggregateFields {
            inline_frames: true,
            function: true,
            ..Default::default()
        });
    }

    #[test]
    fn test_build_abc() {
        let mut p = abc_profile();
        functions_only(&mut p);
        let g = Graph::build(&p, &CPU, None);
        assert_eq!(g.nodes.len(), 3);
        let (a, b, c) = (by_name(&g, "A"), by_name(&g, "B"), by_name(&g, "C"));
        assert_eq!((g.nodes[a].flat, g.nodes[a].cum), (0, 300));
        assert_eq!((g.nodes[b].flat, g.nodes[b].cum), (200, 200));
        assert_eq!((g.nodes[c].flat, g.nodes[c].cum), (100, 100));
        let ab = g.out_edges(a).find(|e| e.dest == b).unwrap();
        assert_eq!(ab.weight, 200);
        assert!(!ab.residual);
        assert_eq!(g.in_edges(c).count(), 1);
    }

    #[test]
    fn test_by_function_merges_lines() {
        let mut builder = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        let main = builder.function("main", "main.go");
        let work = builder.function("work", "work.go");
        let lm = builder.location(0x10, &[(main, 3)]);
        let lw1 = builder.location(0x20, &[(work, 10)]);
        let lw2 = builder.location(0x30, &[(work, 11)]);
        builder.sample(&[lw1, lm], &[40]);
        builder.sample(&[lw2, lm], &[60]);
        let mut p = builder.profile();

        let by_line = Graph::build(&p, &CPU, None);
        assert_eq!(by_line.nodes.len(), 3);

        functions_only(&mut p);
        let g = Graph::build(&p, &CPU, None);
        assert_eq!(g.nodes.len(), 2);
        let w = &g.nodes[by_name(&g, "work")];
        assert_eq!((w.flat, w.cum), (100, 100));
    }

    #[test]
    fn test_inlined_frames_mark_edges() {
        let mut builder = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        let main = builder.function("main", "main.go");
        let outer = builder.function("outer", "outer.go");
        let inner = builder.function("inner", "inner.go");
        let lm = builder.location(0x10, &[(main, 3)]);
        // inner was inlined into outer at one address
        let li = builder.location(0x20, &[(inner, 5), (outer, 9)]);
        builder.sample(&[li, lm], &[10]);
        let g = Graph::build(&builder.profile(), &CPU, None);
        assert_eq!(g.nodes.len(), 3);
        let (m, o, i) = (by_name(&g, "main"), by_name(&g, "outer"), by_name(&g, "inner"));
        let call = g.out_edges(m).find(|e| e.dest == o).unwrap();
        assert!(!call.inline);
        let inlined = g.out_edges(o).find(|e| e.dest == i).unwrap();
        assert!(inlined.inline);
        assert_eq!((g.nodes[i].flat, g.nodes[o].flat), (10, 0));
    }

    #[test]
    fn test_recursion_counted_once() {
        let mut builder = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        let rec = builder.function("rec", "r.go");
        let l = builder.location(0x10, &[(rec, 1)]);
        builder.sample(&[l, l, l], &[5]);
        let g = Graph::build(&builder.profile(), &CPU, None);
        assert_eq!(g.nodes.len(), 1);
        assert_eq!((g.nodes[0].flat, g.nodes[0].cum), (5, 5));
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].weight, 5);
    }

    #[test]
    fn test_keep_marks_residual() {
        let mut p = abc_profile();
        functions_only(&mut p);
        let full = Graph::build(&p, &CPU, None);
        let keep: HashSet<_> = full
            .nodes
            .iter()
            .filter(|n| n.info.name != "A")
            .map(|n| n.info.clone())
            .collect();
        let g = Graph::build(&p, &CPU, Some(&keep));
        assert_eq!(g.nodes.len(), 2);
        assert!(g.edges.is_empty());

        let keep: HashSet<_> = full
            .nodes
            .iter()
            .filter(|n| n.info.name != "B")
            .map(|n| n.info.clone())
            .collect();
        let g = Graph::build(&p, &CPU, Some(&keep));
        assert_eq!(g.nodes[by_name(&g, "A")].cum, 300);
        assert_eq!(g.nodes.iter().map(|n| n.flat).sum::<i64>(), 100);
    }

    #[test]
    fn test_sort_remaps_edges() {
        let mut p = abc_profile();
        functions_only(&mut p);
        let mut g = Graph::build(&p, &CPU, None);
        g.sort(SortOrder::Flat);
        let names: Vec<_> = g.nodes.iter().map(|n| n.info.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        for e in &g.edges {
            assert_eq!(g.nodes[e.src].info.name, "A");
        }
        g.sort(SortOrder::Cum);
        assert_eq!(g.nodes[0].info.name, "A");
    }

    #[test]
    fn test_printable_name() {
        let info = NodeInfo {
            name: "main.work".into(),
            file: "work.go".into(),
            lineno: 12,
            ..Default::default()
        };
        assert_eq!(info.printable_name(), "main.work work.go:12");
        let info = NodeInfo {
            address: 0x401000,
            objfile: "/usr/lib/libc.so.6".into(),
            ..Default::default()
        };
        assert_eq!(info.printable_name(), "0000000000401000 [libc.so.6]");
        assert_eq!(NodeInfo::default().printable_name(), "<unknown>");
    }
}
