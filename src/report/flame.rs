// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flame graph data: a call tree of the report's nodes, serialized as
//! nested JSON frames for a client-side renderer.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::graph::location_infos;
use super::measurement::percentage;
use super::Report;

/// One frame of the flame tree. Children are sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlameNode {
    /// Short display name.
    pub name: String,
    /// Full printable name.
    pub full_name: String,
    /// Cumulative weight.
    pub value: i64,
    /// `value` in output units.
    pub value_label: String,
    /// Share of the report total.
    pub percent: String,
    /// Callees.
    pub children: Vec<FlameNode>,
}

#[derive(Default)]
struct TrieNode {
    value: i64,
    div: i64,
    /// graph node index → trie index
    children: BTreeMap<usize, usize>,
}

/// Drops the package path from a qualified function name.
fn shorten(name: &str) -> &str {
    let start = name.rfind('/').map_or(0, |i| i + 1);
    &name[start..]
}

/// Builds the flame tree. Frames whose node was trimmed from the report
/// graph are skipped, so the tree only contains nodes the graph shows.
pub fn flame_tree(rpt: &Report) -> FlameNode {
    let p = rpt.profile();
    let g = rpt.graph();
    let sv = rpt.options().sample_value;
    let index: HashMap<_, _> = g.nodes.iter().enumerate().map(|(i, n)| (&n.info, i)).collect();

    // trie[0] is the synthetic root
    let mut trie = vec![TrieNode::default()];
    let mut infos_cache: HashMap<usize, Vec<usize>> = HashMap::new();
    for s in &p.samples {
        let (v, d) = (sv.value(&s.values), sv.divisor(&s.values));
        if v == 0 && d == 0 {
            continue;
        }
        trie[0].value += v;
        trie[0].div += d;
        let mut cur = 0;
        for &loc in s.locations.iter().rev() {
            let frames = infos_cache.entry(loc).or_insert_with(|| {
                location_infos(p, &p.locations[loc])
                    .iter()
                    .filter_map(|info| index.get(info).copied())
                    .collect()
            });
            for &node in frames.iter() {
                cur = match trie[cur].children.get(&node) {
                    Some(&child) => child,
                    None => {
                        trie.push(TrieNode::default());
                        let child = trie.len() - 1;
                        trie[cur].children.insert(node, child);
                        child
                    }
                };
                trie[cur].value += v;
                trie[cur].div += d;
            }
        }
    }

    let value_of = |t: &TrieNode| if t.div == 0 { t.value } else { t.value / t.div };
    fn emit(
        rpt: &Report,
        trie: &[TrieNode],
        t: usize,
        name: String,
        value_of: &dyn Fn(&TrieNode) -> i64,
    ) -> FlameNode {
        let v = value_of(&trie[t]);
        let mut children: Vec<FlameNode> = trie[t]
            .children
            .iter()
            .map(|(&node, &child)| {
                emit(rpt, trie, child, rpt.graph().nodes[node].info.printable_name(), value_of)
            })
            .collect();
        children.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.full_name.cmp(&b.full_name)));
        FlameNode {
            name: shorten(&name).to_owned(),
            value: v,
            value_label: rpt.format_value(v),
            percent: percentage(v, rpt.total()),
            full_name: name,
            children,
        }
    }
    emit(rpt, &trie, 0, "root".to_owned(), &value_of)
}
