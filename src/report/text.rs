// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Top listing and caller/callee peek.

use std::fmt::Write as _;

use super::graph::Edge;
use super::measurement::percentage;
use super::{Report, ReportError};

/// One row of the top listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextItem {
    /// Printable node name.
    pub name: String,
    /// `(inline)` or `(partial-inline)` when reached through inlined calls.
    pub inline_label: String,
    /// Flat weight.
    pub flat: i64,
    /// Cumulative weight.
    pub cum: i64,
    /// `flat` in output units.
    pub flat_format: String,
    /// `cum` in output units.
    pub cum_format: String,
}

/// Rows for the top view, in report order.
pub fn text_items(rpt: &Report) -> Vec<TextItem> {
    let g = rpt.graph();
    g.nodes
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let (mut inline, mut noinline) = (false, false);
            for e in g.in_edges(i) {
                if e.inline {
                    inline = true;
                } else {
                    noinline = true;
                }
            }
            let inline_label = match (inline, noinline) {
                (true, true) => "(partial-inline)",
                (true, false) => "(inline)",
                _ => "",
            };
            TextItem {
                name: n.info.printable_name(),
                inline_label: inline_label.to_owned(),
                flat: n.flat_value(),
                cum: n.cum_value(),
                flat_format: rpt.format_value(n.flat_value()),
                cum_format: rpt.format_value(n.cum_value()),
            }
        })
        .collect()
}

/// Plain text rendering of the top view.
pub fn top(rpt: &Report) -> String {
    let mut out = String::new();
    for line in rpt.legend() {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(
        out,
        "{:>10} {:>7} {:>7} {:>10} {:>7}",
        "flat", "flat%", "sum%", "cum", "cum%"
    );
    let mut flat_sum = 0;
    for item in text_items(rpt) {
        flat_sum += item.flat;
        let _ = writeln!(
            out,
            "{:>10} {:>7} {:>7} {:>10} {:>7}  {} {}",
            item.flat_format,
            percentage(item.flat, rpt.total()),
            percentage(flat_sum, rpt.total()),
            item.cum_format,
            percentage(item.cum, rpt.total()),
            item.name,
            item.inline_label
        );
    }
    out
}

const SEPARATOR: &str =
    "----------------------------------------------------------+-------------";

/// Callers and callees of every node whose name matches the report symbol.
pub fn peek(rpt: &Report) -> Result<String, ReportError> {
    let g = rpt.graph();
    let rx = rpt.options().symbol.as_ref();
    let name_of = |i: usize| g.nodes[i].info.printable_name();
    let mut out = String::new();
    for line in rpt.legend() {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(
        out,
        "      flat  flat%   sum%        cum   cum%   calls calls% + context"
    );

    let mut flat_sum = 0;
    let mut matched = 0;
    for (i, n) in g.nodes.iter().enumerate() {
        let name = n.info.printable_name();
        if rx.is_some_and(|rx| !rx.is_match(&name)) {
            continue;
        }
        matched += 1;
        let cum = n.cum_value();
        let _ = writeln!(out, "{SEPARATOR}");

        let edge_line = |out: &mut String, e: &Edge, other: usize| {
            let inline = if e.inline { " (inline)" } else { "" };
            let _ = writeln!(
                out,
                "{:>50} {:>7} |   {}{inline}",
                rpt.format_value(e.weight_value()),
                percentage(e.weight_value(), cum),
                name_of(other)
            );
        };
        for e in sorted_edges(g.in_edges(i).collect(), |e| name_of(e.src)) {
            edge_line(&mut out, e, e.src);
        }
        flat_sum += n.flat_value();
        let _ = writeln!(
            out,
            "{:>10} {:>7} {:>7} {:>10} {:>7}                | {name}",
            rpt.format_value(n.flat_value()),
            percentage(n.flat_value(), rpt.total()),
            percentage(flat_sum, rpt.total()),
            rpt.format_value(cum),
            percentage(cum, rpt.total()),
        );
        for e in sorted_edges(g.out_edges(i).collect(), |e| name_of(e.dest)) {
            edge_line(&mut out, e, e.dest);
        }
    }
    if !g.nodes.is_empty() {
        let _ = writeln!(out, "{SEPARATOR}");
    }
    match rx {
        Some(rx) if matched == 0 => Err(ReportError::NoMatches(rx.to_string())),
        _ => Ok(out),
    }
}

fn sorted_edges<'a>(mut edges: Vec<&'a Edge>, name: impl Fn(&Edge) -> String) -> Vec<&'a Edge> {
    edges.sort_by(|a, b| {
        b.weight
            .abs()
            .cmp(&a.weight.abs())
            .then_with(|| name(a).cmp(&name(b)))
    });
    edges
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::profile::fixture::{abc_profile, ProfileBuilder};
    use crate::profile::AggregateFields;
    use crate::report::{compute_total, ReportOptions};

    fn report(symbol: Option<&str>) -> Report {
        let mut p = abc_profile();
        p.aggregate(AggregateFields {
            inline_frames: true,
            function: true,
            ..Default::default()
        });
        let options = ReportOptions {
            sample_type: "cpu".into(),
            sample_unit: "nanoseconds".into(),
            symbol: symbol.map(|s| Regex::new(s).unwrap()),
            ..Default::default()
        };
        let total = compute_total(&p, &options.sample_value);
        Report::new(p, options, total)
    }

    #[test]
    fn test_text_items_ranked() {
        let items = text_items(&report(None));
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        assert_eq!(items[0].flat_format, "200ns");
        assert_eq!(items[2].cum, 300);
        assert_eq!(items[2].inline_label, "");
    }

    #[test]
    fn test_inline_labels() {
        let mut b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
        let main = b.function("main", "main.go");
        let outer = b.function("outer", "outer.go");
        let inner = b.function("inner", "inner.go");
        let lm = b.location(0x10, &[(main, 3)]);
        let li = b.location(0x20, &[(inner, 5), (outer, 9)]);
        b.sample(&[li, lm], &[10]);
        let mut p = b.profile();
        p.aggregate(AggregateFields {
            inline_frames: true,
            function: true,
            ..Default::default()
        });
        let options = ReportOptions {
            sample_type: "cpu".into(),
            sample_unit: "nanoseconds".into(),
            ..Default::default()
        };
        let rpt = Report::new(p, options, 10);
        let labels: Vec<_> = text_items(&rpt)
            .into_iter()
            .map(|i| (i.name, i.inline_label))
            .collect();
        assert!(labels.contains(&("inner".to_owned(), "(inline)".to_owned())), "{labels:?}");
        assert!(labels.contains(&("outer".to_owned(), String::new())), "{labels:?}");
        assert!(labels.contains(&("main".to_owned(), String::new())), "{labels:?}");
    }

    #[test]
    fn test_top_text() {
        let text = top(&report(None));
        assert!(text.contains("66.67%"), "{text}");
        assert!(text.lines().any(|l| l.ends_with("A ")), "{text}");
    }

    #[test]
    fn test_peek_lists_context() {
        let text = peek(&report(Some("^A$"))).unwrap();
        let callee_b = text.lines().position(|l| l.ends_with("|   B")).unwrap();
        let callee_c = text.lines().position(|l| l.ends_with("|   C")).unwrap();
        assert!(callee_b < callee_c, "{text}");
        assert!(text.contains("| A"));
    }

    #[test]
    fn test_peek_no_match() {
        let err = peek(&report(Some("nope"))).unwrap_err();
        assert!(matches!(err, ReportError::NoMatches(_)));
    }
}
