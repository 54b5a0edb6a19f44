// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Graphviz DOT composition for the graph view.

use std::fmt::Write as _;

use super::measurement::percentage;
use super::Report;

const BASE_FONT_SIZE: f64 = 8.0;
const MAX_FONT_GROWTH: f64 = 16.0;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Fill or outline color for a node or edge, red for heavy items and grey
/// for light ones. `score` is the item's share of the total in `[-1, 1]`.
fn color(score: f64, background: bool) -> String {
    let (mut saturation, value) = if background { (0.1, 0.93) } else { (1.0, 0.7) };
    let mut score = score.clamp(-1.0, 1.0);
    if score.abs() < 0.2 {
        saturation *= score.abs() / 0.2;
    }
    score = score.signum() * score.abs().powf(0.3);
    let (r, g) = if score < 0.0 {
        (value * (1.0 + saturation * score), value)
    } else {
        (value, value * (1.0 - saturation * score))
    };
    let b = value * (1.0 - saturation);
    let byte = |v: f64| (v * 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", byte(r), byte(g), byte(b))
}

/// Composes the DOT description of the report graph, legend included.
pub fn compose(rpt: &Report) -> String {
    let g = rpt.graph();
    let total = rpt.total();
    let score = |v: i64| if total == 0 { 0.0 } else { v as f64 / total as f64 };
    let title = escape(&rpt.options().title);
    let mut out = String::new();

    let _ = writeln!(out, "digraph \"{}\" {{", if title.is_empty() { "unnamed" } else { &title });
    let _ = writeln!(out, "node [style=filled fillcolor=\"#f8f8f8\"]");

    let legend: String = rpt
        .legend()
        .iter()
        .map(|l| format!("{}\\l", escape(l)))
        .collect();
    let _ = writeln!(
        out,
        "subgraph cluster_L {{ \"{}\" [shape=box fontsize=16 label=\"{legend}\" tooltip=\"{}\"] }}",
        if title.is_empty() { "legend" } else { &title },
        if title.is_empty() { "legend" } else { &title },
    );

    let max_flat = g
        .nodes
        .iter()
        .map(|n| n.flat_value().abs())
        .max()
        .unwrap_or(0)
        .max(1);
    for (i, n) in g.nodes.iter().enumerate() {
        let name = escape(&n.info.name_components().join("\\n"));
        let (flat, cum) = (n.flat_value(), n.cum_value());
        let mut label = format!("{name}\\n{} ({})", rpt.format_value(flat), percentage(flat, total));
        if flat != cum {
            let _ = write!(label, "\\nof {} ({})", rpt.format_value(cum), percentage(cum, total));
        }
        let font_size = BASE_FONT_SIZE
            + (MAX_FONT_GROWTH * (flat.abs() as f64 / max_flat as f64).sqrt()).ceil();
        let _ = writeln!(
            out,
            "N{id} [label=\"{label}\" id=\"node{id}\" fontsize={font_size} shape=box tooltip=\"{} ({})\" color=\"{}\" fillcolor=\"{}\"]",
            escape(&n.info.printable_name()),
            rpt.format_value(cum),
            color(score(cum), false),
            color(score(cum), true),
            id = i + 1,
        );
    }

    for e in &g.edges {
        let w = e.weight_value();
        let src = escape(&g.nodes[e.src].info.printable_name());
        let dest = escape(&g.nodes[e.dest].info.printable_name());
        let penwidth = (1.0 + 5.0 * score(w).abs()).min(6.0);
        let weight = (1.0 + 100.0 * score(w).abs()).round() as i64;
        let mut attrs = format!(
            "label=\" {}\" weight={weight} penwidth={penwidth:.0} color=\"{}\" tooltip=\"{src} -> {dest} ({})\" labeltooltip=\"{src} -> {dest} ({})\"",
            rpt.format_value(w),
            color(score(w), false),
            rpt.format_value(w),
            rpt.format_value(w),
        );
        if e.residual {
            attrs.push_str(" style=\"dotted\"");
        }
        if e.inline {
            attrs.push_str(" arrowhead=none");
        }
        let _ = writeln!(out, "N{} -> N{} [{attrs}]", e.src + 1, e.dest + 1);
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixture::abc_profile;
    use crate::profile::AggregateFields;
    use crate::report::{compute_total, ReportOptions};

    #[test]
    fn test_compose_abc() {
        let mut p = abc_profile();
        p.aggregate(AggregateFields {
            inline_frames: true,
            function: true,
            ..Default::default()
        });
        let options = ReportOptions {
            sample_type: "cpu".into(),
            sample_unit: "nanoseconds".into(),
            title: "abc".into(),
            ..Default::default()
        };
        let total = compute_total(&p, &options.sample_value);
        let dot = compose(&Report::new(p, options, total));

        assert!(dot.starts_with("digraph \"abc\" {\n"), "{dot}");
        assert!(dot.contains("File: abc\\l"));
        assert!(dot.contains("N1 [label=\"B\\n200ns (66.67%)\""), "{dot}");
        assert!(dot.contains("N3 [label=\"A\\n0ns (0.00%)\\nof 300ns (100%)\""), "{dot}");
        assert_eq!(dot.matches(" -> N").count(), 2);
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_color_extremes() {
        assert_eq!(color(1.0, false), "#b20000");
        assert_eq!(color(0.0, true), "#ededed");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
