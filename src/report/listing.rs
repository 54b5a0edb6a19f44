// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-function disassembly and source listings annotated with sample
//! values.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::graph::Node;
use super::measurement::percentage;
use super::{Report, ReportError};
use crate::objtool::ObjTool;

/// Most functions listed by one disasm or source view.
pub const MAX_FUNCTIONS: usize = 50;

const UNKNOWN_SOURCE: &str = "<unknown source>";
const SOURCE_MARGIN: i64 = 2;

struct Routine<'a> {
    name: String,
    nodes: Vec<&'a Node>,
    flat: i64,
    cum: i64,
}

/// Groups graph nodes by function, keeps those matching the report symbol,
/// and orders them by flat weight.
fn routines(rpt: &Report) -> Result<Vec<Routine<'_>>, ReportError> {
    let symbol = rpt.options().symbol.as_ref();
    let address = symbol.and_then(|rx| parse_address(rx.as_str()));
    let mut by_name: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
    for n in &rpt.graph().nodes {
        let name = if n.info.name.is_empty() {
            n.info.printable_name()
        } else {
            n.info.name.clone()
        };
        by_name.entry(name).or_default().push(n);
    }

    let mut out: Vec<Routine> = by_name
        .into_iter()
        .filter(|(name, nodes)| match symbol {
            None => true,
            Some(rx) => {
                rx.is_match(name) || address.is_some_and(|a| nodes.iter().any(|n| n.info.address == a))
            }
        })
        .map(|(name, nodes)| Routine {
            flat: nodes.iter().map(|n| n.flat_value()).sum(),
            cum: nodes.iter().map(|n| n.cum_value()).sum(),
            name,
            nodes,
        })
        .collect();
    if out.is_empty() {
        let rx = symbol.map(|rx| rx.to_string()).unwrap_or_default();
        return Err(ReportError::NoMatches(rx));
    }
    out.sort_by(|a, b| {
        b.flat
            .abs()
            .cmp(&a.flat.abs())
            .then_with(|| a.name.cmp(&b.name))
    });
    out.truncate(MAX_FUNCTIONS);
    Ok(out)
}

fn parse_address(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn value_or_dot(rpt: &Report, v: i64) -> String {
    if v == 0 {
        ".".to_owned()
    } else {
        rpt.format_value(v)
    }
}

fn routine_header(out: &mut String, rpt: &Report, r: &Routine<'_>, suffix: &str) {
    let _ = writeln!(out, "ROUTINE ======================== {}{suffix}", r.name);
    let _ = writeln!(
        out,
        "{:>10} {:>10} (flat, cum) {} of Total",
        rpt.format_value(r.flat),
        rpt.format_value(r.cum),
        percentage(r.cum, rpt.total())
    );
}

/// Annotated disassembly of every matching function. Addresses the object
/// tool cannot disassemble are listed as `<unknown source>`.
pub fn disasm(rpt: &Report, obj: &dyn ObjTool) -> Result<String, ReportError> {
    let mut out = String::new();
    let _ = writeln!(out, "Total: {}", rpt.format_value(rpt.total()));
    for r in routines(rpt)? {
        routine_header(&mut out, rpt, &r, "");

        let mut by_address: BTreeMap<u64, (i64, i64)> = BTreeMap::new();
        for n in &r.nodes {
            let e = by_address.entry(n.info.address).or_default();
            e.0 += n.flat_value();
            e.1 += n.cum_value();
        }
        let objfile = r
            .nodes
            .iter()
            .map(|n| n.info.objfile.as_str())
            .find(|f| !f.is_empty())
            .unwrap_or_default();
        let (start, end) = match (by_address.keys().next(), by_address.keys().next_back()) {
            (Some(&s), Some(&e)) => (s, e),
            _ => (0, 0),
        };

        let insts = match obj.disassemble(objfile, start, end) {
            Ok(insts) if !insts.is_empty() => insts,
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::debug!(routine = %r.name, "no disassembly: {e}");
                Vec::new()
            }
        };

        if insts.is_empty() {
            for n in sorted_by_address(&r.nodes) {
                let mut loc = n.info.file.clone();
                if n.info.lineno != 0 {
                    let _ = write!(loc, ":{}", n.info.lineno);
                }
                let _ = writeln!(
                    out,
                    "{:>10} {:>10} {:>10x}: {:<40};{loc}",
                    value_or_dot(rpt, n.flat_value()),
                    value_or_dot(rpt, n.cum_value()),
                    n.info.address,
                    UNKNOWN_SOURCE,
                );
            }
            continue;
        }

        let mut last = (String::new(), String::new(), 0);
        for inst in insts {
            let (flat, cum) = by_address.get(&inst.addr).copied().unwrap_or_default();
            let mut loc = String::new();
            if (&inst.function, &inst.file, inst.line) != (&last.0, &last.1, last.2) {
                last = (inst.function.clone(), inst.file.clone(), inst.line);
                if !inst.function.is_empty() {
                    loc = format!("{} ", inst.function);
                }
                if !inst.file.is_empty() {
                    loc.push_str(&inst.file);
                    if inst.line != 0 {
                        let _ = write!(loc, ":{}", inst.line);
                    }
                }
            }
            let (flat, cum) = (value_or_dot(rpt, flat), value_or_dot(rpt, cum));
            if loc.is_empty() {
                let _ = writeln!(out, "{flat:>10} {cum:>10} {:>10x}: {}", inst.addr, inst.text);
            } else if inst.text.len() < 40 {
                let _ = writeln!(
                    out,
                    "{flat:>10} {cum:>10} {:>10x}: {:<40};{loc}",
                    inst.addr, inst.text
                );
            } else {
                let _ = writeln!(out, "{:74};{loc}", "");
                let _ = writeln!(out, "{flat:>10} {cum:>10} {:>10x}: {}", inst.addr, inst.text);
            }
        }
    }
    Ok(out)
}

fn sorted_by_address<'a>(nodes: &[&'a Node]) -> Vec<&'a Node> {
    let mut nodes = nodes.to_vec();
    nodes.sort_by(|a, b| a.info.address.cmp(&b.info.address).then_with(|| a.info.cmp(&b.info)));
    nodes
}

/// Source of every matching function with per-line values. Lines whose
/// source cannot be read are shown as `<unknown source>`.
pub fn source(rpt: &Report, obj: &dyn ObjTool) -> Result<String, ReportError> {
    let o = rpt.options();
    let mut out = String::new();
    let _ = writeln!(out, "Total: {}", rpt.format_value(rpt.total()));
    for r in routines(rpt)? {
        let file = r
            .nodes
            .iter()
            .map(|n| n.info.file.as_str())
            .find(|f| !f.is_empty())
            .unwrap_or_default();
        routine_header(&mut out, rpt, &r, &format!(" in {file}"));

        let mut by_line: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
        for n in r.nodes.iter().filter(|n| n.info.lineno > 0) {
            let e = by_line.entry(n.info.lineno).or_default();
            e.0 += n.flat_value();
            e.1 += n.cum_value();
        }

        let text = match obj.source_file(file, &o.source_path, &o.trim_path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!(routine = %r.name, "no source: {e}");
                None
            }
        };

        let (Some(&first), Some(&last)) = (by_line.keys().next(), by_line.keys().next_back())
        else {
            continue;
        };
        let start_line = r
            .nodes
            .iter()
            .map(|n| n.info.start_line)
            .filter(|&l| l > 0 && l < first)
            .min()
            .unwrap_or(first);

        match text {
            Some(text) => {
                let from = (start_line - SOURCE_MARGIN).max(1);
                let to = (last + SOURCE_MARGIN).min(text.len() as i64);
                for lineno in from..=to {
                    let (flat, cum) = by_line.get(&lineno).copied().unwrap_or_default();
                    let src = usize::try_from(lineno - 1)
                        .ok()
                        .and_then(|i| text.get(i))
                        .map(String::as_str)
                        .unwrap_or(UNKNOWN_SOURCE);
                    let _ = writeln!(
                        out,
                        "{:>10} {:>10} {lineno:>6}: {src}",
                        value_or_dot(rpt, flat),
                        value_or_dot(rpt, cum),
                    );
                }
            }
            None => {
                for (lineno, (flat, cum)) in &by_line {
                    let _ = writeln!(
                        out,
                        "{:>10} {:>10} {lineno:>6}: {UNKNOWN_SOURCE}",
                        value_or_dot(rpt, *flat),
                        value_or_dot(rpt, *cum),
                    );
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::objtool::{Inst, NoObjTool, ObjToolError};
    use crate::profile::fixture::abc_profile;
    use crate::profile::AggregateFields;
    use crate::report::{compute_total, ReportOptions};

    fn report(symbol: &str) -> Report {
        let mut p = abc_profile();
        p.aggregate(AggregateFields {
            function: true,
            filename: true,
            line_number: true,
            address: true,
            inline_frames: false,
        });
        let options = ReportOptions {
            sample_type: "cpu".into(),
            sample_unit: "nanoseconds".into(),
            symbol: Some(Regex::new(symbol).unwrap()),
            ..Default::default()
        };
        let total = compute_total(&p, &options.sample_value);
        Report::new(p, options, total)
    }

    #[derive(Debug)]
    struct FakeObj;

    impl ObjTool for FakeObj {
        fn disassemble(&self, file: &str, start: u64, end: u64) -> Result<Vec<Inst>, ObjToolError> {
            assert_eq!(file, "/usr/bin/abc");
            assert_eq!(start, end);
            Ok(vec![
                Inst {
                    addr: start,
                    text: "callq 0x1234".into(),
                    function: "B".into(),
                    file: "abc.go".into(),
                    line: 20,
                },
                Inst {
                    addr: start + 5,
                    text: "ret".into(),
                    function: "B".into(),
                    file: "abc.go".into(),
                    line: 20,
                },
            ])
        }

        fn source_file(&self, _: &str, _: &str, _: &str) -> Result<Vec<String>, ObjToolError> {
            Ok((1..=40).map(|i| format!("line {i}")).collect())
        }
    }

    #[test]
    fn test_disasm_without_symbols() {
        let text = disasm(&report(""), &NoObjTool).unwrap();
        assert!(text.starts_with("Total: 300ns\n"), "{text}");
        assert_eq!(text.matches("ROUTINE").count(), 3);
        let unknown: Vec<_> = text.lines().filter(|l| l.contains(UNKNOWN_SOURCE)).collect();
        assert_eq!(unknown.len(), 3, "{text}");
        assert!(unknown.iter().any(|l| l.contains("402000") && l.ends_with(";abc.go:20")));
    }

    #[test]
    fn test_disasm_with_instructions() {
        let text = disasm(&report("^B$"), &FakeObj).unwrap();
        assert!(text.contains("ROUTINE ======================== B\n"));
        let lines: Vec<_> = text.lines().collect();
        assert!(lines.iter().any(|l| l.contains("callq 0x1234") && l.ends_with(";B abc.go:20")));
        assert!(lines.iter().any(|l| l.trim_start().starts_with(". ") && l.ends_with("ret")));
    }

    #[test]
    fn test_disasm_by_address() {
        let text = disasm(&report("0x403000"), &NoObjTool).unwrap();
        assert!(text.contains("ROUTINE ======================== C\n"), "{text}");
    }

    #[test]
    fn test_source_listing() {
        let text = source(&report("^C$"), &FakeObj).unwrap();
        assert!(text.contains("ROUTINE ======================== C in abc.go"));
        let row = text.lines().find(|l| l.ends_with("30: line 30")).unwrap();
        assert!(row.contains("100ns"), "{row}");
        assert!(text.contains("28: line 28"));

        let text = source(&report("^C$"), &NoObjTool).unwrap();
        assert!(text.contains("30: <unknown source>"));
    }

    #[test]
    fn test_no_match() {
        assert!(matches!(
            disasm(&report("^Z$"), &NoObjTool),
            Err(ReportError::NoMatches(_))
        ));
    }
}
