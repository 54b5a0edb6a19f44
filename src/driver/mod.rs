// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The report pipeline: turns a cached profile, a view kind and the request's
//! view parameters into a [`Report`].
//!
//! Stages run in a fixed order: working copy, per-view overrides, numeric
//! label units, focus filtering (before the total with
//! `relative_percentages`, after it otherwise), sample value selection,
//! aggregation, and report assembly. Any failure aborts the pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use crate::profile::filter::TagFilter;
use crate::profile::{AggregateFields, Profile};
use crate::report::graph::SampleValue;
use crate::report::{compute_total, Report, ReportError, ReportOptions};

pub mod commands;
pub mod vars;

pub use commands::{check_view_overrides, ViewKind};
pub use vars::{VarError, Variables};

/// How stack frames collapse into graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One node per address.
    Addresses,
    /// One node per source line.
    Lines,
    /// One node per file.
    Files,
    /// One node per function.
    Functions,
    /// Functions, with inlined frames folded into their caller.
    NoInlines,
    /// Addresses, with inlined frames folded into their caller.
    AddressNoInlines,
}

impl Granularity {
    /// The granularity selected by `vars`, checked in priority order.
    pub fn from_vars(vars: &Variables) -> Result<Granularity, ReportError> {
        [
            ("addresses", Granularity::Addresses),
            ("lines", Granularity::Lines),
            ("files", Granularity::Files),
            ("functions", Granularity::Functions),
            ("noinlines", Granularity::NoInlines),
            ("addressnoinlines", Granularity::AddressNoInlines),
        ]
        .into_iter()
        .find(|(name, _)| vars.bool_value(name))
        .map(|(_, g)| g)
        .ok_or(ReportError::InvalidGranularity)
    }

    /// Fields kept by aggregation; `None` keeps the profile as is.
    pub fn fields(self) -> Option<AggregateFields> {
        let f = |inline_frames, function, filename, line_number, address| AggregateFields {
            inline_frames,
            function,
            filename,
            line_number,
            address,
        };
        match self {
            Granularity::Addresses => None,
            Granularity::Lines => Some(f(true, true, true, true, false)),
            Granularity::Files => Some(f(true, false, true, false, false)),
            Granularity::Functions => Some(f(true, true, false, false, false)),
            Granularity::NoInlines => Some(f(false, true, false, false, false)),
            Granularity::AddressNoInlines => Some(f(false, true, true, true, true)),
        }
    }
}

fn compile(name: &'static str, vars: &Variables) -> Result<Option<Regex>, ReportError> {
    let pattern = vars.string_value(name);
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| ReportError::BadRegex { name, source })
}

fn compile_tag(
    name: &'static str,
    vars: &Variables,
    units: &BTreeMap<String, String>,
) -> Result<Option<TagFilter>, ReportError> {
    let spec = vars.string_value(name);
    if spec.is_empty() {
        return Ok(None);
    }
    TagFilter::new(spec, units)
        .map(Some)
        .map_err(|source| ReportError::BadRegex { name, source })
}

fn apply_focus(
    p: &mut Profile,
    units: &BTreeMap<String, String>,
    vars: &Variables,
    diagnostics: &mut Vec<String>,
) -> Result<(), ReportError> {
    let focus = compile("focus", vars)?;
    let ignore = compile("ignore", vars)?;
    let hide = compile("hide", vars)?;
    let show = compile("show", vars)?;
    let show_from = compile("show_from", vars)?;
    let tag_focus = compile_tag("tagfocus", vars, units)?;
    let tag_ignore = compile_tag("tagignore", vars, units)?;

    let mut warn = |matched: bool, option: &str| {
        if !matched {
            tracing::debug!(option, "filter matched no samples");
            diagnostics.push(format!("{option} expression matched no samples"));
        }
    };
    let m = p.filter_samples_by_name(focus.as_ref(), ignore.as_ref(), hide.as_ref(), show.as_ref());
    warn(focus.is_none() || m.focus, "Focus");
    warn(ignore.is_none() || m.ignore, "Ignore");
    warn(hide.is_none() || m.hide, "Hide");
    warn(show.is_none() || m.show, "Show");
    if let Some(re) = &show_from {
        warn(p.show_from(re), "ShowFrom");
    }
    let (tf, ti) = p.filter_samples_by_tag(tag_focus.as_ref(), tag_ignore.as_ref());
    warn(tag_focus.is_none() || tf, "TagFocus");
    warn(tag_ignore.is_none() || ti, "TagIgnore");
    Ok(())
}

fn report_options(
    p: &Profile,
    units: BTreeMap<String, String>,
    vars: &Variables,
) -> Result<ReportOptions, ReportError> {
    if p.sample_types.is_empty() {
        return Err(ReportError::NoSampleTypes);
    }
    let requested = vars.string_value("sample_index");
    let index = p
        .sample_index_by_name(requested)
        .ok_or_else(|| ReportError::UnknownSampleType {
            requested: requested.to_owned(),
            available: p.sample_type_names(),
        })?;
    let mean = vars.bool_value("mean");
    let sample = &p.sample_types[index];
    let divide_by = vars.float_value("divide_by");
    if divide_by == 0.0 {
        return Err(ReportError::ZeroDivisor);
    }

    let active_filters = [
        "focus",
        "ignore",
        "hide",
        "show",
        "show_from",
        "tagfocus",
        "tagignore",
    ]
    .into_iter()
    .filter_map(|k| {
        let v = vars.string_value(k);
        (!v.is_empty()).then(|| format!("{k}={v}"))
    })
    .collect();

    let title = p
        .mappings
        .first()
        .filter(|m| !m.file.is_empty())
        .map(|m| {
            Path::new(&m.file)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&m.file)
                .to_owned()
        })
        .unwrap_or_default();

    Ok(ReportOptions {
        cum_sort: vars.bool_value("cum"),
        drop_negative: vars.bool_value("drop_negative"),
        compact_labels: vars.bool_value("compact_labels"),
        ratio: 1.0 / divide_by,
        node_count: usize::try_from(vars.int_value("nodecount")).unwrap_or(0),
        node_fraction: vars.float_value("nodefraction"),
        edge_fraction: vars.float_value("edgefraction"),
        active_filters,
        num_label_units: units,
        sample_value: SampleValue {
            index,
            mean_divisor: mean.then_some(0),
        },
        sample_type: if mean {
            format!("mean_{}", sample.r#type)
        } else {
            sample.r#type.clone()
        },
        sample_unit: sample.unit.clone(),
        output_unit: vars.string_value("unit").to_owned(),
        source_path: vars.string_value("source_path").to_owned(),
        trim_path: vars.string_value("trim_path").to_owned(),
        title,
        symbol: None,
    })
}

/// Runs the pipeline over a working copy of `profile`.
///
/// `symbol` restricts the disasm, source and peek views to matching
/// functions; it is ignored by the other views.
pub fn generate_report(
    profile: &Profile,
    view: ViewKind,
    vars: &Variables,
    symbol: Option<&str>,
) -> Result<Report, ReportError> {
    let mut p = profile.clone();

    let vars = match commands::overrides_for(view) {
        Some(o) => o.apply(vars)?,
        None => vars.clone(),
    };

    let mut diagnostics = Vec::new();
    let (units, ignored) = p.num_label_units();
    for (key, others) in &ignored {
        let used = units.get(key).map(String::as_str).unwrap_or_default();
        diagnostics.push(format!(
            "For tag {key} used unit {used}, also encountered unit(s) {}",
            others.join(", ")
        ));
    }

    let relative = vars.bool_value("relative_percentages");
    if relative {
        apply_focus(&mut p, &units, &vars, &mut diagnostics)?;
    }
    let mut options = report_options(&p, units.clone(), &vars)?;
    if view.takes_symbol() {
        let pattern = symbol.unwrap_or_default();
        options.symbol = Some(Regex::new(pattern).map_err(|source| ReportError::BadRegex {
            name: "symbol",
            source,
        })?);
    }
    let total = compute_total(&p, &options.sample_value);
    if !relative {
        apply_focus(&mut p, &units, &vars, &mut diagnostics)?;
    }
    if let Some(fields) = Granularity::from_vars(&vars)?.fields() {
        p.aggregate(fields);
    }

    let mut report = Report::new(p, options, total);
    report.set_diagnostics(diagnostics);
    Ok(report)
}
