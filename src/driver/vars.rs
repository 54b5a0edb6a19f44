// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! View parameters: named, typed options with defaults and value domains.
//!
//! [`Variables::with_overrides`] returns a new set and leaves the receiver
//! untouched, so one default set can be shared by every request.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::report::measurement;

/// A view parameter that could not be applied.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum VarError {
    /// No parameter has this name.
    #[error("unknown parameter {0:?}")]
    Unknown(String),
    /// The value does not parse as the parameter's type.
    #[error("invalid value {value:?} for {name}, want {kind}")]
    InvalidValue {
        /// Parameter name.
        name: String,
        /// The rejected value.
        value: String,
        /// Expected type, for the message.
        kind: &'static str,
    },
    /// The value parsed but is outside the allowed range.
    #[error("value {value:?} for {name} out of range: {domain}")]
    OutOfDomain {
        /// Parameter name.
        name: String,
        /// The rejected value.
        value: String,
        /// Accepted range, for the message.
        domain: &'static str,
    },
}

/// Typed value of a view parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    /// `true`/`false`, also `t`/`f`, `1`/`0`, `yes`/`no`.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// Any text.
    Str(String),
}

impl VarValue {
    fn kind(&self) -> &'static str {
        match self {
            VarValue::Bool(_) => "a boolean",
            VarValue::Int(_) => "an integer",
            VarValue::Float(_) => "a number",
            VarValue::Str(_) => "a string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Any,
    /// At least -1; -1 selects the per-view default.
    NodeCount,
    Fraction,
    Unit,
}

impl Domain {
    fn accepts(self, v: &VarValue) -> bool {
        match (self, v) {
            (Domain::Any, _) => true,
            (Domain::NodeCount, VarValue::Int(n)) => *n >= -1,
            (Domain::Fraction, VarValue::Float(f)) => (0.0..=1.0).contains(f),
            (Domain::Unit, VarValue::Str(s)) => measurement::is_known_output_unit(s),
            _ => false,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Domain::Any => "any",
            Domain::NodeCount => "-1 or more",
            Domain::Fraction => "between 0 and 1",
            Domain::Unit => "minimum, auto, or a time or memory unit",
        }
    }
}

/// A view parameter with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Current value.
    pub value: VarValue,
    /// Exclusive group: setting one member to true clears the others.
    pub group: Option<&'static str>,
    /// One-line description.
    pub help: &'static str,
    domain: Domain,
}

const GRANULARITY: &str = "granularity";

/// The full parameter table, keyed by canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct Variables {
    vars: BTreeMap<&'static str, Variable>,
}

impl Default for Variables {
    fn default() -> Self {
        use VarValue::*;
        let var = |value, help| Variable {
            value,
            group: None,
            help,
            domain: Domain::Any,
        };
        let in_domain = |value, domain, help| Variable {
            value,
            group: None,
            help,
            domain,
        };
        let granularity = |on, help| Variable {
            value: Bool(on),
            group: Some(GRANULARITY),
            help,
            domain: Domain::Any,
        };
        let s = || Str(String::new());

        let vars = BTreeMap::from([
            ("nodecount", in_domain(Int(-1), Domain::NodeCount, "Max number of nodes to show")),
            ("nodefraction", in_domain(Float(0.005), Domain::Fraction, "Hide nodes below <f>*total")),
            ("edgefraction", in_domain(Float(0.001), Domain::Fraction, "Hide edges below <f>*total")),
            ("trim", var(Bool(true), "Honor nodefraction/edgefraction/nodecount defaults")),
            ("focus", var(s(), "Restricts to samples going through a node matching regexp")),
            ("ignore", var(s(), "Skips paths going through any nodes matching regexp")),
            ("hide", var(s(), "Skips nodes matching regexp")),
            ("show", var(s(), "Only show nodes matching regexp")),
            ("show_from", var(s(), "Drops functions above the highest matched frame")),
            ("tagfocus", var(s(), "Restricts to samples with tags matching regexp")),
            ("tagignore", var(s(), "Discard samples with tags matching regexp")),
            ("relative_percentages", var(Bool(false), "Show percentages relative to focused subgraph")),
            ("sample_index", var(s(), "Sample value to report (0-based index or name)")),
            ("mean", var(Bool(false), "Average sample value over first value (count)")),
            ("divide_by", var(Float(1.0), "Ratio to divide all samples before visualization")),
            ("unit", in_domain(Str("minimum".into()), Domain::Unit, "Measurement units to display")),
            ("cum", var(Bool(false), "Sort entries based on cumulative weight")),
            ("drop_negative", var(Bool(false), "Ignore negative differences")),
            ("compact_labels", var(Bool(false), "Show minimal headers")),
            ("source_path", var(s(), "Search path for source files")),
            ("trim_path", var(s(), "Path to trim from source paths before search")),
            ("addresses", granularity(false, "Aggregate at the address level")),
            ("addressnoinlines", granularity(false, "Aggregate at the address level, ignoring inlined frames")),
            ("lines", granularity(false, "Aggregate at the source code line level")),
            ("files", granularity(false, "Aggregate at the file level")),
            ("functions", granularity(true, "Aggregate at the function level")),
            ("noinlines", granularity(false, "Aggregate at the function level, ignoring inlined frames")),
        ]);
        Variables { vars }
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "" | "t" | "true" | "y" | "yes" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Maps a query parameter to its variable name, resolving the short
/// aliases used by the web UI.
pub fn canonical_name(param: &str) -> &str {
    match param {
        "f" => "focus",
        "s" => "show",
        "i" => "ignore",
        "h" => "hide",
        other => other,
    }
}

impl Variables {
    /// The parameter named `name`, by canonical name.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    /// Canonical names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.vars.keys().copied()
    }

    /// Parses `value` according to the type of `name` and stores it.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), VarError> {
        let Some((&key, var)) = self.vars.get_key_value(name) else {
            return Err(VarError::Unknown(name.to_owned()));
        };
        let invalid = || VarError::InvalidValue {
            name: name.to_owned(),
            value: value.to_owned(),
            kind: var.value.kind(),
        };
        let parsed = match var.value {
            VarValue::Bool(_) => VarValue::Bool(parse_bool(value).ok_or_else(invalid)?),
            VarValue::Int(_) => VarValue::Int(value.trim().parse().map_err(|_| invalid())?),
            VarValue::Float(_) => VarValue::Float(value.trim().parse().map_err(|_| invalid())?),
            VarValue::Str(_) => VarValue::Str(value.to_owned()),
        };
        if !var.domain.accepts(&parsed) {
            return Err(VarError::OutOfDomain {
                name: name.to_owned(),
                value: value.to_owned(),
                domain: var.domain.describe(),
            });
        }
        let group = var.group;
        if let (Some(group), VarValue::Bool(true)) = (group, &parsed) {
            for other in self.vars.values_mut().filter(|v| v.group == Some(group)) {
                other.value = VarValue::Bool(false);
            }
        }
        if let Some(var) = self.vars.get_mut(key) {
            var.value = parsed;
        }
        Ok(())
    }

    /// A copy of `self` with `overrides` applied in order.
    pub fn with_overrides<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Variables, VarError> {
        let mut vars = self.clone();
        for (name, value) in overrides {
            vars.set(name, value)?;
        }
        Ok(vars)
    }

    /// Value of a boolean parameter. Unknown or non-boolean names read as false.
    pub fn bool_value(&self, name: &str) -> bool {
        matches!(self.vars.get(name), Some(Variable { value: VarValue::Bool(true), .. }))
    }

    /// Value of an integer parameter, 0 if absent.
    pub fn int_value(&self, name: &str) -> i64 {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Int(i)) => *i,
            _ => 0,
        }
    }

    /// Value of a float parameter, 0 if absent.
    pub fn float_value(&self, name: &str) -> f64 {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Float(f)) => *f,
            _ => 0.0,
        }
    }

    /// Value of a string parameter, empty if absent.
    pub fn string_value(&self, name: &str) -> &str {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Str(s)) => s,
            _ => "",
        }
    }
}
